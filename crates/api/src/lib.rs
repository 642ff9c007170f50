pub mod auth;
pub mod error;
pub mod handlers;
pub mod response;
pub mod routes;

pub use auth::AuthState;
pub use error::{ApiError, ApiResult};
pub use response::ApiResponse;
pub use routes::{create_app, AppState};
