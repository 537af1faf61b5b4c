pub mod account;
pub mod auth;
pub mod error;
pub mod forms;
pub mod middleware;
pub mod password;
pub mod routes;
pub mod tokens;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
pub use routes::router;
pub use tokens::{TokenConfig, TokenError, TokenService};
