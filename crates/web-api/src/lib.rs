pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws_connection;

pub use auth::{Claims, JwtService, LoginResponse};
pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, Repositories};
