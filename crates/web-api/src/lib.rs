//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给追踪服务和实时推送 Hub。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{bearer_token, JwtService};
pub use config::JwtConfig;
pub use error::{ApiError, ErrorBody};
pub use routes::router;
pub use state::AppState;
