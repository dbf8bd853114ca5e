//! Web API 层。
//!
//! 提供 Axum 路由与请求网关中间件，将 HTTP / WebSocket 请求委托给应用层的用例服务。

mod error;
mod gateway;
mod routes;
mod session;
mod state;
mod websocket;

pub use error::{ApiError, Envelope};
pub use routes::router;
pub use session::SessionCookie;
pub use state::{AppState, RealtimeSettings};
