//! 请求网关中间件
//!
//! 每个请求先经过 [`RequestGateway::decide`]：无会话跳转登录页，非管理员访问
//! 管理路由返回 403，其余放行并把身份放进请求扩展。身份服务刷新过的令牌
//! 无论结果如何都写回 `Set-Cookie`。
//!
//! [`RequestGateway::decide`]: application::RequestGateway::decide

use axum::{
    extract::{Request, State},
    http::header::SET_COOKIE,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use application::GatewayOutcome;

use crate::{error::ApiError, state::AppState};

pub async fn session_gateway(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let credentials = state.session_cookie.credentials(request.headers());
    let path = request.uri().path().to_owned();

    let decision = match state.gateway.decide(&path, &credentials).await {
        Ok(decision) => decision,
        Err(err) => return ApiError::from(err).into_response(),
    };

    let mut response = match decision.outcome {
        GatewayOutcome::Forward { principal } => {
            if let Some(principal) = principal {
                request.extensions_mut().insert(principal);
            }
            next.run(request).await
        }
        GatewayOutcome::RedirectToLogin { location } => {
            Redirect::temporary(&location).into_response()
        }
        GatewayOutcome::AdminOnly => ApiError::admin_only().into_response(),
    };

    if let Some(value) = decision
        .refreshed
        .as_ref()
        .and_then(|token| state.session_cookie.header_value(token))
    {
        response.headers_mut().append(SET_COOKIE, value);
    }

    response
}
