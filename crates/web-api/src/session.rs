//! 会话凭据的读取与回写
//!
//! 浏览器走 Cookie，脚本与测试客户端也可以用 `Authorization: Bearer`。

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, HeaderValue},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use config::SessionConfig;
use domain::{Principal, SessionCredentials, SessionToken};
use time::OffsetDateTime;

use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct SessionCookie {
    name: String,
    secure: bool,
}

impl SessionCookie {
    pub fn new(name: impl Into<String>, secure: bool) -> Self {
        Self {
            name: name.into(),
            secure,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.cookie_name.clone(), config.secure_cookie)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 先读 Cookie，没有再读 Bearer 头
    pub fn credentials(&self, headers: &HeaderMap) -> SessionCredentials {
        let from_cookie = CookieJar::from_headers(headers)
            .get(&self.name)
            .map(|cookie| cookie.value().to_owned())
            .filter(|value| !value.is_empty());

        let token = from_cookie.or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(|token| token.trim().to_owned())
                .filter(|token| !token.is_empty())
        });

        SessionCredentials::new(token)
    }

    /// Cookie 与令牌同时过期
    pub fn issue(&self, token: &SessionToken) -> Cookie<'static> {
        let expires = OffsetDateTime::from_unix_timestamp(token.expires_at.timestamp()).ok();
        Cookie::build((self.name.clone(), token.value.clone()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .expires(expires)
            .build()
    }

    pub fn clear(&self) -> Cookie<'static> {
        Cookie::build((self.name.clone(), "")).path("/").build()
    }

    pub fn header_value(&self, token: &SessionToken) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.issue(token).to_string()).ok()
    }
}

/// 网关放行时附加在请求上的身份
#[derive(Debug, Clone)]
pub struct CurrentPrincipal(pub Principal);

impl<S> FromRequestParts<S> for CurrentPrincipal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(CurrentPrincipal)
            .ok_or_else(|| ApiError::unauthorized("NO_SESSION"))
    }
}

/// 公开路由上的可选身份
#[derive(Debug, Clone)]
pub struct MaybePrincipal(pub Option<Principal>);

impl<S> FromRequestParts<S> for MaybePrincipal
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybePrincipal(parts.extensions.get::<Principal>().cloned()))
    }
}
