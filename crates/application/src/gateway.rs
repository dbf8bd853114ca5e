//! 请求网关判定
//!
//! 每个入站请求都经过这里：路由分类 → 会话验证 → 管理员校验 → 放行 / 重定向 / 拒绝。
//! 网关自身不修改任何状态，同一请求配同一有效会话总是得到相同判定。

use std::sync::Arc;

use domain::{IdentityProvider, Principal, SessionCredentials, SessionToken};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::{
    error::ApplicationError,
    policy::{AccessPolicy, RouteClass},
    retry::retry_read_once,
};

/// 登录入口
pub const LOGIN_PATH: &str = "/login";

const NEXT_PARAM: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// 放行；受保护路由一定带有身份
    Forward { principal: Option<Principal> },
    /// 未登录，跳转到登录页并带上原路径
    RedirectToLogin { location: String },
    /// 已登录但不是管理员
    AdminOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayDecision {
    pub outcome: GatewayOutcome,
    /// 身份服务刷新过的令牌，无论最终结果如何都要回写给客户端
    pub refreshed: Option<SessionToken>,
}

pub struct RequestGateway {
    identity: Arc<dyn IdentityProvider>,
    policy: Arc<AccessPolicy>,
}

impl RequestGateway {
    pub fn new(identity: Arc<dyn IdentityProvider>, policy: Arc<AccessPolicy>) -> Self {
        Self { identity, policy }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    pub async fn decide(
        &self,
        path: &str,
        credentials: &SessionCredentials,
    ) -> Result<GatewayDecision, ApplicationError> {
        let class = self.policy.route_class(path);

        if class == RouteClass::Public {
            return Ok(self.decide_public(credentials).await);
        }

        let verification = if credentials.is_empty() {
            Default::default()
        } else {
            retry_read_once("verify_session", || self.identity.verify_session(credentials)).await?
        };
        let refreshed = verification.refreshed;

        let Some(principal) = verification.principal else {
            tracing::debug!(path, "no session, redirecting to login");
            return Ok(GatewayDecision {
                outcome: GatewayOutcome::RedirectToLogin {
                    location: login_redirect(path),
                },
                refreshed,
            });
        };

        if class == RouteClass::RequiresAdmin && !self.policy.is_admin(&principal) {
            tracing::info!(
                path,
                principal_id = %principal.id,
                "admin route denied for non-admin principal"
            );
            return Ok(GatewayDecision {
                outcome: GatewayOutcome::AdminOnly,
                refreshed,
            });
        }

        Ok(GatewayDecision {
            outcome: GatewayOutcome::Forward {
                principal: Some(principal),
            },
            refreshed,
        })
    }

    /// 公开路由无条件放行；带凭据时顺便验证，以便处理器拿到身份并回写刷新令牌
    async fn decide_public(&self, credentials: &SessionCredentials) -> GatewayDecision {
        if credentials.is_empty() {
            return GatewayDecision {
                outcome: GatewayOutcome::Forward { principal: None },
                refreshed: None,
            };
        }

        match self.identity.verify_session(credentials).await {
            Ok(verification) => GatewayDecision {
                outcome: GatewayOutcome::Forward {
                    principal: verification.principal,
                },
                refreshed: verification.refreshed,
            },
            Err(err) => {
                tracing::warn!(error = %err, "session verification failed on public route");
                GatewayDecision {
                    outcome: GatewayOutcome::Forward { principal: None },
                    refreshed: None,
                }
            }
        }
    }
}

/// 构造登录跳转地址，`next` 只接受站内绝对路径
pub fn login_redirect(path: &str) -> String {
    let next = sanitize_next(path);
    format!(
        "{}?next={}",
        LOGIN_PATH,
        utf8_percent_encode(next, NEXT_PARAM)
    )
}

/// 过滤开放重定向：非 `/` 开头或以 `//` 开头的目标一律回落到 `/`
pub fn sanitize_next(path: &str) -> &str {
    if path.starts_with('/') && !path.starts_with("//") && !path.starts_with("/\\") {
        path
    } else {
        "/"
    }
}
