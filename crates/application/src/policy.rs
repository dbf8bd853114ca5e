//! 访问策略
//!
//! 纯函数，无副作用：管理员判定、路由分类、注册资格判定。

use std::collections::HashSet;

use domain::{Email, EmployeeRecord, EmployeeStatus, Principal};
use serde::Serialize;

/// 路由访问级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteClass {
    Public,
    RequiresSession,
    RequiresAdmin,
}

/// 登录页与静态资源永远公开，防止未登录重定向形成循环
const PUBLIC_PREFIXES: &[&str] = &["/login", "/auth", "/static", "/assets", "/health", "/favicon.ico"];
const ADMIN_PREFIXES: &[&str] = &["/admin", "/employees"];
const SESSION_PREFIXES: &[&str] = &["/channels"];

/// 按路径前缀（按段匹配）对路由分类，未列出的路径视为公开
pub fn route_class(path: &str) -> RouteClass {
    if PUBLIC_PREFIXES.iter().any(|prefix| has_prefix(path, prefix)) {
        return RouteClass::Public;
    }
    if ADMIN_PREFIXES.iter().any(|prefix| has_prefix(path, prefix)) {
        return RouteClass::RequiresAdmin;
    }
    if SESSION_PREFIXES.iter().any(|prefix| has_prefix(path, prefix)) {
        return RouteClass::RequiresSession;
    }
    RouteClass::Public
}

fn has_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// 注册被拒绝的原因码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    UnknownEmail,
    Disabled,
    AlreadyRegistered,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::UnknownEmail => "UNKNOWN_EMAIL",
            DenialReason::Disabled => "DISABLED",
            DenialReason::AlreadyRegistered => "ALREADY_REGISTERED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationDecision {
    Allowed,
    Denied(DenialReason),
}

/// 基于员工预登记记录判定注册资格。
///
/// 记录存在且状态为 pending / active 时允许；已关联身份的记录不能重复注册。
pub fn can_register(record: Option<&EmployeeRecord>) -> RegistrationDecision {
    match record {
        None => RegistrationDecision::Denied(DenialReason::UnknownEmail),
        Some(record) if record.status == EmployeeStatus::Disabled => {
            RegistrationDecision::Denied(DenialReason::Disabled)
        }
        Some(record) if record.is_linked() => {
            RegistrationDecision::Denied(DenialReason::AlreadyRegistered)
        }
        Some(_) => RegistrationDecision::Allowed,
    }
}

/// 进程级访问策略，管理员白名单在启动时加载一次，之后不可变
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    admin_emails: HashSet<String>,
}

impl AccessPolicy {
    pub fn new<I, S>(admin_emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let admin_emails = admin_emails
            .into_iter()
            .map(|email| Email::normalize(email.as_ref()))
            .filter(|email| !email.is_empty())
            .collect();
        Self { admin_emails }
    }

    pub fn is_admin(&self, principal: &Principal) -> bool {
        self.is_admin_email(principal.email.as_str())
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        self.admin_emails.contains(&Email::normalize(email))
    }

    pub fn route_class(&self, path: &str) -> RouteClass {
        route_class(path)
    }

    pub fn admin_count(&self) -> usize {
        self.admin_emails.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{EmployeeId, PrincipalId};
    use uuid::Uuid;

    fn principal(email: &str) -> Principal {
        Principal::new(PrincipalId::new("p-1"), Email::parse(email).unwrap(), Utc::now())
    }

    fn record(status: EmployeeStatus) -> EmployeeRecord {
        EmployeeRecord::pre_register(
            EmployeeId::from(Uuid::new_v4()),
            Email::parse("a@x.com").unwrap(),
            "Lee",
            None,
            status,
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn admin_allowlist_is_case_insensitive() {
        let policy = AccessPolicy::new([" Boss@Office.com ", "", "ops@office.com"]);
        assert_eq!(policy.admin_count(), 2);
        assert!(policy.is_admin(&principal("boss@office.com")));
        assert!(policy.is_admin_email("OPS@office.COM"));
        assert!(!policy.is_admin(&principal("intern@office.com")));
    }

    #[test]
    fn routes_are_classified_by_segment_prefix() {
        assert_eq!(route_class("/login"), RouteClass::Public);
        assert_eq!(route_class("/auth/signup"), RouteClass::Public);
        assert_eq!(route_class("/static/app.js"), RouteClass::Public);
        assert_eq!(route_class("/"), RouteClass::Public);
        assert_eq!(route_class("/channels"), RouteClass::RequiresSession);
        assert_eq!(route_class("/channels/42/messages"), RouteClass::RequiresSession);
        assert_eq!(route_class("/channelsX"), RouteClass::Public);
        assert_eq!(route_class("/admin/employees"), RouteClass::RequiresAdmin);
        assert_eq!(route_class("/employees/7"), RouteClass::RequiresAdmin);
    }

    #[test]
    fn registration_requires_non_disabled_unlinked_record() {
        assert_eq!(
            can_register(None),
            RegistrationDecision::Denied(DenialReason::UnknownEmail)
        );
        assert_eq!(
            can_register(Some(&record(EmployeeStatus::Disabled))),
            RegistrationDecision::Denied(DenialReason::Disabled)
        );
        assert_eq!(
            can_register(Some(&record(EmployeeStatus::Pending))),
            RegistrationDecision::Allowed
        );
        assert_eq!(
            can_register(Some(&record(EmployeeStatus::Active))),
            RegistrationDecision::Allowed
        );

        let mut linked = record(EmployeeStatus::Active);
        linked.linked_principal_id = Some(PrincipalId::new("p-9"));
        assert_eq!(
            can_register(Some(&linked)),
            RegistrationDecision::Denied(DenialReason::AlreadyRegistered)
        );
    }
}
