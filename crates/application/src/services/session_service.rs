use std::sync::Arc;

use domain::{
    Email, EmployeeRepository, EmployeeStatus, IdentityError, IdentityProvider,
    SessionCredentials, SignedIn,
};

use crate::{error::ApplicationError, retry::retry_read_once};

/// 员工记录已停用时的登录拒绝码
pub const ACCOUNT_DISABLED: &str = "DISABLED";

/// 登录与登出；登录额外校验员工记录未被停用
pub struct SessionService {
    identity: Arc<dyn IdentityProvider>,
    employee_repository: Arc<dyn EmployeeRepository>,
}

impl SessionService {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        employee_repository: Arc<dyn EmployeeRepository>,
    ) -> Self {
        Self {
            identity,
            employee_repository,
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<SignedIn, ApplicationError> {
        // 格式非法的邮箱与错误密码返回同样的结果
        let email = Email::parse(email).map_err(|_| IdentityError::InvalidCredentials)?;

        let signed_in = match self.identity.sign_in(&email, password).await {
            Ok(signed_in) => signed_in,
            Err(IdentityError::InvalidCredentials) => {
                tracing::info!(email = %email, "sign-in rejected");
                return Err(IdentityError::InvalidCredentials.into());
            }
            Err(err) => {
                tracing::error!(email = %email, error = %err, "sign-in failed upstream");
                return Err(err.into());
            }
        };

        // 密码校验通过后才检查停用状态，未下发的令牌直接丢弃
        let record = retry_read_once("find_employee_by_email", || {
            self.employee_repository.find_by_email(&email)
        })
        .await?;
        if record.is_some_and(|record| record.status == EmployeeStatus::Disabled) {
            tracing::warn!(email = %email, "sign-in refused for disabled employee");
            return Err(ApplicationError::Forbidden(ACCOUNT_DISABLED));
        }

        tracing::info!(principal_id = %signed_in.principal.id, "signed in");
        Ok(signed_in)
    }

    /// 无会话时是无操作
    pub async fn logout(&self, credentials: &SessionCredentials) -> Result<(), ApplicationError> {
        if credentials.is_empty() {
            return Ok(());
        }
        self.identity.sign_out(credentials).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{
        EmployeeId, EmployeeRecord, MockEmployeeRepository, MockIdentityProvider, Principal,
        PrincipalId, SessionToken,
    };
    use uuid::Uuid;

    fn service(
        identity: MockIdentityProvider,
        employees: MockEmployeeRepository,
    ) -> SessionService {
        SessionService::new(Arc::new(identity), Arc::new(employees))
    }

    fn signs_in(identity: &mut MockIdentityProvider) {
        identity.expect_sign_in().returning(|email, _| {
            Ok(SignedIn {
                principal: Principal::new(PrincipalId::new("p-1"), email.clone(), Utc::now()),
                token: SessionToken {
                    value: "jwt".to_string(),
                    expires_at: Utc::now(),
                },
            })
        });
    }

    fn employee(email: &Email, status: EmployeeStatus) -> EmployeeRecord {
        EmployeeRecord::pre_register(
            EmployeeId::from(Uuid::new_v4()),
            email.clone(),
            "Jung Hana",
            None,
            status,
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn malformed_email_is_invalid_credentials_without_provider_call() {
        let mut identity = MockIdentityProvider::new();
        identity.expect_sign_in().times(0);

        let result = service(identity, MockEmployeeRepository::new())
            .login("not-an-email", "secret123")
            .await;
        assert!(matches!(
            result,
            Err(ApplicationError::Identity(IdentityError::InvalidCredentials))
        ));
    }

    #[tokio::test]
    async fn login_returns_principal_and_token() {
        let mut identity = MockIdentityProvider::new();
        signs_in(&mut identity);
        let mut employees = MockEmployeeRepository::new();
        employees
            .expect_find_by_email()
            .returning(|email| Ok(Some(employee(email, EmployeeStatus::Active))));

        let signed_in = service(identity, employees)
            .login(" A@X.com", "secret123")
            .await
            .unwrap();
        assert_eq!(signed_in.principal.email.as_str(), "a@x.com");
    }

    #[tokio::test]
    async fn disabled_employee_cannot_sign_in() {
        let mut identity = MockIdentityProvider::new();
        signs_in(&mut identity);
        let mut employees = MockEmployeeRepository::new();
        employees
            .expect_find_by_email()
            .returning(|email| Ok(Some(employee(email, EmployeeStatus::Disabled))));

        let result = service(identity, employees).login("a@x.com", "secret123").await;
        assert!(matches!(
            result,
            Err(ApplicationError::Forbidden(ACCOUNT_DISABLED))
        ));
    }

    #[tokio::test]
    async fn wrong_password_never_reveals_disabled_status() {
        let mut identity = MockIdentityProvider::new();
        identity
            .expect_sign_in()
            .returning(|_, _| Err(IdentityError::InvalidCredentials));
        let mut employees = MockEmployeeRepository::new();
        employees.expect_find_by_email().times(0);

        let result = service(identity, employees).login("a@x.com", "wrong").await;
        assert!(matches!(
            result,
            Err(ApplicationError::Identity(IdentityError::InvalidCredentials))
        ));
    }

    #[tokio::test]
    async fn logout_without_session_skips_provider() {
        let mut identity = MockIdentityProvider::new();
        identity.expect_sign_out().times(0);

        service(identity, MockEmployeeRepository::new())
            .logout(&SessionCredentials::none())
            .await
            .unwrap();
    }
}
