use std::sync::Arc;

use domain::{
    Email, EmployeeRecord, EmployeeRepository, IdentityProvider, PrincipalId, SignupProfile,
};

use crate::{
    clock::Clock,
    error::ApplicationError,
    policy::{self, DenialReason, RegistrationDecision},
    retry::retry_read_once,
};

pub const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Debug, Clone)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub profile: SignupProfile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredEmployee {
    pub principal_id: PrincipalId,
    pub employee: EmployeeRecord,
}

pub struct RegistrationServiceDependencies {
    pub employee_repository: Arc<dyn EmployeeRepository>,
    pub identity_provider: Arc<dyn IdentityProvider>,
    pub clock: Arc<dyn Clock>,
}

/// 员工自助注册：资格校验 → 创建外部账号 → 关联员工记录
pub struct RegistrationService {
    deps: RegistrationServiceDependencies,
}

impl RegistrationService {
    pub fn new(deps: RegistrationServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn can_register(&self, email: &Email) -> Result<RegistrationDecision, ApplicationError> {
        let record = self.find_record(email).await?;
        Ok(policy::can_register(record.as_ref()))
    }

    pub async fn register(
        &self,
        request: SignupRequest,
    ) -> Result<RegisteredEmployee, ApplicationError> {
        let email = Email::parse(&request.email)?;
        if request.password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(ApplicationError::validation(format!(
                "password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }
        request.profile.validate()?;

        let record = self.find_record(&email).await?;
        let record = match (policy::can_register(record.as_ref()), record) {
            (RegistrationDecision::Allowed, Some(record)) => record,
            (RegistrationDecision::Denied(reason), _) => {
                tracing::info!(email = %email, reason = reason.code(), "signup denied");
                return Err(ApplicationError::Registration(reason));
            }
            (RegistrationDecision::Allowed, None) => {
                return Err(ApplicationError::Registration(DenialReason::UnknownEmail));
            }
        };

        // 账号创建不是幂等操作，失败直接返回，不重试
        let principal_id = self
            .deps
            .identity_provider
            .create_account(&email, &request.password)
            .await
            .inspect_err(|err| {
                tracing::error!(email = %email, error = %err, "account creation failed");
            })?;

        // 条件写入：只在记录仍未关联时关联，期间被停用的记录保持停用
        let linked = self
            .deps
            .employee_repository
            .link_principal(
                record.id,
                principal_id.clone(),
                request.profile,
                self.deps.clock.now(),
            )
            .await;
        match linked {
            Ok(employee) => {
                tracing::info!(
                    email = %email,
                    principal_id = %principal_id,
                    status = employee.status.as_str(),
                    "employee registered"
                );
                Ok(RegisteredEmployee {
                    principal_id,
                    employee,
                })
            }
            Err(err) => Err(self.link_failed(&email, principal_id, err.to_string())),
        }
    }

    async fn find_record(&self, email: &Email) -> Result<Option<EmployeeRecord>, ApplicationError> {
        let record = retry_read_once("find_employee_by_email", || {
            self.deps.employee_repository.find_by_email(email)
        })
        .await?;
        Ok(record)
    }

    fn link_failed(
        &self,
        email: &Email,
        principal_id: PrincipalId,
        message: String,
    ) -> ApplicationError {
        tracing::error!(
            email = %email,
            principal_id = %principal_id,
            error = %message,
            "account created but employee record was not linked"
        );
        ApplicationError::PartialLinkFailure {
            principal_id,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use chrono::Utc;
    use domain::{
        EmployeeId, EmployeeStatus, IdentityError, MockEmployeeRepository, MockIdentityProvider,
        RepositoryError,
    };
    use std::sync::Mutex;
    use uuid::Uuid;

    fn record(email: &str, status: EmployeeStatus) -> EmployeeRecord {
        EmployeeRecord::pre_register(
            EmployeeId::from(Uuid::new_v4()),
            Email::parse(email).unwrap(),
            "Park Jiwoo",
            None,
            status,
            Utc::now(),
        )
        .unwrap()
    }

    fn request(email: &str) -> SignupRequest {
        SignupRequest {
            email: email.to_string(),
            password: "secret123".to_string(),
            profile: SignupProfile {
                full_name: Some("Park J.".to_string()),
                phone: Some("010-0000-0000".to_string()),
            },
        }
    }

    fn service(
        employees: MockEmployeeRepository,
        identity: MockIdentityProvider,
    ) -> RegistrationService {
        RegistrationService::new(RegistrationServiceDependencies {
            employee_repository: Arc::new(employees),
            identity_provider: Arc::new(identity),
            clock: Arc::new(SystemClock),
        })
    }

    #[tokio::test]
    async fn unknown_email_is_denied_without_creating_account() {
        let mut employees = MockEmployeeRepository::new();
        employees.expect_find_by_email().returning(|_| Ok(None));
        let mut identity = MockIdentityProvider::new();
        identity.expect_create_account().times(0);

        let result = service(employees, identity).register(request("who@x.com")).await;
        assert!(matches!(
            result,
            Err(ApplicationError::Registration(DenialReason::UnknownEmail))
        ));
    }

    #[tokio::test]
    async fn disabled_record_is_denied_without_creating_account() {
        let mut employees = MockEmployeeRepository::new();
        employees
            .expect_find_by_email()
            .returning(|email| Ok(Some(record(email.as_str(), EmployeeStatus::Disabled))));
        let mut identity = MockIdentityProvider::new();
        identity.expect_create_account().times(0);

        let result = service(employees, identity).register(request("b@x.com")).await;
        assert!(matches!(
            result,
            Err(ApplicationError::Registration(DenialReason::Disabled))
        ));
    }

    #[tokio::test]
    async fn short_password_is_rejected_before_any_lookup() {
        let mut employees = MockEmployeeRepository::new();
        employees.expect_find_by_email().times(0);
        let mut identity = MockIdentityProvider::new();
        identity.expect_create_account().times(0);

        let mut signup = request("a@x.com");
        signup.password = "12345".to_string();
        let result = service(employees, identity).register(signup).await;
        assert!(matches!(result, Err(ApplicationError::Validation(_))));
    }

    #[tokio::test]
    async fn pending_record_becomes_active_and_second_attempt_is_denied() {
        let stored = Arc::new(Mutex::new(record("a@x.com", EmployeeStatus::Pending)));

        let mut employees = MockEmployeeRepository::new();
        let lookup = Arc::clone(&stored);
        employees
            .expect_find_by_email()
            .returning(move |_| Ok(Some(lookup.lock().unwrap().clone())));
        let saved = Arc::clone(&stored);
        employees
            .expect_link_principal()
            .times(1)
            .returning(move |_, principal_id, profile, now| {
                let mut record = saved.lock().unwrap();
                if record.is_linked() {
                    return Err(RepositoryError::Conflict);
                }
                record.link_principal(principal_id, &profile, now)?;
                Ok(record.clone())
            });

        let mut identity = MockIdentityProvider::new();
        identity
            .expect_create_account()
            .times(1)
            .returning(|_, _| Ok(PrincipalId::new("p-42")));

        let service = service(employees, identity);
        let registered = service.register(request(" A@X.com ")).await.unwrap();

        assert_eq!(registered.principal_id, PrincipalId::new("p-42"));
        assert_eq!(registered.employee.status, EmployeeStatus::Active);
        assert_eq!(registered.employee.full_name, "Park J.");
        assert_eq!(
            registered.employee.linked_principal_id,
            Some(PrincipalId::new("p-42"))
        );

        let again = service.register(request("a@x.com")).await;
        assert!(matches!(
            again,
            Err(ApplicationError::Registration(DenialReason::AlreadyRegistered))
        ));
    }

    #[tokio::test]
    async fn failed_link_reports_partial_failure() {
        let mut employees = MockEmployeeRepository::new();
        employees
            .expect_find_by_email()
            .returning(|email| Ok(Some(record(email.as_str(), EmployeeStatus::Pending))));
        employees
            .expect_link_principal()
            .returning(|_, _, _, _| Err(RepositoryError::storage("write timeout")));

        let mut identity = MockIdentityProvider::new();
        identity
            .expect_create_account()
            .times(1)
            .returning(|_, _| Ok(PrincipalId::new("p-7")));

        let result = service(employees, identity).register(request("a@x.com")).await;
        match result {
            Err(ApplicationError::PartialLinkFailure { principal_id, .. }) => {
                assert_eq!(principal_id, PrincipalId::new("p-7"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn record_linked_by_a_concurrent_signup_is_not_overwritten() {
        let mut employees = MockEmployeeRepository::new();
        employees
            .expect_find_by_email()
            .returning(|email| Ok(Some(record(email.as_str(), EmployeeStatus::Pending))));
        employees
            .expect_link_principal()
            .times(1)
            .returning(|_, _, _, _| Err(RepositoryError::Conflict));

        let mut identity = MockIdentityProvider::new();
        identity
            .expect_create_account()
            .returning(|_, _| Ok(PrincipalId::new("p-8")));

        let result = service(employees, identity).register(request("a@x.com")).await;
        assert!(matches!(
            result,
            Err(ApplicationError::PartialLinkFailure { ref principal_id, .. })
                if *principal_id == PrincipalId::new("p-8")
        ));
    }

    #[tokio::test]
    async fn account_creation_is_not_retried() {
        let mut employees = MockEmployeeRepository::new();
        employees
            .expect_find_by_email()
            .returning(|email| Ok(Some(record(email.as_str(), EmployeeStatus::Active))));
        employees.expect_link_principal().times(0);

        let mut identity = MockIdentityProvider::new();
        identity
            .expect_create_account()
            .times(1)
            .returning(|_, _| Err(IdentityError::upstream("503")));

        let result = service(employees, identity).register(request("a@x.com")).await;
        assert!(matches!(result, Err(ref err) if err.is_upstream()));
    }

    #[tokio::test]
    async fn can_register_reports_decision() {
        let mut employees = MockEmployeeRepository::new();
        employees
            .expect_find_by_email()
            .returning(|email| Ok(Some(record(email.as_str(), EmployeeStatus::Pending))));

        let decision = service(employees, MockIdentityProvider::new())
            .can_register(&Email::parse("a@x.com").unwrap())
            .await
            .unwrap();
        assert_eq!(decision, RegistrationDecision::Allowed);
    }
}
