use std::sync::Arc;

use application::{
    AccessPolicy, EmployeeService, RegistrationService, RegistrationServiceDependencies,
    SignupRequest, SystemClock,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use config::AppConfig;
use domain::{
    Email, EmployeeId, EmployeeRecord, EmployeeRepository, EmployeeStatus, EmployeeUpdate,
    IdentityError, IdentityProvider, Principal, PrincipalId, SessionCredentials,
    SessionVerification, SignedIn, SignupProfile,
};
use infrastructure::{Infrastructure, Storage};
use uuid::Uuid;

const ADMIN_EMAIL: &str = "boss@office.com";

/// 在创建账号期间，由管理员停用目标员工记录
struct DisableWhileCreating {
    inner: Arc<dyn IdentityProvider>,
    employees: Arc<EmployeeService>,
    target: EmployeeId,
}

#[async_trait]
impl IdentityProvider for DisableWhileCreating {
    async fn verify_session(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<SessionVerification, IdentityError> {
        self.inner.verify_session(credentials).await
    }

    async fn create_account(
        &self,
        email: &Email,
        password: &str,
    ) -> Result<PrincipalId, IdentityError> {
        self.employees
            .update(
                &admin(),
                self.target,
                EmployeeUpdate {
                    status: Some(EmployeeStatus::Disabled),
                    ..EmployeeUpdate::default()
                },
            )
            .await
            .expect("admin disables record");
        self.inner.create_account(email, password).await
    }

    async fn sign_in(&self, email: &Email, password: &str) -> Result<SignedIn, IdentityError> {
        self.inner.sign_in(email, password).await
    }

    async fn sign_out(&self, credentials: &SessionCredentials) -> Result<(), IdentityError> {
        self.inner.sign_out(credentials).await
    }
}

fn admin() -> Principal {
    Principal::new(
        PrincipalId::new("admin"),
        Email::parse(ADMIN_EMAIL).unwrap(),
        Utc::now() + Duration::hours(1),
    )
}

#[tokio::test]
async fn disabling_during_signup_is_not_reverted() {
    let mut config = AppConfig::default();
    config.bcrypt_cost = Some(4);
    let storage = Storage::in_memory();
    let infrastructure = Infrastructure::with_storage(storage.clone(), &config);

    let record = storage
        .employees
        .create(
            EmployeeRecord::pre_register(
                EmployeeId::from(Uuid::new_v4()),
                Email::parse("kim@office.com").unwrap(),
                "Kim Minsu",
                None,
                EmployeeStatus::Pending,
                Utc::now(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let employees = Arc::new(EmployeeService::new(
        storage.employees.clone(),
        Arc::new(AccessPolicy::new([ADMIN_EMAIL])),
        Arc::new(SystemClock),
    ));
    let registration = RegistrationService::new(RegistrationServiceDependencies {
        employee_repository: storage.employees.clone(),
        identity_provider: Arc::new(DisableWhileCreating {
            inner: infrastructure.identity_provider.clone(),
            employees,
            target: record.id,
        }),
        clock: Arc::new(SystemClock),
    });

    let registered = registration
        .register(SignupRequest {
            email: "kim@office.com".into(),
            password: "secret123".into(),
            profile: SignupProfile::default(),
        })
        .await
        .unwrap();
    assert_eq!(registered.employee.status, EmployeeStatus::Disabled);

    let stored = storage
        .employees
        .find_by_id(record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, EmployeeStatus::Disabled);
    assert_eq!(stored.linked_principal_id, Some(registered.principal_id));
}
