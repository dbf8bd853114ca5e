use std::sync::Arc;

use domain::{
    Email, EmployeeId, EmployeeRecord, EmployeeRepository, EmployeeStatus, EmployeeUpdate,
    Principal, RepositoryError,
};
use uuid::Uuid;

use crate::{clock::Clock, error::ApplicationError, policy::AccessPolicy, retry::retry_read_once};

pub const ADMIN_ONLY: &str = "ADMIN_ONLY";

#[derive(Debug, Clone)]
pub struct PreRegisterEmployeeRequest {
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    /// 缺省为 pending
    pub status: Option<EmployeeStatus>,
}

/// 员工预登记管理，仅限管理员
pub struct EmployeeService {
    employee_repository: Arc<dyn EmployeeRepository>,
    policy: Arc<AccessPolicy>,
    clock: Arc<dyn Clock>,
}

impl EmployeeService {
    pub fn new(
        employee_repository: Arc<dyn EmployeeRepository>,
        policy: Arc<AccessPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            employee_repository,
            policy,
            clock,
        }
    }

    pub async fn list(&self, actor: &Principal) -> Result<Vec<EmployeeRecord>, ApplicationError> {
        self.ensure_admin(actor)?;
        let records = retry_read_once("list_employees", || self.employee_repository.list()).await?;
        Ok(records)
    }

    pub async fn pre_register(
        &self,
        actor: &Principal,
        request: PreRegisterEmployeeRequest,
    ) -> Result<EmployeeRecord, ApplicationError> {
        self.ensure_admin(actor)?;

        let record = EmployeeRecord::pre_register(
            EmployeeId::from(Uuid::new_v4()),
            Email::parse(&request.email)?,
            &request.full_name,
            request.phone.as_deref(),
            request.status.unwrap_or(EmployeeStatus::Pending),
            self.clock.now(),
        )?;

        let created = self.employee_repository.create(record).await?;
        tracing::info!(
            actor = %actor.email,
            employee_id = %created.id,
            email = %created.email,
            "employee pre-registered"
        );
        Ok(created)
    }

    pub async fn update(
        &self,
        actor: &Principal,
        id: EmployeeId,
        update: EmployeeUpdate,
    ) -> Result<EmployeeRecord, ApplicationError> {
        self.ensure_admin(actor)?;
        if update.is_empty() {
            return Err(ApplicationError::validation("no fields to update"));
        }

        let update = update.normalize()?;
        let status_changed = update.status;
        let updated = self
            .employee_repository
            .apply_update(id, update, self.clock.now())
            .await
            .map_err(not_found_as_employee)?;
        if let Some(status) = status_changed {
            tracing::info!(
                actor = %actor.email,
                employee_id = %id,
                status = status.as_str(),
                "employee status changed"
            );
        }
        Ok(updated)
    }

    pub async fn delete(&self, actor: &Principal, id: EmployeeId) -> Result<(), ApplicationError> {
        self.ensure_admin(actor)?;
        self.employee_repository
            .delete(id)
            .await
            .map_err(not_found_as_employee)?;
        tracing::info!(actor = %actor.email, employee_id = %id, "employee record deleted");
        Ok(())
    }

    fn ensure_admin(&self, actor: &Principal) -> Result<(), ApplicationError> {
        if self.policy.is_admin(actor) {
            Ok(())
        } else {
            tracing::warn!(principal_id = %actor.id, "employee administration denied");
            Err(ApplicationError::Forbidden(ADMIN_ONLY))
        }
    }
}

fn not_found_as_employee(err: RepositoryError) -> ApplicationError {
    match err {
        RepositoryError::NotFound => ApplicationError::NotFound("EMPLOYEE"),
        other => other.into(),
    }
}
