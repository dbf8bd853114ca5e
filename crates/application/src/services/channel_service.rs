use std::sync::Arc;

use domain::{
    Channel, ChannelId, ChannelRepository, Email, EmployeeRepository, EmployeeStatus, Membership,
    MembershipRole, Principal,
};
use uuid::Uuid;

use crate::{
    clock::Clock, error::ApplicationError, membership::MembershipDirectory,
    retry::retry_read_once,
};

#[derive(Debug, Clone)]
pub struct CreateChannelRequest {
    pub name: String,
    pub is_private: bool,
}

/// 只有频道 owner 能添加成员
pub const CHANNEL_OWNER_ONLY: &str = "CHANNEL_OWNER_ONLY";

pub struct ChannelServiceDependencies {
    pub channel_repository: Arc<dyn ChannelRepository>,
    pub employee_repository: Arc<dyn EmployeeRepository>,
    pub membership_directory: MembershipDirectory,
    pub clock: Arc<dyn Clock>,
}

pub struct ChannelService {
    deps: ChannelServiceDependencies,
}

impl ChannelService {
    pub fn new(deps: ChannelServiceDependencies) -> Self {
        Self { deps }
    }

    /// 调用者所属的全部频道，按创建时间正序
    pub async fn list_channels(&self, principal: &Principal) -> Result<Vec<Channel>, ApplicationError> {
        let mut ids: Vec<ChannelId> = self
            .deps
            .membership_directory
            .channels_for(&principal.id)
            .await?
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        ids.sort();

        let channels = retry_read_once("list_channels", || {
            self.deps.channel_repository.list_by_ids(&ids)
        })
        .await?;
        Ok(channels)
    }

    /// 创建频道，创建者同时成为 owner
    pub async fn create_channel(
        &self,
        principal: &Principal,
        request: CreateChannelRequest,
    ) -> Result<Channel, ApplicationError> {
        let now = self.deps.clock.now();
        let channel = Channel::new(
            ChannelId::from(Uuid::new_v4()),
            &request.name,
            request.is_private,
            principal.id.clone(),
            now,
        )?;
        let owner = Membership::owner(channel.id, principal.id.clone(), now);

        let created = self
            .deps
            .channel_repository
            .create_with_owner(channel, owner)
            .await?;
        tracing::info!(
            channel_id = %created.id,
            principal_id = %principal.id,
            is_private = created.is_private,
            "channel created"
        );
        Ok(created)
    }

    pub async fn get_channel(
        &self,
        principal: &Principal,
        channel_id: ChannelId,
    ) -> Result<Channel, ApplicationError> {
        self.deps
            .membership_directory
            .require_member(&principal.id, channel_id)
            .await?;
        retry_read_once("find_channel", || {
            self.deps.channel_repository.find_by_id(channel_id)
        })
        .await?
        .ok_or(ApplicationError::NotFound("CHANNEL"))
    }

    /// owner 按邮箱把已注册的员工加入频道
    pub async fn add_member(
        &self,
        principal: &Principal,
        channel_id: ChannelId,
        email: &str,
    ) -> Result<Membership, ApplicationError> {
        let role = self
            .deps
            .membership_directory
            .require_member(&principal.id, channel_id)
            .await?;
        if role != MembershipRole::Owner {
            return Err(ApplicationError::Forbidden(CHANNEL_OWNER_ONLY));
        }

        let email = Email::parse(email)?;
        let record = retry_read_once("find_employee_by_email", || {
            self.deps.employee_repository.find_by_email(&email)
        })
        .await?;
        let member_id = match record {
            Some(record) if record.status != EmployeeStatus::Disabled => record
                .linked_principal_id
                .ok_or(ApplicationError::NotFound("EMPLOYEE"))?,
            _ => return Err(ApplicationError::NotFound("EMPLOYEE")),
        };

        let membership = self
            .deps
            .membership_directory
            .grant(Membership::new(
                channel_id,
                member_id,
                MembershipRole::Member,
                self.deps.clock.now(),
            ))
            .await?;
        tracing::info!(
            channel_id = %channel_id,
            principal_id = %membership.principal_id,
            added_by = %principal.id,
            "channel member added"
        );
        Ok(membership)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use chrono::Utc;
    use domain::{
        EmployeeId, EmployeeRecord, MockChannelRepository, MockEmployeeRepository,
        MockMembershipRepository, PrincipalId,
    };

    fn principal() -> Principal {
        Principal::new(PrincipalId::new("p-1"), Email::parse("a@x.com").unwrap(), Utc::now())
    }

    fn service(
        channels: MockChannelRepository,
        memberships: MockMembershipRepository,
    ) -> ChannelService {
        service_with_employees(channels, memberships, MockEmployeeRepository::new())
    }

    fn service_with_employees(
        channels: MockChannelRepository,
        memberships: MockMembershipRepository,
        employees: MockEmployeeRepository,
    ) -> ChannelService {
        ChannelService::new(ChannelServiceDependencies {
            channel_repository: Arc::new(channels),
            employee_repository: Arc::new(employees),
            membership_directory: MembershipDirectory::new(Arc::new(memberships)),
            clock: Arc::new(SystemClock),
        })
    }

    #[tokio::test]
    async fn creator_becomes_owner() {
        let mut channels = MockChannelRepository::new();
        channels
            .expect_create_with_owner()
            .withf(|channel, owner| {
                owner.channel_id == channel.id
                    && owner.principal_id == channel.created_by
                    && owner.role == MembershipRole::Owner
            })
            .returning(|channel, _| Ok(channel));

        let created = service(channels, MockMembershipRepository::new())
            .create_channel(
                &principal(),
                CreateChannelRequest {
                    name: " 공지 ".to_string(),
                    is_private: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(created.name, "공지");
        assert_eq!(created.created_by, PrincipalId::new("p-1"));
    }

    #[tokio::test]
    async fn blank_name_is_rejected() {
        let mut channels = MockChannelRepository::new();
        channels.expect_create_with_owner().times(0);

        let result = service(channels, MockMembershipRepository::new())
            .create_channel(
                &principal(),
                CreateChannelRequest {
                    name: "   ".to_string(),
                    is_private: true,
                },
            )
            .await;
        assert!(matches!(result, Err(ApplicationError::Domain(_))));
    }

    #[tokio::test]
    async fn no_memberships_means_no_channel_lookup() {
        let mut memberships = MockMembershipRepository::new();
        memberships.expect_list_for_principal().returning(|_| Ok(Vec::new()));
        let mut channels = MockChannelRepository::new();
        channels.expect_list_by_ids().times(0);

        let listed = service(channels, memberships)
            .list_channels(&principal())
            .await
            .unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn non_member_cannot_read_channel() {
        let mut memberships = MockMembershipRepository::new();
        memberships.expect_find().returning(|_, _| Ok(None));
        let mut channels = MockChannelRepository::new();
        channels.expect_find_by_id().times(0);

        let result = service(channels, memberships)
            .get_channel(&principal(), ChannelId::from(Uuid::new_v4()))
            .await;
        assert!(matches!(result, Err(ApplicationError::Forbidden(_))));
    }

    fn linked_employee(email: &str, status: EmployeeStatus) -> EmployeeRecord {
        let mut record = EmployeeRecord::pre_register(
            EmployeeId::from(Uuid::new_v4()),
            Email::parse(email).unwrap(),
            "Kim",
            None,
            status,
            Utc::now(),
        )
        .unwrap();
        record.linked_principal_id = Some(PrincipalId::new("p-2"));
        record
    }

    #[tokio::test]
    async fn owner_adds_registered_employee_as_member() {
        let mut memberships = MockMembershipRepository::new();
        memberships.expect_find().returning(|channel_id, principal| {
            if principal.as_str() == "p-1" {
                Ok(Some(Membership::owner(channel_id, principal.clone(), Utc::now())))
            } else {
                Ok(None)
            }
        });
        memberships
            .expect_upsert()
            .withf(|membership| {
                membership.principal_id.as_str() == "p-2"
                    && membership.role == MembershipRole::Member
            })
            .times(1)
            .returning(Ok);
        let mut employees = MockEmployeeRepository::new();
        employees
            .expect_find_by_email()
            .returning(|email| Ok(Some(linked_employee(email.as_str(), EmployeeStatus::Active))));

        let membership = service_with_employees(MockChannelRepository::new(), memberships, employees)
            .add_member(&principal(), ChannelId::from(Uuid::new_v4()), "kim@x.com")
            .await
            .unwrap();
        assert_eq!(membership.principal_id, PrincipalId::new("p-2"));
    }

    #[tokio::test]
    async fn plain_member_cannot_add_members() {
        let mut memberships = MockMembershipRepository::new();
        memberships.expect_find().returning(|channel_id, principal| {
            Ok(Some(Membership::new(
                channel_id,
                principal.clone(),
                MembershipRole::Member,
                Utc::now(),
            )))
        });
        memberships.expect_upsert().times(0);

        let result = service(MockChannelRepository::new(), memberships)
            .add_member(&principal(), ChannelId::from(Uuid::new_v4()), "kim@x.com")
            .await;
        assert!(matches!(
            result,
            Err(ApplicationError::Forbidden(CHANNEL_OWNER_ONLY))
        ));
    }

    #[tokio::test]
    async fn disabled_or_unlinked_employee_is_not_found() {
        for record in [
            linked_employee("kim@x.com", EmployeeStatus::Disabled),
            EmployeeRecord::pre_register(
                EmployeeId::from(Uuid::new_v4()),
                Email::parse("kim@x.com").unwrap(),
                "Kim",
                None,
                EmployeeStatus::Pending,
                Utc::now(),
            )
            .unwrap(),
        ] {
            let mut memberships = MockMembershipRepository::new();
            memberships.expect_find().returning(|channel_id, principal| {
                Ok(Some(Membership::owner(channel_id, principal.clone(), Utc::now())))
            });
            memberships.expect_upsert().times(0);
            let mut employees = MockEmployeeRepository::new();
            employees
                .expect_find_by_email()
                .returning(move |_| Ok(Some(record.clone())));

            let result = service_with_employees(MockChannelRepository::new(), memberships, employees)
                .add_member(&principal(), ChannelId::from(Uuid::new_v4()), "kim@x.com")
                .await;
            assert!(matches!(result, Err(ApplicationError::NotFound("EMPLOYEE"))));
        }
    }
}
