use std::{sync::Arc, time::Duration};

use application::{
    AccessPolicy, ChannelSequencer, ChannelService, ChannelServiceDependencies, Clock,
    EmployeeService, FanoutConfig, FanoutEngine, HistoryLimits, MembershipDirectory,
    MessageService, MessageServiceDependencies, RegistrationService,
    RegistrationServiceDependencies, RequestGateway, SessionService, SystemClock,
};
use config::AppConfig;
use infrastructure::Infrastructure;

use crate::session::SessionCookie;

/// 实时连接的心跳与空闲超时
#[derive(Debug, Clone, Copy)]
pub struct RealtimeSettings {
    pub heartbeat_interval: Duration,
    pub idle_timeout: Duration,
}

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<RequestGateway>,
    pub sessions: Arc<SessionService>,
    pub registration: Arc<RegistrationService>,
    pub employees: Arc<EmployeeService>,
    pub channels: Arc<ChannelService>,
    pub messages: Arc<MessageService>,
    pub fanout: Arc<FanoutEngine>,
    pub session_cookie: SessionCookie,
    pub realtime: RealtimeSettings,
}

impl AppState {
    pub fn new(config: &AppConfig, infrastructure: &Infrastructure) -> Self {
        let storage = &infrastructure.storage;
        let identity = infrastructure.identity_provider.clone();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let policy = Arc::new(AccessPolicy::new(&config.access.admin_emails));
        let directory = MembershipDirectory::new(storage.memberships.clone());
        let messaging = &config.messaging;

        let fanout = Arc::new(FanoutEngine::new(
            FanoutConfig {
                capacity: messaging.broadcast_capacity,
                max_redelivery_attempts: messaging.max_redelivery_attempts,
                ..FanoutConfig::default()
            },
            storage.messages.clone(),
            directory.clone(),
        ));

        let messages = MessageService::new(MessageServiceDependencies {
            channel_repository: storage.channels.clone(),
            message_repository: storage.messages.clone(),
            membership_directory: directory.clone(),
            broadcaster: fanout.clone(),
            sequencer: Arc::new(ChannelSequencer::new()),
            clock: clock.clone(),
            limits: HistoryLimits {
                default_limit: messaging.default_history_limit,
                max_limit: messaging.max_history_limit,
            },
        });

        let channels = ChannelService::new(ChannelServiceDependencies {
            channel_repository: storage.channels.clone(),
            employee_repository: storage.employees.clone(),
            membership_directory: directory,
            clock: clock.clone(),
        });

        let registration = RegistrationService::new(RegistrationServiceDependencies {
            employee_repository: storage.employees.clone(),
            identity_provider: identity.clone(),
            clock: clock.clone(),
        });

        let employees = EmployeeService::new(storage.employees.clone(), policy.clone(), clock);

        Self {
            gateway: Arc::new(RequestGateway::new(identity.clone(), policy)),
            sessions: Arc::new(SessionService::new(identity, storage.employees.clone())),
            registration: Arc::new(registration),
            employees: Arc::new(employees),
            channels: Arc::new(channels),
            messages: Arc::new(messages),
            fanout,
            session_cookie: SessionCookie::from_config(&config.session),
            realtime: RealtimeSettings {
                heartbeat_interval: Duration::from_secs(messaging.heartbeat_interval_secs),
                idle_timeout: Duration::from_secs(messaging.idle_timeout_secs),
            },
        }
    }
}
