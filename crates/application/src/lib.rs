//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：访问策略、请求网关判定、注册流程、
//! 频道与消息存储、以及频道级实时分发。

pub mod broadcaster;
pub mod clock;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod membership;
pub mod policy;
pub mod retry;
pub mod sequencer;
pub mod services;

pub use broadcaster::{BroadcastError, MessageBroadcast, MessageBroadcaster};
pub use clock::{Clock, SystemClock};
pub use error::ApplicationError;
pub use fanout::{
    DeliveryCursor, FanoutConfig, FanoutEngine, Subscription, SubscriptionId, SubscriptionState,
};
pub use gateway::{GatewayDecision, GatewayOutcome, RequestGateway, LOGIN_PATH};
pub use membership::{MembershipDirectory, NOT_CHANNEL_MEMBER};
pub use policy::{route_class, AccessPolicy, DenialReason, RegistrationDecision, RouteClass};
pub use sequencer::ChannelSequencer;
pub use services::{
    ChannelService, ChannelServiceDependencies, CreateChannelRequest, EmployeeService,
    HistoryLimits, MessageService, MessageServiceDependencies, PreRegisterEmployeeRequest,
    RegisteredEmployee, RegistrationService, RegistrationServiceDependencies, SessionService,
    SignupRequest, ACCOUNT_DISABLED, ADMIN_ONLY, CHANNEL_OWNER_ONLY, MIN_PASSWORD_CHARS,
};
