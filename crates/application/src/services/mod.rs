mod channel_service;
mod employee_service;
mod message_service;
mod registration_service;
mod session_service;

pub use channel_service::{
    ChannelService, ChannelServiceDependencies, CreateChannelRequest, CHANNEL_OWNER_ONLY,
};
pub use employee_service::{EmployeeService, PreRegisterEmployeeRequest, ADMIN_ONLY};
pub use message_service::{HistoryLimits, MessageService, MessageServiceDependencies};
pub use registration_service::{
    RegisteredEmployee, RegistrationService, RegistrationServiceDependencies, SignupRequest,
    MIN_PASSWORD_CHARS,
};
pub use session_service::{SessionService, ACCOUNT_DISABLED};
