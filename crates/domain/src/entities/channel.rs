use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{required_text, ChannelId, PrincipalId, Timestamp, MAX_CHANNEL_NAME_CHARS};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub is_private: bool,
    pub created_by: PrincipalId,
    pub created_at: Timestamp,
}

impl Channel {
    pub fn new(
        id: ChannelId,
        name: &str,
        is_private: bool,
        created_by: PrincipalId,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let name = Self::validate_name(name)?;
        Ok(Self {
            id,
            name,
            is_private,
            created_by,
            created_at,
        })
    }

    fn validate_name(name: &str) -> Result<String, DomainError> {
        required_text("channel_name", name, MAX_CHANNEL_NAME_CHARS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn channel_name_is_trimmed_and_bounded() {
        let creator = PrincipalId::new("p-1");
        let channel = Channel::new(
            ChannelId::from(Uuid::new_v4()),
            "  공지 ",
            false,
            creator.clone(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(channel.name, "공지");

        let too_long = "x".repeat(MAX_CHANNEL_NAME_CHARS + 1);
        assert!(Channel::new(ChannelId::from(Uuid::new_v4()), &too_long, false, creator, Utc::now()).is_err());
    }
}
