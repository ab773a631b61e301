use crate::types::message::SenderRole;
use serde::{Deserialize, Serialize};

/// Backend identities of the two humans in a conversation, used to map a
/// raw `senderId` to a role when the wire object does not assert one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participants {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maker_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
}

impl Participants {
    pub fn new(maker_id: impl Into<String>, creator_id: impl Into<String>) -> Self {
        Self {
            maker_id: Some(maker_id.into()),
            creator_id: Some(creator_id.into()),
        }
    }

    pub fn role_of(&self, sender_id: &str) -> Option<SenderRole> {
        if self.maker_id.as_deref() == Some(sender_id) {
            Some(SenderRole::Maker)
        } else if self.creator_id.as_deref() == Some(sender_id) {
            Some(SenderRole::Creator)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_lookup() {
        let p = Participants::new("m1", "c1");
        assert_eq!(p.role_of("m1"), Some(SenderRole::Maker));
        assert_eq!(p.role_of("c1"), Some(SenderRole::Creator));
        assert_eq!(p.role_of("stranger"), None);
    }
}
