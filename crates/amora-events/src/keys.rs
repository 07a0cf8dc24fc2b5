//! Enumerated routing keys and their payload shapes.

use serde::{Deserialize, Serialize};

pub const MATCH_CREATED: &str = "match.created";
pub const MESSAGE_SENT: &str = "message.sent";
pub const MESSAGE_READ: &str = "message.read";
pub const USER_BLOCKED: &str = "user.blocked";
pub const REPORT_CREATED: &str = "report.created";

/// Published by discovery when a mutual like produces a match.
///
/// The pair is order-normalized: `user_id_1 < user_id_2`, so concurrent
/// mutual likes map to the same match row and the event is published once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCreated {
    pub user_id_1: i64,
    pub user_id_2: i64,
    pub matched_at: Option<String>,
    pub interaction_type: String,
}

impl MatchCreated {
    pub fn normalized(a: i64, b: i64, matched_at: Option<String>, interaction_type: &str) -> Self {
        Self {
            user_id_1: a.min(b),
            user_id_2: a.max(b),
            matched_at,
            interaction_type: interaction_type.to_string(),
        }
    }
}

/// Published by chat for every newly inserted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSent {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub content_type: String,
    pub message_id: Option<i64>,
    pub sent_at: Option<String>,
}

/// Published by chat when a participant advances their read cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRead {
    pub conversation_id: i64,
    pub user_id: i64,
    pub up_to_message_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBlocked {
    pub blocker_id: i64,
    pub blocked_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportCreated {
    pub report_id: i64,
    pub reporter_id: i64,
    pub conversation_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_created_normalizes_pair_order() {
        let event = MatchCreated::normalized(42, 7, None, "like");
        assert_eq!(event.user_id_1, 7);
        assert_eq!(event.user_id_2, 42);

        let reversed = MatchCreated::normalized(7, 42, None, "like");
        assert_eq!(reversed.user_id_1, 7);
        assert_eq!(reversed.user_id_2, 42);
    }

    #[test]
    fn report_omits_absent_message_id() {
        let report = ReportCreated {
            report_id: 1,
            reporter_id: 2,
            conversation_id: 3,
            message_id: None,
            reason: "spam".into(),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("message_id").is_none());
    }
}
