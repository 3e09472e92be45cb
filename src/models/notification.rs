use std::fmt::{Display, Formatter, Result};

use serde::{Deserialize, Deserializer, Serialize};

/// Delivery channel of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Email,
}

impl NotificationType {
    pub const ALL: [NotificationType; 1] = [NotificationType::Email];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Email => "email",
        }
    }

    pub fn routing_key(&self) -> String {
        format!("notification.{}", self.as_str())
    }

    /// Bus queue bound to this type's routing key.
    pub fn queue_name(&self) -> String {
        format!("{}-notifications", self.as_str())
    }
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requested urgency. Anything other than `high`, `medium` or `low`,
/// including non-string values, reads as `Unspecified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
    #[default]
    Unspecified,
}

impl Priority {
    /// Numeric job priority; lower values are served first.
    pub fn level(&self) -> u8 {
        match self {
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
            Priority::Unspecified => 2,
        }
    }
}

impl From<&str> for Priority {
    fn from(value: &str) -> Self {
        match value {
            "high" => Priority::High,
            "medium" => Priority::Medium,
            "low" => Priority::Low,
            _ => Priority::Unspecified,
        }
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(value) => Priority::from(value.as_str()),
            _ => Priority::Unspecified,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(alias = "userId")]
    pub recipient_id: String,

    pub message: String,

    #[serde(rename = "type")]
    pub notification_type: NotificationType,

    #[serde(default)]
    pub priority: Priority,
}

impl NotificationPayload {
    pub fn new(
        recipient_id: impl Into<String>,
        message: impl Into<String>,
        notification_type: NotificationType,
        priority: Priority,
    ) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            message: message.into(),
            notification_type,
            priority,
        }
    }

    pub fn email(recipient_id: impl Into<String>, message: impl Into<String>, priority: Priority) -> Self {
        Self::new(recipient_id, message, NotificationType::Email, priority)
    }

    pub fn routing_key(&self) -> String {
        self.notification_type.routing_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_mapping_is_total() {
        assert_eq!(Priority::from("high").level(), 1);
        assert_eq!(Priority::from("medium").level(), 2);
        assert_eq!(Priority::from("low").level(), 3);

        for other in ["", "urgent", "HIGH", "3"] {
            assert_eq!(Priority::from(other).level(), 2, "{other:?} should default");
        }
    }

    #[test]
    fn unknown_priority_deserializes_to_default() {
        let payload: NotificationPayload = serde_json::from_value(serde_json::json!({
            "recipientId": "u-1",
            "message": "hi",
            "type": "email",
            "priority": "urgent"
        }))
        .unwrap();

        assert_eq!(payload.priority, Priority::Unspecified);
        assert_eq!(payload.priority.level(), 2);
    }

    #[test]
    fn non_string_priority_deserializes_to_default() {
        for priority in [
            serde_json::json!(5),
            serde_json::json!(1),
            serde_json::json!(null),
            serde_json::json!(true),
            serde_json::json!({ "level": "high" }),
        ] {
            let payload: NotificationPayload = serde_json::from_value(serde_json::json!({
                "recipientId": "u-1",
                "message": "hi",
                "type": "email",
                "priority": priority.clone()
            }))
            .unwrap();

            assert_eq!(payload.priority.level(), 2, "{priority} should default");
        }
    }

    #[test]
    fn payload_accepts_user_id_alias_and_missing_priority() {
        let payload: NotificationPayload = serde_json::from_value(serde_json::json!({
            "userId": "123e4567-e89b-12d3-a456-426614174000",
            "message": "Your order has been successfully confirmed!",
            "type": "email"
        }))
        .unwrap();

        assert_eq!(payload.recipient_id, "123e4567-e89b-12d3-a456-426614174000");
        assert_eq!(payload.priority, Priority::Unspecified);
    }

    #[test]
    fn routing_key_derives_from_type() {
        let payload = NotificationPayload::email("u-1", "hello", Priority::High);

        assert_eq!(payload.routing_key(), "notification.email");
        assert_eq!(NotificationType::Email.queue_name(), "email-notifications");
    }
}
