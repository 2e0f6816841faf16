// Wire-level documents exchanged with the messaging service: the notification
// envelope a topic wraps around each delivery, and the queue access policy.
use serde::{Deserialize, Serialize};
use tap_common::ids::{AccountId, QueueName, TopicArn};

pub mod policy;

pub use policy::{PolicyDocument, queue_arn_for};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to serialize document")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize envelope")]
    Deserialize(#[source] serde_json::Error),
}

/// Notification envelope added by the topic when it delivers into a queue.
///
/// Only `Message` is required; the remaining fields are carried when present.
///
/// ```
/// use tap_wire::NotificationEnvelope;
///
/// let envelope = NotificationEnvelope::parse(r#"{"Message":"hello"}"#).expect("envelope");
/// assert_eq!(envelope.payload_text(), "hello");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl NotificationEnvelope {
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(Error::Deserialize)
    }

    /// Published payload as text. String payloads are returned verbatim; any
    /// other JSON value is rendered compactly.
    pub fn payload_text(&self) -> String {
        match &self.message {
            serde_json::Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }

    // Deliveries from a different topic indicate a misrouted subscription.
    pub fn is_from(&self, topic: &TopicArn) -> bool {
        self.topic_arn
            .as_deref()
            .is_none_or(|arn| arn == topic.as_str())
    }
}

/// Render the access policy for a freshly named queue.
pub fn render_queue_policy(
    region: &str,
    account: &AccountId,
    queue: &QueueName,
    topic: &TopicArn,
) -> Result<String> {
    PolicyDocument::topic_to_queue(region, account, queue, topic).to_json()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_notification() {
        let body = r#"{
            "Type": "Notification",
            "MessageId": "22b80b92-fdea-4c2c-8f9d-bdfb0c7bf324",
            "TopicArn": "arn:aws:sns:eu-west-1:123456789012:orders",
            "Subject": "order",
            "Message": "{\"id\":7}",
            "Timestamp": "2012-05-02T00:54:06.655Z",
            "SignatureVersion": "1"
        }"#;
        let envelope = NotificationEnvelope::parse(body).expect("parse");
        assert_eq!(envelope.r#type.as_deref(), Some("Notification"));
        assert_eq!(envelope.subject.as_deref(), Some("order"));
        assert_eq!(envelope.payload_text(), "{\"id\":7}");
    }

    #[test]
    fn structured_message_is_rendered_compactly() {
        let envelope = NotificationEnvelope::parse(r#"{"Message":{"a":[1,2]}}"#).expect("parse");
        assert_eq!(envelope.payload_text(), r#"{"a":[1,2]}"#);
    }

    #[test]
    fn rejects_non_json_and_missing_message() {
        assert!(matches!(
            NotificationEnvelope::parse("not json"),
            Err(Error::Deserialize(_))
        ));
        assert!(NotificationEnvelope::parse(r#"{"Subject":"x"}"#).is_err());
        assert!(NotificationEnvelope::parse("[1,2,3]").is_err());
    }

    #[test]
    fn topic_match_tolerates_missing_arn() {
        let topic: TopicArn = "arn:aws:sns:eu-west-1:1:orders".parse().expect("topic");
        let bare = NotificationEnvelope::parse(r#"{"Message":"x"}"#).expect("parse");
        assert!(bare.is_from(&topic));
        let other = NotificationEnvelope::parse(
            r#"{"Message":"x","TopicArn":"arn:aws:sns:eu-west-1:1:other"}"#,
        )
        .expect("parse");
        assert!(!other.is_from(&topic));
    }
}
