// Shared identifiers and resource records used across the tap crates.
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("invalid topic arn: {0}")]
    InvalidTopic(String),
}

/// Region used when neither the command line nor the environment picks one.
pub const DEFAULT_REGION: &str = "eu-west-1";

/// Retention applied to provisioned queues so undrained messages expire.
pub const DEFAULT_RETENTION_SECONDS: u32 = 86_400;

pub mod ids {
    // Strongly typed identifiers so a queue url is never passed where an arn is expected.
    use super::{Error, Result};
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::str::FromStr;
    use uuid::Uuid;

    macro_rules! string_id {
        ($name:ident) => {
            #[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(String);

            impl $name {
                pub fn new(value: impl Into<String>) -> Self {
                    Self(value.into())
                }

                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl AsRef<str> for $name {
                fn as_ref(&self) -> &str {
                    &self.0
                }
            }
        };
    }

    string_id!(AccountId);
    string_id!(QueueUrl);
    string_id!(QueueArn);
    string_id!(SubscriptionArn);
    string_id!(ReceiptHandle);

    /// Identifier of the pre-existing topic the tap subscribes to.
    ///
    /// The value ends up verbatim in an `ArnEquals` policy condition, so
    /// wildcard characters are refused.
    ///
    /// ```
    /// use tap_common::ids::TopicArn;
    ///
    /// let topic: TopicArn = "arn:aws:sns:eu-west-1:123456789012:orders".parse().expect("topic");
    /// assert_eq!(topic.as_str(), "arn:aws:sns:eu-west-1:123456789012:orders");
    /// assert!("arn:aws:sns:*:123456789012:orders".parse::<TopicArn>().is_err());
    /// ```
    #[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    #[serde(try_from = "String", into = "String")]
    pub struct TopicArn(String);

    impl TopicArn {
        pub fn as_str(&self) -> &str {
            &self.0
        }
    }

    impl FromStr for TopicArn {
        type Err = Error;

        fn from_str(input: &str) -> Result<Self> {
            let trimmed = input.trim();
            if trimmed.is_empty() {
                return Err(Error::InvalidTopic("empty".into()));
            }
            if trimmed
                .chars()
                .any(|c| c.is_whitespace() || c == '*' || c == '?')
            {
                return Err(Error::InvalidTopic(input.into()));
            }
            Ok(Self(trimmed.to_string()))
        }
    }

    impl TryFrom<String> for TopicArn {
        type Error = Error;

        fn try_from(value: String) -> Result<Self> {
            value.parse()
        }
    }

    impl From<TopicArn> for String {
        fn from(value: TopicArn) -> Self {
            value.0
        }
    }

    impl fmt::Display for TopicArn {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(&self.0)
        }
    }

    /// Queue name backed by a random v4 UUID (122 random bits).
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct QueueName(Uuid);

    impl QueueName {
        // Fresh name per run; never derived from time or a counter.
        pub fn generate() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl fmt::Display for QueueName {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl FromStr for QueueName {
        type Err = Error;

        fn from_str(input: &str) -> Result<Self> {
            let uuid = Uuid::parse_str(input).map_err(|_| Error::InvalidId(input.into()))?;
            Ok(Self(uuid))
        }
    }
}

use ids::{QueueArn, QueueName, QueueUrl, SubscriptionArn, TopicArn};

/// Queue owned by this process for the lifetime of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueResource {
    pub name: QueueName,
    pub url: QueueUrl,
    pub arn: QueueArn,
    pub retention_seconds: u32,
}

/// Routing rule delivering topic notifications into the owned queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionBinding {
    pub arn: SubscriptionArn,
    pub topic: TopicArn,
    pub queue_arn: QueueArn,
}
