// Access policy allowing exactly one topic to send into one queue.
use serde::{Deserialize, Serialize};
use tap_common::ids::{AccountId, QueueName, TopicArn};

use crate::{Error, Result};

pub const POLICY_VERSION: &str = "2012-10-17";
pub const TOPIC_SERVICE_PRINCIPAL: &str = "sns.amazonaws.com";
pub const SEND_MESSAGE_ACTION: &str = "SQS:SendMessage";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub effect: String,
    pub principal: Principal,
    pub action: String,
    pub resource: String,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Principal {
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Condition {
    pub arn_equals: ArnEquals,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArnEquals {
    #[serde(rename = "aws:SourceArn")]
    pub source_arn: String,
}

/// Build the queue ARN for a region/account/name triple.
///
/// ```
/// use tap_common::ids::{AccountId, QueueName};
/// use tap_wire::queue_arn_for;
///
/// let name: QueueName = "6f1c4c1e-8d7a-4a3c-9b59-2f6a3f0f6e11".parse().expect("name");
/// let arn = queue_arn_for("eu-west-1", &AccountId::new("123456789012"), &name);
/// assert_eq!(arn, "arn:aws:sqs:eu-west-1:123456789012:6f1c4c1e-8d7a-4a3c-9b59-2f6a3f0f6e11");
/// ```
pub fn queue_arn_for(region: &str, account: &AccountId, queue: &QueueName) -> String {
    format!(
        "arn:{}:sqs:{region}:{account}:{queue}",
        partition_for(region)
    )
}

fn partition_for(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else {
        "aws"
    }
}

impl PolicyDocument {
    pub fn topic_to_queue(
        region: &str,
        account: &AccountId,
        queue: &QueueName,
        topic: &TopicArn,
    ) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                effect: "Allow".to_string(),
                principal: Principal {
                    service: TOPIC_SERVICE_PRINCIPAL.to_string(),
                },
                action: SEND_MESSAGE_ACTION.to_string(),
                resource: queue_arn_for(region, account, queue),
                condition: Condition {
                    arn_equals: ArnEquals {
                        source_arn: topic.as_str().to_string(),
                    },
                },
            }],
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Serialize)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(Error::Deserialize)
    }

    /// Source topics named by the statements' `ArnEquals` conditions.
    pub fn source_topics(&self) -> impl Iterator<Item = &str> {
        self.statement
            .iter()
            .map(|statement| statement.condition.arn_equals.source_arn.as_str())
    }
}
