//! Connector types and their validated delivery targets.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use conduit_core::DomainError;

/// Closed set of external systems a delivery can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    Webhook,
    Slack,
    Jira,
    Sqs,
    DbSink,
}

impl ConnectorType {
    pub const ALL: [ConnectorType; 5] = [
        ConnectorType::Webhook,
        ConnectorType::Slack,
        ConnectorType::Jira,
        ConnectorType::Sqs,
        ConnectorType::DbSink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::Webhook => "webhook",
            ConnectorType::Slack => "slack",
            ConnectorType::Jira => "jira",
            ConnectorType::Sqs => "sqs",
            ConnectorType::DbSink => "db_sink",
        }
    }
}

impl core::fmt::Display for ConnectorType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectorType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webhook" => Ok(ConnectorType::Webhook),
            "slack" => Ok(ConnectorType::Slack),
            "jira" => Ok(ConnectorType::Jira),
            "sqs" => Ok(ConnectorType::Sqs),
            "db_sink" | "db-sink" | "dbsink" => Ok(ConnectorType::DbSink),
            other => Err(DomainError::validation(format!(
                "unknown connector type '{other}'; expected one of: webhook, slack, jira, sqs, db_sink"
            ))),
        }
    }
}

/// Plain HTTP webhook: the payload is POSTed as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookTarget {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Slack incoming webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlackTarget {
    pub webhook_url: String,
    #[serde(default)]
    pub channel: Option<String>,
}

/// Jira Cloud/Server issue creation.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JiraTarget {
    pub base_url: String,
    pub project_key: String,
    #[serde(default = "default_issue_type")]
    pub issue_type: String,
    pub email: String,
    pub api_token: String,
}

fn default_issue_type() -> String {
    "Task".to_string()
}

// Hand-written so the API token never ends up in logs.
impl core::fmt::Debug for JiraTarget {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JiraTarget")
            .field("base_url", &self.base_url)
            .field("project_key", &self.project_key)
            .field("issue_type", &self.issue_type)
            .field("email", &self.email)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

/// SQS (or SQS-compatible) queue, addressed by its queue URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqsTarget {
    pub queue_url: String,
}

/// Relational sink table receiving one row per delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbSinkTarget {
    #[serde(default = "default_sink_table")]
    pub table: String,
}

pub(crate) fn default_sink_table() -> String {
    "connector_delivery_sink".to_string()
}

/// Validated, connector-specific destination of a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "connector_type", rename_all = "snake_case")]
pub enum ConnectorTarget {
    Webhook(WebhookTarget),
    Slack(SlackTarget),
    Jira(JiraTarget),
    Sqs(SqsTarget),
    DbSink(DbSinkTarget),
}

impl ConnectorTarget {
    pub fn connector_type(&self) -> ConnectorType {
        match self {
            ConnectorTarget::Webhook(_) => ConnectorType::Webhook,
            ConnectorTarget::Slack(_) => ConnectorType::Slack,
            ConnectorTarget::Jira(_) => ConnectorType::Jira,
            ConnectorTarget::Sqs(_) => ConnectorType::Sqs,
            ConnectorTarget::DbSink(_) => ConnectorType::DbSink,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_types_and_aliases() {
        assert_eq!("webhook".parse::<ConnectorType>().unwrap(), ConnectorType::Webhook);
        assert_eq!(" Slack ".parse::<ConnectorType>().unwrap(), ConnectorType::Slack);
        assert_eq!("db-sink".parse::<ConnectorType>().unwrap(), ConnectorType::DbSink);
        assert!(matches!(
            "ftp".parse::<ConnectorType>(),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn as_str_matches_serde_name() {
        for ct in ConnectorType::ALL {
            let json = serde_json::to_value(ct).unwrap();
            assert_eq!(json, serde_json::Value::String(ct.as_str().to_string()));
        }
    }

    #[test]
    fn jira_debug_redacts_token() {
        let target = JiraTarget {
            base_url: "https://acme.atlassian.net".to_string(),
            project_key: "OPS".to_string(),
            issue_type: default_issue_type(),
            email: "bot@acme.io".to_string(),
            api_token: "super-secret".to_string(),
        };
        let rendered = format!("{target:?}");
        assert!(!rendered.contains("super-secret"));
    }
}
