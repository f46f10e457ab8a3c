use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const S3_BUCKET_TYPE: &str = "AWS::S3::Bucket";
pub const RESOURCE_DELETED: &str = "ResourceDeleted";

#[derive(Error, Debug)]
pub enum EventError {
    #[error("invokingEvent is not valid JSON: {0}")]
    MalformedInvokingEvent(#[source] serde_json::Error),
    #[error("invoking event carries neither configurationItem nor configurationItemSummary")]
    MissingConfigurationItem,
    #[error("ruleParameters is not a JSON object of strings: {0}")]
    MalformedRuleParameters(#[source] serde_json::Error),
    #[error("rule parameter {name}='{value}' is invalid: {reason}")]
    InvalidRuleParameter { name: String, value: String, reason: String },
    #[error("configurationItemCaptureTime '{0}' is not an RFC 3339 timestamp")]
    InvalidCaptureTime(String),
}

/// Lambda payload delivered by AWS Config for a custom rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRuleEvent {
    pub invoking_event: String,
    #[serde(default)]
    pub rule_parameters: Option<String>,
    pub result_token: String,
    #[serde(default)]
    pub config_rule_name: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub event_left_scope: bool,
}

impl ConfigRuleEvent {
    pub fn invoking_event(&self) -> Result<InvokingEvent, EventError> {
        serde_json::from_str(&self.invoking_event).map_err(EventError::MalformedInvokingEvent)
    }

    pub fn rule_parameters(&self) -> Result<RuleParameters, EventError> {
        match self.rule_parameters.as_deref().map(str::trim) {
            None | Some("") => Ok(RuleParameters::default()),
            Some(raw) => serde_json::from_str(raw)
                .map(RuleParameters)
                .map_err(EventError::MalformedRuleParameters),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokingEvent {
    #[serde(default)]
    pub configuration_item: Option<ConfigurationItem>,
    /// Sent instead of the full item when it is too large for the notification.
    #[serde(default)]
    pub configuration_item_summary: Option<ConfigurationItem>,
    #[serde(default)]
    pub message_type: Option<String>,
}

impl InvokingEvent {
    pub fn into_item(self) -> Result<ConfigurationItem, EventError> {
        self.configuration_item
            .or(self.configuration_item_summary)
            .ok_or(EventError::MissingConfigurationItem)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationItem {
    pub resource_type: String,
    #[serde(default)]
    pub resource_name: Option<String>,
    pub resource_id: String,
    pub configuration_item_status: String,
    pub configuration_item_capture_time: String,
}

impl ConfigurationItem {
    pub fn is_deleted(&self) -> bool { self.configuration_item_status == RESOURCE_DELETED }

    pub fn captured_at(&self) -> Result<DateTime<Utc>, EventError> {
        DateTime::parse_from_rfc3339(&self.configuration_item_capture_time)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| EventError::InvalidCaptureTime(self.configuration_item_capture_time.clone()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleParameters(pub BTreeMap<String, String>);

impl RuleParameters {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str).filter(|v| !v.trim().is_empty())
    }
    pub fn execution_role(&self) -> Option<&str> { self.get("execution_role") }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn keys(&self) -> impl Iterator<Item = &str> { self.0.keys().map(String::as_str) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceType { Compliant, NonCompliant, NotApplicable }

impl ComplianceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceType::Compliant => "COMPLIANT",
            ComplianceType::NonCompliant => "NON_COMPLIANT",
            ComplianceType::NotApplicable => "NOT_APPLICABLE",
        }
    }
}

impl fmt::Display for ComplianceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceVerdict {
    pub compliance_type: ComplianceType,
    pub annotation: String,
}

impl ComplianceVerdict {
    pub fn compliant(annotation: impl Into<String>) -> Self {
        Self { compliance_type: ComplianceType::Compliant, annotation: annotation.into() }
    }
    pub fn non_compliant(annotation: impl Into<String>) -> Self {
        Self { compliance_type: ComplianceType::NonCompliant, annotation: annotation.into() }
    }
    pub fn not_applicable(annotation: impl Into<String>) -> Self {
        Self { compliance_type: ComplianceType::NotApplicable, annotation: annotation.into() }
    }
}

/// A verdict bound to the resource it was produced for, shaped like Config's `Evaluation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Evaluation {
    pub compliance_resource_type: String,
    pub compliance_resource_id: String,
    pub compliance_type: ComplianceType,
    pub annotation: String,
    pub ordering_timestamp: DateTime<Utc>,
}

impl Evaluation {
    pub fn new(item: &ConfigurationItem, verdict: ComplianceVerdict) -> Result<Self, EventError> {
        Ok(Self {
            compliance_resource_type: item.resource_type.clone(),
            compliance_resource_id: item.resource_id.clone(),
            compliance_type: verdict.compliance_type,
            annotation: verdict.annotation,
            ordering_timestamp: item.captured_at()?,
        })
    }
}

/// Bucket default encryption as returned by `GetBucketEncryption`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EncryptionConfiguration {
    #[serde(default)]
    pub rules: Vec<EncryptionRule>,
}

impl EncryptionConfiguration {
    /// Algorithm of the first rule; later rules are not consulted.
    pub fn default_algorithm(&self) -> Option<&str> {
        self.rules.first()
            .and_then(|r| r.apply_server_side_encryption_by_default.as_ref())
            .map(|d| d.sse_algorithm.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EncryptionRule {
    #[serde(default)]
    pub apply_server_side_encryption_by_default: Option<EncryptionByDefault>,
    #[serde(default)]
    pub bucket_key_enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionByDefault {
    #[serde(rename = "SSEAlgorithm")]
    pub sse_algorithm: String,
    #[serde(rename = "KMSMasterKeyID", default)]
    pub kms_master_key_id: Option<String>,
}

#[async_trait]
pub trait EncryptionQuery: Send + Sync {
    async fn get_bucket_encryption(&self, bucket: &str) -> anyhow::Result<EncryptionConfiguration>;
}

#[async_trait]
pub trait EvaluationReporter: Send + Sync {
    async fn put_evaluation(&self, evaluation: &Evaluation, result_token: &str) -> anyhow::Result<()>;
}

pub struct Collaborators {
    pub encryption: Box<dyn EncryptionQuery>,
    pub reporter: Box<dyn EvaluationReporter>,
}

/// Builds the per-invocation clients, optionally under an assumed execution role.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, execution_role: Option<&str>) -> anyhow::Result<Collaborators>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(invoking: serde_json::Value, params: Option<&str>) -> ConfigRuleEvent {
        ConfigRuleEvent {
            invoking_event: invoking.to_string(),
            rule_parameters: params.map(str::to_string),
            result_token: "token".into(),
            config_rule_name: None,
            account_id: None,
            event_left_scope: false,
        }
    }

    fn item_json(name: &str) -> serde_json::Value {
        json!({
            "resourceType": "AWS::S3::Bucket",
            "resourceName": name,
            "resourceId": name,
            "configurationItemStatus": "OK",
            "configurationItemCaptureTime": "2016-12-14T18:23:56.482Z",
            "configuration": { "ignored": true }
        })
    }

    #[test]
    fn full_item_wins_over_summary() {
        let ev = event(json!({
            "configurationItem": item_json("full"),
            "configurationItemSummary": item_json("summary"),
            "messageType": "ConfigurationItemChangeNotification"
        }), None);
        let item = ev.invoking_event().unwrap().into_item().unwrap();
        assert_eq!(item.resource_name.as_deref(), Some("full"));
    }

    #[test]
    fn summary_is_used_for_oversized_items() {
        let ev = event(json!({
            "configurationItemSummary": item_json("summary"),
            "messageType": "OversizedConfigurationItemChangeNotification"
        }), None);
        let item = ev.invoking_event().unwrap().into_item().unwrap();
        assert_eq!(item.resource_id, "summary");
    }

    #[test]
    fn missing_item_is_an_error() {
        let ev = event(json!({ "messageType": "ScheduledNotification" }), None);
        let err = ev.invoking_event().unwrap().into_item().unwrap_err();
        assert!(matches!(err, EventError::MissingConfigurationItem));
    }

    #[test]
    fn malformed_invoking_event() {
        let mut ev = event(json!({}), None);
        ev.invoking_event = "{not json".into();
        assert!(matches!(ev.invoking_event(), Err(EventError::MalformedInvokingEvent(_))));
    }

    #[test]
    fn rule_parameters_default_to_empty() {
        assert!(event(json!({}), None).rule_parameters().unwrap().is_empty());
        assert!(event(json!({}), Some("  ")).rule_parameters().unwrap().is_empty());
        assert!(event(json!({}), Some("{}")).rule_parameters().unwrap().is_empty());
    }

    #[test]
    fn rule_parameters_are_parsed() {
        let ev = event(json!({}), Some(r#"{"execution_role":"arn:aws:iam::123456789012:role/ops","SSE_OR_KMS":""}"#));
        let params = ev.rule_parameters().unwrap();
        assert_eq!(params.execution_role(), Some("arn:aws:iam::123456789012:role/ops"));
        assert_eq!(params.get("SSE_OR_KMS"), None);
        assert_eq!(params.keys().count(), 2);
    }

    #[test]
    fn non_string_rule_parameters_are_rejected() {
        let ev = event(json!({}), Some(r#"{"execution_role": 7}"#));
        assert!(matches!(ev.rule_parameters(), Err(EventError::MalformedRuleParameters(_))));
    }

    #[test]
    fn evaluation_carries_item_fields() {
        let item: ConfigurationItem = serde_json::from_value(item_json("b1")).unwrap();
        let eval = Evaluation::new(&item, ComplianceVerdict::compliant("ok")).unwrap();
        assert_eq!(eval.compliance_resource_type, S3_BUCKET_TYPE);
        assert_eq!(eval.compliance_resource_id, "b1");
        assert_eq!(eval.ordering_timestamp.timestamp_millis(), 1_481_739_836_482);
        let out = serde_json::to_value(&eval).unwrap();
        assert_eq!(out["ComplianceType"], "COMPLIANT");
    }

    #[test]
    fn bad_capture_time_is_rejected() {
        let mut item: ConfigurationItem = serde_json::from_value(item_json("b1")).unwrap();
        item.configuration_item_capture_time = "yesterday".into();
        let err = Evaluation::new(&item, ComplianceVerdict::compliant("ok")).unwrap_err();
        assert!(matches!(err, EventError::InvalidCaptureTime(t) if t == "yesterday"));
    }

    #[test]
    fn first_rule_algorithm_only() {
        let cfg: EncryptionConfiguration = serde_json::from_value(json!({
            "Rules": [
                { "ApplyServerSideEncryptionByDefault": { "SSEAlgorithm": "aws:kms", "KMSMasterKeyID": "k" } },
                { "ApplyServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" } }
            ]
        })).unwrap();
        assert_eq!(cfg.default_algorithm(), Some("aws:kms"));
        assert_eq!(EncryptionConfiguration::default().default_algorithm(), None);
    }
}
