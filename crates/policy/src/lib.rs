use regex::Regex;
use s3enc_core::{ComplianceVerdict, ConfigurationItem, EncryptionQuery, EventError, RuleParameters, S3_BUCKET_TYPE};
use std::sync::OnceLock;
use tracing::{debug, warn};

pub const APPLICABLE_RESOURCES: &[&str] = &[S3_BUCKET_TYPE];
pub const EXPECTED_ALGORITHM: &str = "AES256";

pub const ANNOTATION_DELETED: &str = "The resource was deleted.";
pub const ANNOTATION_NO_DEFAULT_ENCRYPTION: &str = "S3 bucket does NOT have default encryption enabled.";
pub const ANNOTATION_SSE_S3: &str = "S3 bucket is encrypted with SSE-S3.";
pub const ANNOTATION_NOT_SSE_S3: &str = "S3 bucket is NOT encrypted with SSE-S3.";

static KMS_ARN: OnceLock<Regex> = OnceLock::new();

fn kms_arn_pattern() -> &'static Regex {
    KMS_ARN.get_or_init(|| {
        Regex::new(r"^arn:aws[a-z-]*:kms:[a-z0-9-]+:\d{12}:(key|alias)/[A-Za-z0-9/_+=,.@-]+$")
            .expect("KMS ARN pattern is valid")
    })
}

/// Decides whether the bucket behind `item` uses SSE-S3 default encryption.
///
/// Rule parameters are accepted but do not influence the verdict. Any failure of
/// `query` counts as the bucket having no default encryption.
pub async fn evaluate_compliance(
    item: &ConfigurationItem,
    _params: &RuleParameters,
    query: &dyn EncryptionQuery,
) -> ComplianceVerdict {
    if item.is_deleted() {
        return ComplianceVerdict::not_applicable(ANNOTATION_DELETED);
    }
    if !APPLICABLE_RESOURCES.contains(&item.resource_type.as_str()) {
        return ComplianceVerdict::not_applicable(format!(
            "The rule doesn't apply to resources of type {}.", item.resource_type
        ));
    }
    let Some(bucket) = item.resource_name.as_deref() else {
        warn!(resource_id = %item.resource_id, "configuration item has no resourceName");
        return ComplianceVerdict::non_compliant(ANNOTATION_NO_DEFAULT_ENCRYPTION);
    };

    let config = match query.get_bucket_encryption(bucket).await {
        Ok(c) => c,
        Err(e) => {
            warn!(bucket, error = %format!("{e:#}"), "encryption configuration unavailable");
            return ComplianceVerdict::non_compliant(ANNOTATION_NO_DEFAULT_ENCRYPTION);
        }
    };
    match config.default_algorithm() {
        Some(EXPECTED_ALGORITHM) => ComplianceVerdict::compliant(ANNOTATION_SSE_S3),
        Some(other) => {
            debug!(bucket, algorithm = other, "unexpected default encryption algorithm");
            ComplianceVerdict::non_compliant(ANNOTATION_NOT_SSE_S3)
        }
        None => ComplianceVerdict::non_compliant(ANNOTATION_NO_DEFAULT_ENCRYPTION),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseOrKms { Sse, Kms }

/// Validated `SSE_OR_KMS` / `KMS_ARN` rule parameters. Only logged; `evaluate_compliance` ignores them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionPreference {
    pub sse_or_kms: Option<SseOrKms>,
    pub kms_arn: Option<String>,
}

impl EncryptionPreference {
    pub fn from_params(params: &RuleParameters) -> Result<Self, EventError> {
        let sse_or_kms = match params.get("SSE_OR_KMS") {
            None => None,
            Some(v) if v.trim().eq_ignore_ascii_case("SSE") => Some(SseOrKms::Sse),
            Some(v) if v.trim().eq_ignore_ascii_case("KMS") => Some(SseOrKms::Kms),
            Some(v) => return Err(invalid("SSE_OR_KMS", v, "expected SSE or KMS")),
        };
        let kms_arn = match params.get("KMS_ARN") {
            None => None,
            Some(v) => {
                if !kms_arn_pattern().is_match(v.trim()) {
                    return Err(invalid("KMS_ARN", v, "not a KMS key or alias ARN"));
                }
                if sse_or_kms != Some(SseOrKms::Kms) {
                    return Err(invalid("KMS_ARN", v, "requires SSE_OR_KMS=KMS"));
                }
                Some(v.trim().to_string())
            }
        };
        Ok(Self { sse_or_kms, kms_arn })
    }

    pub fn is_empty(&self) -> bool { self.sse_or_kms.is_none() && self.kms_arn.is_none() }
}

fn invalid(name: &str, value: &str, reason: &str) -> EventError {
    EventError::InvalidRuleParameter { name: name.to_string(), value: value.to_string(), reason: reason.to_string() }
}
