use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_credential_types::{provider::SharedCredentialsProvider, Credentials};
use aws_sdk_config::primitives::DateTime;
use aws_sdk_config::types::{ComplianceType as SdkComplianceType, Evaluation as SdkEvaluation};
use aws_sdk_s3::types::ServerSideEncryptionRule;
use s3enc_core::{
    ClientFactory, Collaborators, ComplianceType, EncryptionByDefault, EncryptionConfiguration,
    EncryptionQuery, EncryptionRule, Evaluation, EvaluationReporter,
};
use secrecy::{ExposeSecret, SecretString};
use std::time::SystemTime;
use tracing::{debug, info};

/// Credentials handed out by STS for the execution role.
#[derive(Debug)]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: SecretString,
    pub session_token: SecretString,
    pub expiration: Option<SystemTime>,
}

impl TemporaryCredentials {
    /// Same region and settings as `base`, signed with these credentials.
    pub fn to_sdk_config(&self, base: &SdkConfig) -> SdkConfig {
        let creds = Credentials::new(
            self.access_key_id.clone(),
            self.secret_access_key.expose_secret().clone(),
            Some(self.session_token.expose_secret().clone()),
            self.expiration,
            "s3enc-assume-role",
        );
        base.to_builder()
            .credentials_provider(SharedCredentialsProvider::new(creds))
            .build()
    }
}

pub async fn assume_role(base: &SdkConfig, role_arn: &str, session_name: &str) -> Result<TemporaryCredentials> {
    let sts = aws_sdk_sts::Client::new(base);
    let resp = sts.assume_role()
        .role_arn(role_arn)
        .role_session_name(session_name)
        .send().await
        .map_err(|e| anyhow!("{}", aws_sdk_sts::error::DisplayErrorContext(&e)))
        .with_context(|| format!("assume role {role_arn}"))?;
    let c = resp.credentials().context("AssumeRole returned no credentials")?;
    Ok(TemporaryCredentials {
        access_key_id: c.access_key_id().to_string(),
        secret_access_key: SecretString::new(c.secret_access_key().to_string()),
        session_token: SecretString::new(c.session_token().to_string()),
        expiration: SystemTime::try_from(*c.expiration()).ok(),
    })
}

pub struct S3EncryptionQuery { client: aws_sdk_s3::Client }

impl S3EncryptionQuery {
    pub fn new(config: &SdkConfig) -> Self { Self { client: aws_sdk_s3::Client::new(config) } }
}

#[async_trait]
impl EncryptionQuery for S3EncryptionQuery {
    async fn get_bucket_encryption(&self, bucket: &str) -> Result<EncryptionConfiguration> {
        let resp = self.client.get_bucket_encryption()
            .bucket(bucket)
            .send().await
            .map_err(|e| anyhow!("GetBucketEncryption {bucket}: {}", aws_sdk_s3::error::DisplayErrorContext(&e)))?;
        let rules = resp.server_side_encryption_configuration()
            .map(|c| c.rules().iter().map(rule_from_sdk).collect())
            .unwrap_or_default();
        Ok(EncryptionConfiguration { rules })
    }
}

fn rule_from_sdk(rule: &ServerSideEncryptionRule) -> EncryptionRule {
    EncryptionRule {
        apply_server_side_encryption_by_default: rule.apply_server_side_encryption_by_default().map(|d| {
            EncryptionByDefault {
                sse_algorithm: d.sse_algorithm().as_str().to_string(),
                kms_master_key_id: d.kms_master_key_id().map(str::to_string),
            }
        }),
        bucket_key_enabled: rule.bucket_key_enabled(),
    }
}

pub struct ConfigEvaluationReporter { client: aws_sdk_config::Client }

impl ConfigEvaluationReporter {
    pub fn new(config: &SdkConfig) -> Self { Self { client: aws_sdk_config::Client::new(config) } }
}

#[async_trait]
impl EvaluationReporter for ConfigEvaluationReporter {
    async fn put_evaluation(&self, evaluation: &Evaluation, result_token: &str) -> Result<()> {
        let sdk_eval = SdkEvaluation::builder()
            .compliance_resource_type(&evaluation.compliance_resource_type)
            .compliance_resource_id(&evaluation.compliance_resource_id)
            .compliance_type(sdk_compliance_type(evaluation.compliance_type))
            .annotation(&evaluation.annotation)
            .ordering_timestamp(DateTime::from_millis(evaluation.ordering_timestamp.timestamp_millis()))
            .build()
            .context("build Config evaluation")?;
        let resp = self.client.put_evaluations()
            .evaluations(sdk_eval)
            .result_token(result_token)
            .send().await
            .map_err(|e| anyhow!("PutEvaluations: {}", aws_sdk_config::error::DisplayErrorContext(&e)))?;
        let failed = resp.failed_evaluations();
        if !failed.is_empty() {
            bail!("Config rejected {} evaluation(s) for {}", failed.len(), evaluation.compliance_resource_id);
        }
        debug!(resource_id = %evaluation.compliance_resource_id, "evaluation submitted");
        Ok(())
    }
}

fn sdk_compliance_type(t: ComplianceType) -> SdkComplianceType {
    match t {
        ComplianceType::Compliant => SdkComplianceType::Compliant,
        ComplianceType::NonCompliant => SdkComplianceType::NonCompliant,
        ComplianceType::NotApplicable => SdkComplianceType::NotApplicable,
    }
}

/// Production [`ClientFactory`]: S3 and Config clients, optionally under an assumed role.
pub struct AwsClientFactory {
    base: SdkConfig,
    session_name: String,
    assume_role: bool,
}

impl AwsClientFactory {
    pub fn new(base: SdkConfig, session_name: impl Into<String>, assume_role: bool) -> Self {
        Self { base, session_name: session_name.into(), assume_role }
    }

    /// The role to assume for this invocation; `None` means the function's own credentials.
    pub fn role_to_assume<'a>(&self, execution_role: Option<&'a str>) -> Option<&'a str> {
        execution_role.filter(|_| self.assume_role)
    }
}

#[async_trait]
impl ClientFactory for AwsClientFactory {
    async fn connect(&self, execution_role: Option<&str>) -> Result<Collaborators> {
        let config = match self.role_to_assume(execution_role) {
            Some(role) => {
                info!(role, session = %self.session_name, "assuming execution role");
                assume_role(&self.base, role, &self.session_name).await?.to_sdk_config(&self.base)
            }
            None => {
                info!("using function credentials");
                self.base.clone()
            }
        };
        Ok(Collaborators {
            encryption: Box::new(S3EncryptionQuery::new(&config)),
            reporter: Box::new(ConfigEvaluationReporter::new(&config)),
        })
    }
}
