use anyhow::{Context, Result};
use s3enc_core::{ClientFactory, ConfigRuleEvent, Evaluation};
use s3enc_policy::{evaluate_compliance, EncryptionPreference};
use tracing::{debug, info, instrument, warn};

const KNOWN_PARAMETERS: &[&str] = &["execution_role", "SSE_OR_KMS", "KMS_ARN"];

/// Evaluates the bucket named by `event` and reports the result to Config.
///
/// Envelope, credential and reporting failures propagate. An unreadable bucket
/// encryption setting becomes NON_COMPLIANT, and bad SSE_OR_KMS/KMS_ARN values are only logged.
#[instrument(skip_all, fields(rule = ?event.config_rule_name, account = ?event.account_id))]
pub async fn handle_event(event: ConfigRuleEvent, factory: &dyn ClientFactory) -> Result<Evaluation> {
    let invoking = event.invoking_event()?;
    debug!(message_type = ?invoking.message_type, left_scope = event.event_left_scope, "invoking event");
    let item = invoking.into_item()?;

    let params = event.rule_parameters()?;
    for key in params.keys().filter(|k| !KNOWN_PARAMETERS.contains(k)) {
        debug!(key, "ignoring unknown rule parameter");
    }
    match EncryptionPreference::from_params(&params) {
        Ok(preference) if preference.is_empty() => {}
        Ok(preference) => warn!(?preference, "SSE_OR_KMS/KMS_ARN are not enforced; only SSE-S3 is compliant"),
        Err(e) => warn!(error = %e, "ignoring encryption rule parameter"),
    }

    let clients = factory.connect(params.execution_role()).await
        .context("connect AWS clients")?;
    let verdict = evaluate_compliance(&item, &params, clients.encryption.as_ref()).await;

    info!("Compliance evaluation for {}: {}", item.resource_id, verdict.compliance_type);
    info!("Annotation: {}", verdict.annotation);

    let evaluation = Evaluation::new(&item, verdict)?;
    clients.reporter.put_evaluation(&evaluation, &event.result_token).await
        .with_context(|| format!("report evaluation for {}", evaluation.compliance_resource_id))?;
    Ok(evaluation)
}
