use aws_config::BehaviorVersion;
use clap::Parser;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use s3enc_aws::AwsClientFactory;
use s3enc_core::{ConfigRuleEvent, Evaluation};
use s3enc_lambda::{handle_event, Settings};

async fn function_handler(event: LambdaEvent<ConfigRuleEvent>, factory: &AwsClientFactory) -> Result<Evaluation, Error> {
    Ok(handle_event(event.payload, factory).await?)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let settings = Settings::parse();
    settings.init_tracing();
    let base = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let factory = AwsClientFactory::new(base, settings.role_session_name.clone(), settings.assume_role);
    run(service_fn(|event| function_handler(event, &factory))).await
}
