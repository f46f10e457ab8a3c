use clap::{ArgAction, Parser};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Runtime settings. Lambda passes no arguments, so in practice every value comes from the environment.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "AWS Config rule: S3 buckets must default to SSE-S3 encryption")]
pub struct Settings {
    /// STS session name used when assuming the execution_role rule parameter
    #[arg(long, env = "ROLE_SESSION_NAME", default_value = "ops")]
    pub role_session_name: String,

    /// Assume execution_role when the rule supplies one
    #[arg(long, env = "ASSUME_ROLE", default_value_t = true, action = ArgAction::Set)]
    pub assume_role: bool,

    /// Log filter (tracing EnvFilter syntax)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Settings {
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_new(&self.log_filter).unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// JSON logs without timestamps; CloudWatch stamps each line itself.
    pub fn init_tracing(&self) {
        tracing_subscriber::fmt()
            .json()
            .with_current_span(false)
            .without_time()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(self.env_filter())
            .init();
    }
}
