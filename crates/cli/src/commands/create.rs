use std::time::Duration;

use clap::Args;
use sessionlock_provider::SessionStateProvider;

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Session id.
    pub session_id: String,

    /// Idle timeout; defaults to the configured session timeout.
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

pub async fn run(provider: &SessionStateProvider, args: &CreateArgs) -> anyhow::Result<()> {
    let timeout = args
        .timeout_secs
        .map_or_else(|| provider.config().session_timeout(), Duration::from_secs);
    let mut request = provider.begin_request();
    request
        .create_uninitialized_item(&args.session_id, timeout)
        .await?;
    println!(
        "Created session {} ({}s timeout).",
        args.session_id,
        timeout.as_secs()
    );
    Ok(())
}
