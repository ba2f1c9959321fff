use clap::Args;
use sessionlock_provider::{LockStatus, SessionStateProvider};

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct LockArgs {
    /// Session id.
    pub session_id: String,
}

#[derive(Args, Debug)]
pub struct UnlockArgs {
    /// Session id.
    pub session_id: String,

    /// Lock id printed by `lock` or `inspect`.
    #[arg(long)]
    pub lock_id: String,
}

pub async fn lock(
    provider: &SessionStateProvider,
    args: &LockArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let mut request = provider.begin_request();
    let result = request.get_item_exclusive(&args.session_id).await?;
    match (result.status, result.lock_id) {
        (LockStatus::Acquired, Some(lock_id)) => match format {
            OutputFormat::Json => {
                let body = serde_json::json!({ "session": args.session_id, "lockId": lock_id });
                println!("{}", serde_json::to_string_pretty(&body)?);
            }
            OutputFormat::Text => {
                println!("Locked {} with lock id {lock_id}.", args.session_id);
                println!(
                    "The lock expires after {}s unless released with `unlock`.",
                    provider.config().request_timeout_secs
                );
            }
        },
        (LockStatus::Locked, Some(holder)) => {
            anyhow::bail!(
                "session {} is already locked by {holder} ({}s)",
                args.session_id,
                result.lock_age.as_secs()
            );
        }
        _ => anyhow::bail!("session {} not found", args.session_id),
    }
    Ok(())
}

pub async fn unlock(provider: &SessionStateProvider, args: &UnlockArgs) -> anyhow::Result<()> {
    let mut request = provider.begin_request();
    request
        .release_item_exclusive(&args.session_id, &args.lock_id)
        .await?;
    println!("Released lock {} on {}.", args.lock_id, args.session_id);
    Ok(())
}
