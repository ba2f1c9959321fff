use std::time::Duration;

use clap::Args;
use sessionlock_provider::{LockStatus, SessionStateProvider};

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Session id.
    pub session_id: String,
}

fn status_name(status: LockStatus) -> &'static str {
    match status {
        LockStatus::Acquired => "unlocked",
        LockStatus::Locked => "locked",
        LockStatus::NotFound => "not found",
    }
}

fn secs(duration: Duration) -> u64 {
    duration.as_secs()
}

pub async fn run(
    provider: &SessionStateProvider,
    args: &InspectArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let mut request = provider.begin_request();
    let result = request.get_item(&args.session_id).await?;
    let ttl = provider.time_to_live(&args.session_id).await?;

    match format {
        OutputFormat::Json => {
            let items: serde_json::Map<String, serde_json::Value> = result
                .data
                .as_ref()
                .map(|data| {
                    data.items
                        .iter()
                        .into_iter()
                        .map(|(k, v)| serde_json::to_value(v).map(|value| (k.to_owned(), value)))
                        .collect::<Result<_, serde_json::Error>>()
                })
                .transpose()?
                .unwrap_or_default();
            let body = serde_json::json!({
                "session": args.session_id,
                "status": status_name(result.status),
                "lockId": result.lock_id,
                "lockAgeSecs": result.is_locked().then(|| secs(result.lock_age)),
                "timeoutSecs": result.data.as_ref().map(|d| secs(d.timeout)),
                "ttlSecs": ttl.map(secs),
                "actions": format!("{:?}", result.actions),
                "items": items,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Text => {
            println!("Session:  {}", args.session_id);
            println!("Status:   {}", status_name(result.status));
            if let Some(lock_id) = &result.lock_id {
                println!("Lock id:  {lock_id}");
                if result.is_locked() {
                    println!("Lock age: {}s", secs(result.lock_age));
                }
            }
            if let Some(ttl) = ttl {
                println!("TTL:      {}s", secs(ttl));
            }
            if let Some(data) = &result.data {
                println!("Timeout:  {}s", secs(data.timeout));
                println!("Actions:  {:?}", result.actions);
                println!("Items ({}):", data.items.len());
                for (key, value) in data.items.iter() {
                    println!("  {key} = {value} ({})", value.kind());
                }
            }
        }
    }
    Ok(())
}
