use clap::Args;
use sessionlock_core::SessionValue;
use sessionlock_provider::{LockStatus, SessionStateProvider};

#[derive(Args, Debug)]
pub struct SetArgs {
    /// Session id.
    pub session_id: String,

    /// `key=value` pairs. Values parse as null, bool, integer, float or
    /// JSON (when starting with `{` or `[`), falling back to a string.
    #[arg(value_parser = parse_assignment)]
    pub assignments: Vec<(String, SessionValue)>,

    /// Field to delete; may be repeated.
    #[arg(long = "delete", value_name = "KEY")]
    pub deletions: Vec<String>,
}

fn parse_assignment(raw: &str) -> Result<(String, SessionValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    Ok((key.to_owned(), parse_value(value)))
}

fn parse_value(raw: &str) -> SessionValue {
    if raw == "null" {
        return SessionValue::Null;
    }
    if let Ok(flag) = raw.parse::<bool>() {
        return SessionValue::Bool(flag);
    }
    if let Ok(number) = raw.parse::<i64>() {
        return SessionValue::Int(number);
    }
    if let Ok(number) = raw.parse::<f64>() {
        return SessionValue::Float(number);
    }
    if raw.starts_with('{') || raw.starts_with('[') {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(raw) {
            return SessionValue::Json(json);
        }
    }
    SessionValue::Str(raw.to_owned())
}

pub async fn run(provider: &SessionStateProvider, args: &SetArgs) -> anyhow::Result<()> {
    let mut request = provider.begin_request();
    let result = request.get_item_exclusive(&args.session_id).await?;

    let (mut data, lock_id, new_item) = match result.status {
        LockStatus::Acquired => (
            result.data.unwrap_or_else(|| {
                provider.create_new_store_data(provider.config().session_timeout())
            }),
            result.lock_id,
            false,
        ),
        LockStatus::NotFound => (
            provider.create_new_store_data(provider.config().session_timeout()),
            None,
            true,
        ),
        LockStatus::Locked => anyhow::bail!(
            "session {} is locked by {}",
            args.session_id,
            result.lock_id.unwrap_or_default()
        ),
    };

    for (key, value) in &args.assignments {
        data.items.set(key, value.clone());
    }
    for key in &args.deletions {
        data.items.remove(key);
    }
    request
        .set_and_release_item_exclusive(&args.session_id, &mut data, lock_id.as_deref(), new_item)
        .await?;
    request.end_request().await?;

    println!(
        "{} session {}: {} set, {} deleted.",
        if new_item { "Created" } else { "Updated" },
        args.session_id,
        args.assignments.len(),
        args.deletions.len()
    );
    Ok(())
}
