use clap::Args;
use sessionlock_provider::{LockStatus, SessionStateProvider};

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Session id.
    pub session_id: String,

    /// Lock id to remove under; without it the lock is taken first.
    #[arg(long)]
    pub lock_id: Option<String>,
}

pub async fn run(provider: &SessionStateProvider, args: &RemoveArgs) -> anyhow::Result<()> {
    let mut request = provider.begin_request();
    let lock_id = match &args.lock_id {
        Some(lock_id) => lock_id.clone(),
        None => {
            let result = request.get_item_exclusive(&args.session_id).await?;
            match (result.status, result.lock_id) {
                (LockStatus::Acquired, Some(lock_id)) => lock_id,
                (LockStatus::Locked, Some(holder)) => {
                    anyhow::bail!("session {} is locked by {holder}", args.session_id)
                }
                _ => {
                    println!("Session {} does not exist.", args.session_id);
                    return Ok(());
                }
            }
        }
    };
    request.remove_item(&args.session_id, &lock_id).await?;
    println!("Removed session {}.", args.session_id);
    Ok(())
}
