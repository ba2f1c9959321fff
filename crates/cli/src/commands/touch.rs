use clap::Args;
use sessionlock_provider::SessionStateProvider;

#[derive(Args, Debug)]
pub struct TouchArgs {
    /// Session id.
    pub session_id: String,
}

pub async fn run(provider: &SessionStateProvider, args: &TouchArgs) -> anyhow::Result<()> {
    let mut request = provider.begin_request();
    request.reset_item_timeout(&args.session_id).await?;
    match provider.time_to_live(&args.session_id).await? {
        Some(ttl) => println!("Session {} expires in {}s.", args.session_id, ttl.as_secs()),
        None => println!("Session {} does not exist.", args.session_id),
    }
    Ok(())
}
