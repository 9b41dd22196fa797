//! `herald reset`: the only way bindings and subscriptions are ever removed.

use std::sync::Arc;

use {
    anyhow::Result,
    clap::Args,
    herald_channels::{StateStore, SubscriptionRegistry, ThreadManager},
    herald_config::HeraldConfig,
    herald_telegram::TelegramDestination,
};

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Forget community → topic bindings. New topics are created on the next send.
    #[arg(long)]
    pub topics: bool,
    /// Drop discovered subscriptions, keeping only the configured seed.
    #[arg(long)]
    pub subscriptions: bool,
    /// Clear the delivery record.
    #[arg(long)]
    pub messages: bool,
}

pub async fn handle_reset(config: &HeraldConfig, args: ResetArgs) -> Result<()> {
    if !(args.topics || args.subscriptions || args.messages) {
        anyhow::bail!("nothing to reset: pass --topics, --subscriptions and/or --messages");
    }

    let store = Arc::new(StateStore::open(config.state.path.clone()).await?);

    if args.topics {
        let destination = Arc::new(TelegramDestination::from_config(&config.telegram)?);
        ThreadManager::new(destination, Arc::clone(&store))
            .reset()
            .await;
        println!("Cleared topic bindings.");
    }
    if args.subscriptions {
        SubscriptionRegistry::new(Arc::clone(&store))
            .reset(&config.seed)
            .await;
        println!("Cleared discovered subscriptions.");
    }
    if args.messages {
        let cleared = store
            .update(|s| {
                let n = s.messages.len();
                s.messages.clear();
                n
            })
            .await?;
        println!("Cleared {cleared} delivery record(s).");
    }

    println!("State file: {}", config.state.path.display());
    Ok(())
}
