//! Wires the relay together and runs it until Ctrl-C.

use std::{sync::Arc, time::Duration};

use {
    anyhow::Result,
    herald_channels::{
        DeliveryPipeline, DeliverySettings, Destination, DiscoveryEngine, EventDispatcher,
        MessageRouter, ReconciliationPoller, SourceApi, SourceEventSink, StateStore,
        SubscriptionRegistry, ThreadManager, WorkerPool,
    },
    herald_config::{HeraldConfig, Severity, validate},
    herald_discord::{DiscordRest, GatewayConnection, GatewaySettings},
    herald_telegram::TelegramDestination,
    tokio_util::{sync::CancellationToken, task::TaskTracker},
    tracing::{error, info, warn},
};

/// How long in-flight deliveries may run after shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

pub async fn run(config: HeraldConfig) -> Result<()> {
    let report = validate(&config);
    for diagnostic in &report.diagnostics {
        match diagnostic.severity {
            Severity::Error => error!(path = %diagnostic.path, "{}", diagnostic.message),
            Severity::Warning => warn!(path = %diagnostic.path, "{}", diagnostic.message),
        }
    }
    if report.has_errors() {
        anyhow::bail!(
            "configuration has {} error(s); run `herald check-config` for details",
            report.count(Severity::Error)
        );
    }

    let store = Arc::new(StateStore::open(config.state.path.clone()).await?);

    let registry = Arc::new(SubscriptionRegistry::new(Arc::clone(&store)));
    registry.seed(&config.seed).await;
    registry.restore().await;

    let destination: Arc<dyn Destination> =
        Arc::new(TelegramDestination::from_config(&config.telegram)?);
    let threads = Arc::new(ThreadManager::new(
        Arc::clone(&destination),
        Arc::clone(&store),
    ));
    threads.restore().await;

    let pipeline = Arc::new(DeliveryPipeline::new(
        destination,
        Arc::clone(&threads),
        Arc::clone(&store),
        DeliverySettings::from_config(&config),
    ));
    let router = Arc::new(MessageRouter::new(Arc::clone(&registry)));

    let clients: Vec<Arc<DiscordRest>> = config
        .discord
        .tokens
        .iter()
        .enumerate()
        .map(|(i, token)| {
            Arc::new(DiscordRest::new(
                format!("discord#{}", i + 1),
                token.clone(),
                &config.discord.api_base,
            ))
        })
        .collect();
    let sources: Vec<Arc<dyn SourceApi>> = clients
        .iter()
        .map(|c| Arc::clone(c) as Arc<dyn SourceApi>)
        .collect();

    let discovery = Arc::new(DiscoveryEngine::new(
        Arc::clone(&registry),
        threads,
        Arc::clone(&pipeline),
        Arc::clone(&router),
        sources.clone(),
        config.discovery.clone(),
    ));
    let pool = Arc::new(WorkerPool::new(
        config.delivery.workers,
        config.delivery.queue_capacity,
    ));
    let dispatcher = Arc::new(EventDispatcher::new(
        Arc::clone(&router),
        Arc::clone(&pipeline),
        Arc::clone(&discovery),
        Arc::clone(&pool),
    ));
    let poller = Arc::new(ReconciliationPoller::new(
        registry,
        router,
        pipeline,
        store,
        sources,
        config.poll.clone(),
    ));

    let gateway_url = match (&config.discord.gateway_url, clients.first()) {
        (Some(url), _) => url.clone(),
        (None, Some(client)) => client.gateway_url().await,
        (None, None) => anyhow::bail!("no discord credentials configured"),
    };

    let cancel = CancellationToken::new();
    let tasks = TaskTracker::new();
    for (token, client) in config.discord.tokens.iter().zip(&clients) {
        let connection = GatewayConnection::new(
            token.clone(),
            GatewaySettings::from_config(&config.discord, gateway_url.clone()),
            Arc::clone(&dispatcher) as Arc<dyn SourceEventSink>,
            Arc::clone(client) as Arc<dyn SourceApi>,
        );
        let cancel = cancel.clone();
        tasks.spawn(async move { connection.run(cancel).await });
    }
    tasks.spawn(Arc::clone(&discovery).run(cancel.clone()));
    tasks.spawn(poller.run(cancel.clone()));
    tasks.close();

    info!(
        credentials = clients.len(),
        chat_id = %config.telegram.chat_id,
        poll = config.poll.enabled,
        "herald running"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c, shutting down");
    }
    info!("shutting down");

    cancel.cancel();
    tasks.wait().await;

    // Connections are gone, so nothing new arrives. Let discovery work and
    // queued deliveries finish within one grace period.
    dispatcher.close();
    pool.close();
    let drained = async {
        dispatcher.wait().await;
        pool.wait().await;
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drained).await.is_err() {
        warn!(
            discovery = dispatcher.pending(),
            deliveries = pool.pending(),
            "in-flight work abandoned at shutdown"
        );
    }
    info!("shutdown complete");
    Ok(())
}
