use std::{sync::Arc, time::Duration};

use command_bus::{
    handlers::{default_registry, ServerContext},
    Dispatcher,
};
use common::{
    broker::{redis_broker::RedisBroker, BrokerTransport},
    utils::config::get_config,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;

    let broker: Arc<dyn BrokerTransport> = Arc::new(RedisBroker::new(&config.broker_url)?);
    let context = Arc::new(ServerContext::new(config.data_dir()));
    let registry = default_registry(context);
    info!(
        server_name = %config.server_name,
        data_dir = %config.data_dir,
        commands = ?registry.command_ids(),
        concurrency = config.dispatcher_concurrency,
        "command dispatcher starting"
    );

    let dispatcher = Dispatcher::new(
        broker,
        &config.server_name,
        registry,
        config.dispatcher_concurrency,
        Duration::from_secs(config.dispatcher_poll_timeout_secs),
    )
    .with_reply_ttl(Duration::from_secs(config.dispatcher_reply_ttl_secs));

    dispatcher
        .run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!(error = %err, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!("command dispatcher stopped");
    Ok(())
}
