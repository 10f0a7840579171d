//! Hearth - connect one shard with configuration from the environment and
//! log what happens.

use hearth_client::{init_tracing, BoxError, Client, ClientConfig, ClientError};

#[tokio::main]
async fn main() -> Result<(), ClientError> {
    init_tracing("hearth_client=info");

    let config = ClientConfig::from_env()?;
    let client = Client::new(config);

    let ready_client = client.clone();
    client.on("ready", move |_| {
        let client = ready_client.clone();
        async move {
            let user = client.current_user()?;
            tracing::info!(
                user = %user.username,
                guilds = client.guilds().len(),
                "ready"
            );
            Ok::<(), BoxError>(())
        }
    });
    client.on("guild_create", |event| async move {
        tracing::info!(guild = %event.data["name"], "guild available");
        Ok::<(), BoxError>(())
    });
    client.on_error(|failure| async move {
        tracing::error!(event = %failure.event, error = %failure.error, "handler failed");
    });

    let shutdown = client.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down");
            shutdown.close().await;
        }
    });

    client.run().await
}
