use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, model::id::UserId, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use shuwy::{
    audio::lavalink::{probe_node, LavalinkClient},
    bot::{platform::SerenityPlatform, RegistryKey, ShuwyBot},
    config::Config,
    session::{SessionDeps, SessionRegistry, SessionSettings},
    storage::JsonStorage,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shuwy=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando shuwy v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("{}", config.summary());

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    let storage = Arc::new(JsonStorage::new(config.data_dir.clone(), config.max_favourites).await?);
    match storage.stats().await {
        Ok(stats) => info!("{}", stats),
        Err(e) => warn!("⚠️ No se pudieron leer estadísticas de storage: {}", e),
    }

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS
        | GatewayIntents::GUILD_MEMBERS;

    let songbird = Songbird::serenity();
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(ShuwyBot::new(config.clone()))
        .register_songbird_with(songbird.clone())
        .await?;

    // Nodos Lavalink
    info!("🎼 Inicializando Lavalink ({} nodos)...", config.lavalink_nodes.len());
    let shutdown = CancellationToken::new();
    let lavalink = Arc::new(LavalinkClient::new(
        &config.lavalink_nodes,
        UserId::new(config.application_id),
        songbird,
        shutdown.clone(),
    ));
    let node_events = lavalink.start();

    let registry = SessionRegistry::new(SessionDeps {
        node: lavalink,
        platform: Arc::new(SerenityPlatform::new(
            client.cache.clone(),
            client.http.clone(),
        )),
        favourites: storage,
        settings: SessionSettings::from(&config),
    });
    client
        .data
        .write()
        .await
        .insert::<RegistryKey>(registry.clone());

    tokio::spawn(registry.clone().run_event_pump(node_events, shutdown.clone()));

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        registry.shutdown_all().await;
        shutdown.cancel();
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

/// Prints `OK` when every configured node answers its version endpoint.
async fn health_check(config: &Config) -> Result<()> {
    let http = reqwest::Client::new();
    for node in &config.lavalink_nodes {
        let version = probe_node(&http, node).await?;
        info!("✅ Node {} answered with Lavalink {}", node.id, version);
    }
    println!("OK");
    Ok(())
}
