use anyhow::{Context, anyhow};
use tokio::signal;
use tracing::{error, info};

use digest_worker::{
    app::{ComponentRegistry, database_pool},
    config::Config,
    digest::DigestId,
    observability::Telemetry,
    store::{CandidateStore, PgCandidateStore, run_migrations},
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(String::as_str)
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(message, "panic occurred without location information");
        }
    }));

    let config = Config::from_env().context("failed to load configuration")?;
    let mut args = std::env::args().skip(1);

    match args.next().as_deref() {
        None => run_worker(config).await,
        Some("migrate") => migrate(&config).await,
        Some("show-digest") => {
            let raw = args
                .next()
                .ok_or_else(|| anyhow!("usage: digest-worker show-digest <id>"))?;
            let digest_id: DigestId = raw
                .parse()
                .with_context(|| format!("invalid digest id: {raw}"))?;
            show_digest(&config, digest_id).await
        }
        Some(other) => Err(anyhow!(
            "unknown subcommand {other:?} (expected `migrate` or `show-digest <id>`)"
        )),
    }
}

async fn run_worker(config: Config) -> anyhow::Result<()> {
    let registry = ComponentRegistry::build(config)
        .await
        .context("failed to build component registry")?;
    let processed = registry.run(shutdown_signal()).await?;
    info!(processed, "digest worker stopped");
    Ok(())
}

async fn migrate(config: &Config) -> anyhow::Result<()> {
    let telemetry = Telemetry::new(config)?;
    let pool = database_pool(config);
    let outcome = run_migrations(&pool).await;
    if outcome.is_ok() {
        info!("database migrations applied");
    }
    telemetry.shutdown();
    outcome
}

async fn show_digest(config: &Config, digest_id: DigestId) -> anyhow::Result<()> {
    let telemetry = Telemetry::new(config)?;
    let store = PgCandidateStore::new(database_pool(config));
    let outcome = store.read_digest(digest_id).await;
    telemetry.shutdown();
    let digest = outcome?.ok_or_else(|| anyhow!("digest {digest_id} not found"))?;
    println!("{}", serde_json::to_string_pretty(&digest)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received SIGINT, stopping trigger loop"),
        () = terminate => info!("received SIGTERM, stopping trigger loop"),
    }
}
