use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tokenguard::analyzer::Analyzer;
use tokenguard::config::Config;
use tokenguard::enforcer::{BlacklistClient, BlacklistEnforcer};
use tokenguard::monitor::confirmed::ConfirmedMonitor;
use tokenguard::monitor::mempool::MempoolMonitor;
use tokenguard::seed::{rules, watchlist};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=info for output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!("TokenGuard starting");

    // Load configuration; anything missing here is fatal, nothing later is.
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!(
        contract = %config.chain.contract_address,
        "Configuration loaded from {}",
        config_path
    );

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| eyre::eyre!("Failed to connect to database: {}", e))?;

    tracing::info!("Connected to PostgreSQL");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| eyre::eyre!("Failed to run migrations: {}", e))?;

    tracing::info!("Database migrations complete");

    // Seed rules and address lists from config
    let seeded = rules::seed_rules(&pool, &config.rules).await?;
    tracing::info!(rules = seeded, "Rules seeded");

    if !config.whitelist.is_empty() {
        let count = watchlist::seed_whitelist(&pool, &config.whitelist).await?;
        tracing::info!(count, "Whitelist seeded");
    }

    if !config.suspicious_addresses.is_empty() {
        let count = watchlist::seed_suspicious(&pool, &config.suspicious_addresses).await?;
        tracing::info!(count, "Suspicious addresses seeded");
    }

    if let Some(ref path) = config.suspicious_addresses_path {
        match watchlist::seed_suspicious_csv(&pool, path).await {
            Ok(count) => tracing::info!(count, "Watchlist CSV seeded"),
            Err(e) => tracing::warn!(error = %e, "Failed to seed watchlist CSV, continuing without"),
        }
    }

    // The blacklist capability is shared by the analyzer (immediate
    // high-severity enforcement) and the periodic enforcer.
    let blacklist = Arc::new(BlacklistClient::connect(
        &config.chain.http_url,
        &config.enforcer,
    )?);

    let analyzer = Analyzer::new(pool.clone(), config.analyzer.clone(), blacklist.clone()).await?;
    tracing::info!("Analyzer initialized");

    // Spawn API server
    if config.api.enabled {
        let api_pool = pool.clone();
        let host = config.api.host.clone();
        let port = config.api.port;
        tokio::spawn(async move {
            if let Err(e) = tokenguard::api::serve(api_pool, &host, port).await {
                tracing::error!(error = %e, "API server failed");
            }
        });
    }

    // Create shutdown signal
    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    // Analyzer: queue consumer + periodic sweep
    {
        let analyzer = analyzer.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = analyzer.run(shutdown).await {
                tracing::error!(error = %e, "Analyzer failed");
            }
        }));
    }

    // Confirmed-event monitor
    {
        let monitor = ConfirmedMonitor::new(pool.clone(), analyzer.clone(), config.chain.clone())?;
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = monitor.run(shutdown).await {
                tracing::error!(error = %e, "Confirmed-event monitor failed");
            }
        }));
    }

    // Mempool monitor with speculative execution
    if config.mempool.enabled {
        let monitor = MempoolMonitor::new(
            pool.clone(),
            analyzer.clone(),
            config.chain.clone(),
            config.mempool.clone(),
            config.sandbox.clone(),
        )?;
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = monitor.run(shutdown).await {
                tracing::error!(error = %e, "Mempool monitor failed");
            }
        }));
    }

    // Blacklist enforcer
    {
        let enforcer = BlacklistEnforcer::new(pool.clone(), blacklist, &config.enforcer);
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = enforcer.run(shutdown).await {
                tracing::error!(error = %e, "Blacklist enforcer failed");
            }
        }));
    }

    tracing::info!("All components started. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping all components...");
    shutdown.cancel();

    // Wait for all tasks to finish
    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("TokenGuard stopped gracefully");
    Ok(())
}
