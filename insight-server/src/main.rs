use std::sync::Arc;

use clap::Parser;
use insight_core::{
    Authenticator, GatewayError, InsightConfig, PgStore, ProviderGateway, RemoteAuthenticator,
};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use insight_server::http::{start_http_server, HttpState};
use insight_server::subsystems::analysis::Analyzer;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "insight.toml")]
    config: String,

    /// Check database connectivity and exit
    #[arg(long)]
    health: bool,

    /// Apply embedded migrations and exit
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match InsightConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging (RUST_LOG wins over service.log_level)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    // Connect to DB
    let pool = match insight_core::db::create_pool(&config.database).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match insight_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Insight DB health check passed");
        return Ok(());
    }

    if args.migrate {
        insight_core::db::run_migrations(&pool).await?;
        println!("✅ Migrations applied");
        return Ok(());
    }

    // Provider chain: running without any key is fatal
    let gateway = match ProviderGateway::from_config(&config.providers) {
        Ok(g) => Arc::new(g),
        Err(GatewayError::NoProviderConfigured) => {
            eprintln!(
                "No text-generation provider configured: set OPENAI_API_KEY, OPENSOURCE_API_KEY or GROK_API_KEY"
            );
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };
    tracing::info!(providers = ?gateway.provider_names(), "Provider chain ready");

    let authenticator: Arc<dyn Authenticator> = Arc::new(RemoteAuthenticator::new(&config.auth)?);
    let store = Arc::new(PgStore::new(
        pool.clone(),
        config.database.statement_timeout_ms,
    ));

    let analyzer = Analyzer::new(
        authenticator,
        gateway,
        store.clone(),
        store,
        &config.analysis,
    );
    let state = Arc::new(HttpState {
        analyzer,
        pool: Some(pool),
    });

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let addr = format!("{}:{}", config.http.host, config.http.port);
    start_http_server(state, &addr, tx.subscribe()).await?;

    Ok(())
}
