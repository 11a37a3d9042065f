use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cropwatch::api::{self, AppState, Clock};
use cropwatch::wiring::build_agent;
use cropwatch_core::config::Settings;
use cropwatch_core::db;
use cropwatch_core::detections::PgDetectionRepository;
use cropwatch_core::executor::PgQueryExecutor;
use cropwatch_core::llm::ChatMessage;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Cropwatch farm monitoring API and assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API server
    Serve(ServeArgs),
    /// Run database migrations
    Migrate,
    /// Ask the farm assistant a single question
    Ask(AskArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Address to listen on (overrides CROPWATCH_BIND / PORT)
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Skip running migrations before serving
    #[arg(long)]
    skip_migrations: bool,
}

#[derive(Args, Debug)]
struct AskArgs {
    question: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env().context("failed to load configuration")?;

    match cli.command {
        Command::Serve(args) => serve(settings, args).await,
        Command::Migrate => {
            let pool = db::connect_lazy(&settings.database)?;
            db::run_migrations(&pool)
                .await
                .context("failed to apply migrations")?;
            info!("Database migrations applied");
            db::shutdown(pool).await;
            Ok(())
        }
        Command::Ask(args) => {
            let pool = db::connect_lazy(&settings.database)?;
            let agent = build_agent(&settings.llm, Arc::new(PgQueryExecutor::new(pool.clone())))?;
            let reply = agent
                .respond(&[ChatMessage::user(args.question)])
                .await
                .context("agent failed to answer")?;
            println!("{}", reply.content);
            db::shutdown(pool).await;
            Ok(())
        }
    }
}

async fn serve(settings: Settings, args: ServeArgs) -> Result<()> {
    let pool = db::connect_lazy(&settings.database)?;
    if args.skip_migrations {
        warn!("Skipping migrations before serving");
    } else {
        db::run_migrations(&pool)
            .await
            .context("failed to apply migrations")?;
    }

    let agent = build_agent(&settings.llm, Arc::new(PgQueryExecutor::new(pool.clone())))?;
    let state = AppState {
        repository: Arc::new(PgDetectionRepository::new(pool.clone())),
        agent: Arc::new(agent),
        timezone: settings.device_timezone,
        clock: Clock::System,
    };

    let bind = args.bind.unwrap_or(settings.bind);
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(
        addr = %listener.local_addr()?,
        timezone = settings.device_timezone.name(),
        "listening"
    );

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db::shutdown(pool).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
