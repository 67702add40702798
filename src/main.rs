use anyhow::Context;
use clap::Parser;
use leaguesync::adapters::{CredentialStore, LeagueStore, MemoryStore, PostgresStore};
use leaguesync::cli::{self, CatalogCommands, Cli, Commands};
use leaguesync::collector::{ExternalAgent, FileCollector, SnapshotCollector};
use leaguesync::config::{AppConfig, LoggingConfig};
use leaguesync::orchestrator::RunOrchestrator;
use leaguesync::resolver::import_catalog;
use leaguesync::scheduler::TacticsCaptureWorker;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Store handles for the selected backend
struct Backend {
    store: Arc<dyn LeagueStore>,
    credentials: Arc<dyn CredentialStore>,
    postgres: Option<PostgresStore>,
    memory: Option<Arc<MemoryStore>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match AppConfig::load_from(&cli.config) {
        Ok(mut c) => {
            c.dry_run.enabled |= cli.dry_run;
            c
        }
        Err(e) => {
            eprintln!("Failed to load configuration: {e}; using defaults");
            AppConfig::default_config(cli.dry_run)
        }
    };

    init_logging(&config.logging);

    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        anyhow::bail!("configuration has {} error(s)", errors.len());
    }

    let backend = connect(&config).await?;

    match cli.command {
        Commands::Migrate => match &backend.postgres {
            Some(pg) => pg.migrate().await.context("running migrations")?,
            None => info!("Dry run: in-memory store needs no migrations"),
        },
        Commands::Catalog {
            command: CatalogCommands::Import { file },
        } => {
            let count = import_catalog(backend.store.as_ref(), &file)
                .await
                .with_context(|| format!("importing {}", file.display()))?;
            println!("Imported {count} configuration type(s)");
        }
        Commands::Sync { user, snapshot } => {
            if let Some(memory) = &backend.memory {
                memory.add_user(user).await;
            }
            let collector: Arc<dyn SnapshotCollector> = match snapshot {
                Some(path) => Arc::new(FileCollector::new(path)),
                None => Arc::new(ExternalAgent::new(config.agent.clone())),
            };
            let orchestrator =
                RunOrchestrator::new(backend.store, backend.credentials, collector, &config);
            let report = orchestrator.run_user(user).await?;
            cli::print_run_report(&report);
        }
        Commands::SyncAll => {
            let collector = Arc::new(ExternalAgent::new(config.agent.clone()));
            let orchestrator =
                RunOrchestrator::new(backend.store, backend.credentials, collector, &config);

            let results = orchestrator.run_all().await?;
            let mut failures = 0;
            for (user_id, result) in &results {
                match result {
                    Ok(report) => cli::print_run_report(report),
                    Err(e) => {
                        failures += 1;
                        error!(%user_id, "Run failed: {}", e);
                    }
                }
            }
            info!(users = results.len(), failures, "Sync complete");
        }
        Commands::TacticsWorker { once } => {
            let worker = TacticsCaptureWorker::new(
                backend.store,
                Arc::new(ExternalAgent::new(config.agent.clone())),
                backend.credentials,
                config.scheduler.clone(),
            );

            if once {
                let report = worker.run_once(chrono::Utc::now()).await?;
                println!(
                    "claimed {}, completed {}, failed {}, expired {}",
                    report.claimed, report.completed, report.failed, report.expired
                );
            } else {
                let running = worker.stop_handle();
                tokio::select! {
                    _ = worker.run() => {},
                    _ = shutdown_signal() => {
                        info!("Shutdown signal received");
                        running.store(false, Ordering::SeqCst);
                    }
                }
            }
        }
        Commands::Links { user } => {
            let links = backend.store.list_links(user).await?;
            cli::print_links(user, &links);
        }
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> anyhow::Result<Backend> {
    if config.dry_run.enabled {
        warn!("Dry run: using in-memory store, nothing is persisted");
        let memory = Arc::new(MemoryStore::new());
        return Ok(Backend {
            store: memory.clone(),
            credentials: memory.clone(),
            postgres: None,
            memory: Some(memory),
        });
    }

    let pg = PostgresStore::new(&config.database.url, config.database.max_connections)
        .await
        .context("connecting to PostgreSQL")?;
    pg.migrate().await.context("running migrations")?;

    Ok(Backend {
        store: Arc::new(pg.clone()),
        credentials: Arc::new(pg.clone()),
        postgres: Some(pg),
        memory: None,
    })
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},leaguesync=debug,sqlx=warn", config.level))
    });

    let log_dir = std::env::var("LEAGUESYNC_LOG_DIR")
        .or_else(|_| std::env::var("LOG_DIR"))
        .unwrap_or_else(|_| "./logs".to_string());

    // `rolling::daily` panics if the first file cannot be created, so check writability first
    let file_layer = if std::fs::create_dir_all(&log_dir).is_ok() {
        let test_path = std::path::Path::new(&log_dir).join(".leaguesync_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(&log_dir, "leaguesync.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    } else {
        eprintln!(
            "Warning: Could not create log directory {}, file logging disabled",
            log_dir
        );
        None
    };

    let (json_layer, text_layer) = if config.json {
        (Some(tracing_subscriber::fmt::layer().json().with_target(true)), None)
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
