use std::path::Path;
use std::sync::Arc;

use mailroom::config::AppConfig;
use mailroom::gmail::{GmailApi, GmailHttpClient, TokenProvider};
use mailroom::ingest::Ingestor;
use mailroom::jobs;
use mailroom::server::{build_router, AppState};
use mailroom::store::{LibSqlBackend, MailStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep the non-blocking file writer alive for the process lifetime.
    let _log_guard = init_tracing();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("📬 Mailroom v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook: POST http://{}/notifications/gmail", config.server.bind_addr);
    eprintln!("   API: GET /api/messages, GET /api/mailboxes, GET /healthz");

    // ── Database ─────────────────────────────────────────────────────────
    let db = LibSqlBackend::new_local(Path::new(&config.database.path))
        .await
        .unwrap_or_else(|e| {
            eprintln!("Error: Failed to open database at {}: {e}", config.database.path);
            std::process::exit(1);
        });
    let store: Arc<dyn MailStore> = Arc::new(db);
    eprintln!("   Database: {}", config.database.path);

    // ── Gmail client ─────────────────────────────────────────────────────
    let tokens = Arc::new(TokenProvider::from_config(&config.gmail));
    let gmail: Arc<dyn GmailApi> =
        Arc::new(GmailHttpClient::new(&config.gmail.base_url, tokens));

    let ingestor = Arc::new(Ingestor::new(
        Arc::clone(&gmail),
        Arc::clone(&store),
        config.ingest.clone(),
    ));
    eprintln!(
        "   Delta backoff: {} attempts from {}ms",
        config.ingest.backoff_attempts,
        config.ingest.backoff_base.as_millis()
    );

    // ── Background jobs ──────────────────────────────────────────────────
    match config.watch.clone() {
        Some(watch_config) => {
            eprintln!(
                "   Watch renewal: enabled ({} → {})",
                watch_config.mailbox, watch_config.topic
            );
            let _watch_task =
                jobs::spawn_watch_renewal(Arc::clone(&gmail), Arc::clone(&store), watch_config);
        }
        None => eprintln!("   Watch renewal: disabled (GMAIL_PUBSUB_TOPIC not set)"),
    }

    let _sweep_task = jobs::spawn_retention_sweep(Arc::clone(&store), config.retention.clone());
    if config.retention.keep_days > 0 {
        eprintln!("   Retention: {} days", config.retention.keep_days);
    } else {
        eprintln!("   Retention: disabled");
    }

    // ── HTTP server ──────────────────────────────────────────────────────
    let app = build_router(AppState { store, ingestor });
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!(addr = %config.server.bind_addr, "HTTP server started");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Initialize tracing. When `MAILROOM_LOG_DIR` is set, log to a daily-rolled
/// file in that directory instead of stderr.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };

    if let Ok(dir) = std::env::var("MAILROOM_LOG_DIR") {
        let appender = tracing_appender::rolling::daily(dir, "mailroom.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .init();
        None
    }
}
