use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use innkeep::clock::SystemClock;
use innkeep::config::Config;
use innkeep::drafts::DraftStore;
use innkeep::engine::Engine;
use innkeep::front_desk::{FrontDesk, MailSettings};
use innkeep::mail::{self, LogSink, Mailer};
use innkeep::reaper;
use innkeep::repository::Repository;
use innkeep::wire::{self, InnkeepFactory};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::load()?;
    innkeep::observability::init(config.metrics_port)?;

    let tls_acceptor =
        innkeep::tls::load_tls_acceptor(config.tls_cert.as_deref(), config.tls_key.as_deref())?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let clock = Arc::new(SystemClock);
    let engine = Arc::new(
        Engine::open_with_clock(&config.wal_path(), clock.clone())?
            .with_store_timeout(config.store_timeout()),
    );
    let drafts = Arc::new(DraftStore::new(config.draft_ttl(), clock));

    let (mailer, mail_rx) = Mailer::new(config.mail_queue_size);
    let mail_task = tokio::spawn(mail::run_mail_listener(mail_rx, Arc::new(LogSink)));

    tokio::spawn(reaper::run_draft_sweeper(
        drafts.clone(),
        reaper::DRAFT_SWEEP_INTERVAL,
    ));
    tokio::spawn(reaper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        reaper::COMPACT_CHECK_INTERVAL,
    ));

    let repo: Arc<dyn Repository> = engine.clone();
    let desk = Arc::new(FrontDesk::new(
        repo.clone(),
        drafts,
        mailer,
        MailSettings {
            from: config.mail_from.clone(),
            owner: config.owner_email.clone(),
            template: config.mail_template.clone(),
        },
    ));
    let factory = Arc::new(InnkeepFactory::new(repo, desk, config.password.clone()));

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("innkeep listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  store_timeout: {:?}", config.store_timeout());
    info!("  tls: {}", if tls_acceptor.is_some() { "enabled" } else { "disabled" });

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(innkeep::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(innkeep::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(innkeep::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let factory = factory.clone();
                let tls = tls_acceptor.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, factory, tls).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(innkeep::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    // Dropping the factory drops the last mailer so the listener can finish.
    drop(factory);
    if tokio::time::timeout(std::time::Duration::from_secs(2), mail_task).await.is_err() {
        tracing::warn!("mail queue not drained before exit");
    }

    info!("innkeep stopped");
    Ok(())
}
