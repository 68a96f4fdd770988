use std::sync::Arc;

use futures::StreamExt;

use car_intake::catalog::CategoryCatalog;
use car_intake::channels::{ChatOutbound, TelegramChannel};
use car_intake::classify::Classifier;
use car_intake::config::Config;
use car_intake::contacts::ContactDirectory;
use car_intake::correlate::ReplyCorrelator;
use car_intake::intake::{IntakeDeps, IntakeMachine};
use car_intake::ledger::{Ledger, SheetsLedger};
use car_intake::notify::{spawn_reply_poller, Notifier, SmtpNotifier};
use car_intake::protocol::ProtocolGenerator;
use car_intake::registry::TicketRegistry;
use car_intake::summarize::{AgentSummarizer, Summarizer};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env()?;

    // Routing catalog: JSON override or the built-in table.
    let catalog = match &config.catalog_path {
        Some(path) => {
            let data = std::fs::read_to_string(path)?;
            let catalog = CategoryCatalog::from_json(&data)
                .map_err(|e| anyhow::anyhow!("invalid catalog file {}: {e}", path.display()))?;
            anyhow::ensure!(!catalog.is_empty(), "catalog file has no categories");
            catalog
        }
        None => CategoryCatalog::default_catalog(),
    };
    let catalog = Arc::new(catalog);

    eprintln!("📨 CAR Intake v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Categories: {}", catalog.len());
    eprintln!("   SMTP: {}", config.smtp.host);
    eprintln!(
        "   Reply mailbox: {}",
        config
            .imap
            .as_ref()
            .map_or("disabled".to_string(), |i| i.host.clone())
    );
    eprintln!(
        "   Summary agent: {}\n",
        if config.agent.is_some() {
            "enabled"
        } else {
            "local fallback only"
        }
    );

    let telegram = Arc::new(TelegramChannel::new(&config.telegram));
    telegram.health_check().await?;

    let chat: Arc<dyn ChatOutbound> = telegram.clone();
    let notifier: Arc<dyn Notifier> = Arc::new(SmtpNotifier::new(config.smtp.clone()));
    let ledger: Arc<dyn Ledger> = Arc::new(SheetsLedger::new(
        config.sheets.clone(),
        Arc::clone(&catalog),
    ));
    let registry = Arc::new(TicketRegistry::new());
    let contacts = Arc::new(ContactDirectory::new());

    let summarizer: Option<Arc<dyn Summarizer>> = match &config.agent {
        Some(agent_config) => match AgentSummarizer::new(agent_config.clone()) {
            Ok(agent) => Some(Arc::new(agent)),
            Err(e) => {
                tracing::warn!("Summary agent unavailable, using local fallback: {e}");
                None
            }
        },
        None => None,
    };

    let machine = Arc::new(IntakeMachine::new(IntakeDeps {
        catalog: Arc::clone(&catalog),
        classifier: Classifier::new(Arc::clone(&catalog)),
        generator: ProtocolGenerator::new(),
        registry: Arc::clone(&registry),
        contacts,
        chat: Arc::clone(&chat),
        notifier,
        ledger: Arc::clone(&ledger),
        summarizer,
    }));

    // Reply poller, when the inbound mailbox is configured.
    let poller = config.imap.clone().map(|imap_config| {
        let correlator = Arc::new(ReplyCorrelator::new(
            Arc::clone(&registry),
            Arc::clone(&chat),
            Arc::clone(&ledger),
        ));
        spawn_reply_poller(imap_config, correlator)
    });
    if poller.is_none() {
        tracing::warn!("IMAP_HOST not set; team replies will not reach conversations");
    }

    let mut events = telegram.start();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            maybe_event = events.next() => {
                let Some(event) = maybe_event else {
                    tracing::warn!("Telegram event stream closed");
                    break;
                };
                // Each event runs on its own task; per-conversation
                // ordering is enforced by the machine's state lock.
                let machine = Arc::clone(&machine);
                tokio::spawn(async move {
                    if let Err(e) = machine.handle_event(event).await {
                        tracing::error!("Event handling failed: {e}");
                    }
                });
            }
        }
    }

    if let Some((handle, shutdown)) = poller {
        shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
        handle.abort();
    }

    Ok(())
}
