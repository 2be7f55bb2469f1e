use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::sync::watch;

use cowin_scan::{
    CowinClient, EmailConfig, NotificationServiceImpl, Recipient, ScanExecutor, create_email_service,
    load_recipients,
};
use slot_store::CacheStore;

use crate::cli::Cli;

/// Wires the CoWin client, snapshot cache and mailer into a scan executor
pub struct ScanManager {
    executor: ScanExecutor,
}

impl ScanManager {
    /// Build every component from the command line and environment.
    ///
    /// Fails before anything is polled if the filters are invalid, no recipient is
    /// configured or the mail provider rejects the credentials.
    pub async fn start(cli: &Cli) -> anyhow::Result<Self> {
        let criteria = cli.criteria().context("Invalid search filters")?;
        log::info!("🔎 Searching {}", criteria.location);

        let recipients = collect_recipients(cli)?;
        log::info!("👥 {} recipients", recipients.len());

        let email_config = EmailConfig::from_env().context("Invalid email configuration")?;
        let email_service = create_email_service(&email_config).await?;
        email_service
            .verify_credentials()
            .await
            .context("Email credentials were rejected")?;
        log::info!("📧 Email service ready ({:?})", email_config.provider);

        let store = CacheStore::open(&cli.cache)
            .await
            .with_context(|| format!("Failed to open cache {}", cli.cache.display()))?;
        log::info!("🗃️ Cache opened at {}", cli.cache.display());

        let fetcher = CowinClient::new()?;
        let notification_service = NotificationServiceImpl::new(email_service, recipients);

        let executor = ScanExecutor::new(
            Arc::new(fetcher),
            Arc::new(store),
            Arc::new(notification_service),
            criteria,
            Some(cli.executor_config()),
        );

        Ok(Self { executor })
    }

    /// Poll until Ctrl-C, or once with `--once`.
    pub async fn run(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    log::info!("🛑 Ctrl-C received, stopping after the current check");
                    let _ = shutdown_tx.send(true);
                }
                Err(e) => log::error!("❌ Failed to listen for Ctrl-C: {}", e),
            }
        });

        self.executor.run(shutdown_rx).await?;
        Ok(())
    }
}

/// Recipients from the recipients file (when present) followed by every `--to`
fn collect_recipients(cli: &Cli) -> anyhow::Result<Vec<Recipient>> {
    let mut recipients = if cli.recipients.exists() {
        load_recipients(&cli.recipients)?
    } else {
        if cli.to.is_empty() {
            bail!(
                "Recipients file {} not found and no --to given",
                cli.recipients.display()
            );
        }
        Vec::new()
    };

    for line in &cli.to {
        recipients.push(line.parse::<Recipient>().context("Invalid --to recipient")?);
    }

    if recipients.is_empty() {
        bail!("No recipients configured");
    }
    Ok(recipients)
}
