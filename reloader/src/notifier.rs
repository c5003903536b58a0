/// Post-start notifications: a webhook GET and/or a shell hook.
///
/// Both are best-effort.  A failure is logged and never suppresses the other
/// action.
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{info, warn};

use crate::controller::Notify;

pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Notifier {
    webhook: Option<String>,
    hook: Option<String>,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(webhook: Option<String>, hook: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            // Webhooks point at listeners on this machine or a forwarded port.
            .no_proxy()
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            webhook,
            hook,
            client,
        })
    }

    pub async fn notify(&self) {
        if let Some(url) = &self.webhook {
            self.fire_webhook(url).await;
        }
        if let Some(hook) = &self.hook {
            run_hook(hook).await;
        }
    }

    async fn fire_webhook(&self, url: &str) {
        match self.client.get(url).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(%url, status = %resp.status(), "Webhook triggered");
            }
            Ok(resp) => warn!(%url, status = %resp.status(), "Webhook returned an error status"),
            Err(e) => warn!(%url, "Failed to trigger webhook: {e}"),
        }
    }
}

impl Notify for Notifier {
    async fn notify(&self) {
        Notifier::notify(self).await
    }
}

/// Runs `hook` through the shell to completion with inherited stdio.
async fn run_hook(hook: &str) {
    info!(%hook, "Running hook");
    #[cfg(unix)]
    let status = Command::new("sh").arg("-c").arg(hook).status().await;
    #[cfg(not(unix))]
    let status = Command::new("cmd").arg("/C").arg(hook).status().await;

    match status {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(%hook, %status, "Hook exited unsuccessfully"),
        Err(e) => warn!(%hook, "Failed to run hook: {e}"),
    }
}
