//! Fan-out of trading alerts to eligible recipients

use super::alert_format::format_alert;
use crate::directory::RecipientDirectory;
use crate::error::{BridgeError, Result};
use crate::session::MessageSender;
use bridge_types::{Alert, BroadcastResult};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

pub struct BroadcastEngine {
    directory: Arc<dyn RecipientDirectory>,
    sender: Arc<dyn MessageSender>,
    lookup_timeout: Duration,
}

impl BroadcastEngine {
    pub fn new(
        directory: Arc<dyn RecipientDirectory>,
        sender: Arc<dyn MessageSender>,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            sender,
            lookup_timeout,
        }
    }

    /// Send one alert to every eligible recipient.
    ///
    /// Recipients are contacted one after another; a failed send is logged and
    /// the next recipient is still tried. Only the directory lookup can fail the
    /// whole broadcast.
    pub async fn broadcast(&self, alert: &Alert) -> Result<BroadcastResult> {
        let started = Instant::now();
        log::info!("Broadcasting alert for {}", alert.ticker);

        let recipients = match timeout(self.lookup_timeout, self.directory.list_eligible()).await {
            Ok(Ok(recipients)) => recipients,
            Ok(Err(e @ BridgeError::Directory(_))) => return Err(e),
            Ok(Err(e)) => return Err(BridgeError::Directory(e.to_string())),
            Err(_) => {
                return Err(BridgeError::Timeout(format!(
                    "listing eligible recipients took longer than {:?}",
                    self.lookup_timeout
                )))
            }
        };

        if recipients.is_empty() {
            log::warn!("No eligible recipients for {} alert", alert.ticker);
            return Ok(BroadcastResult {
                ticker: alert.ticker.clone(),
                recipients_notified: 0,
                recipients_targeted: 0,
                generated_at: Utc::now(),
                processing_duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        let body = format_alert(alert);
        let mut notified = 0;

        for recipient in &recipients {
            match self.sender.send_message(&recipient.address, &body).await {
                Ok(()) => {
                    notified += 1;
                    log::debug!("Alert {} sent to {}", alert.ticker, recipient.name);
                }
                Err(e) => {
                    log::error!(
                        "Failed to send {} alert to {} ({}): {}",
                        alert.ticker,
                        recipient.name,
                        recipient.address,
                        e
                    );
                }
            }
        }

        let result = BroadcastResult {
            ticker: alert.ticker.clone(),
            recipients_notified: notified,
            recipients_targeted: recipients.len(),
            generated_at: Utc::now(),
            processing_duration_ms: started.elapsed().as_millis() as u64,
        };

        log::info!(
            "Alert {} delivered to {}/{} recipients in {}ms",
            result.ticker,
            result.recipients_notified,
            result.recipients_targeted,
            result.processing_duration_ms
        );

        Ok(result)
    }
}
