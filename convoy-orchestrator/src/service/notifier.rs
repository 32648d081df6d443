//! Webhook notifications
//!
//! Subscribes to lifecycle and pipeline events and posts the interesting
//! ones to a webhook. Delivery is best effort: failures are logged and
//! dropped, and nothing ever waits on a webhook.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::service::lifecycle::LifecycleEvent;
use crate::service::orchestrator::PipelineEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    fn new(event: &str, message: String) -> Self {
        Self {
            event: event.to_string(),
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn from_lifecycle(event: &LifecycleEvent) -> Option<Self> {
        match event {
            LifecycleEvent::WorkComplete { grace_secs } => Some(Self::new(
                "work_complete",
                format!(
                    "All work complete, shutting down in {}s unless new work arrives",
                    grace_secs
                ),
            )),
            LifecycleEvent::ShuttingDown { reason, .. } => Some(Self::new(
                "shutting_down",
                format!("Host shutting down: {}", reason),
            )),
            _ => None,
        }
    }

    pub fn from_pipeline(event: &PipelineEvent) -> Option<Self> {
        match event {
            PipelineEvent::Finished {
                pipeline_id,
                phase,
                error,
            } => {
                let message = match error {
                    Some(error) => format!("Pipeline {} {}: {}", pipeline_id, phase, error),
                    None => format!("Pipeline {} {}", pipeline_id, phase),
                };
                Some(Self::new("pipeline_finished", message))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Posts one notification; errors are only logged
    pub async fn deliver(&self, notification: &Notification) {
        match self.client.post(&self.url).json(notification).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("Delivered {} notification", notification.event)
            }
            Ok(response) => warn!(
                "Webhook rejected {} notification: {}",
                notification.event,
                response.status()
            ),
            Err(e) => warn!(
                "Failed to deliver {} notification: {}",
                notification.event, e
            ),
        }
    }

    fn dispatch(&self, notification: Notification) {
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.deliver(&notification).await;
        });
    }

    /// Forwards events until both channels close
    pub fn spawn(
        self,
        mut lifecycle: broadcast::Receiver<LifecycleEvent>,
        mut pipelines: broadcast::Receiver<PipelineEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut lifecycle_open = true;
            let mut pipelines_open = true;

            while lifecycle_open || pipelines_open {
                tokio::select! {
                    event = lifecycle.recv(), if lifecycle_open => match event {
                        Ok(event) => {
                            if let Some(n) = Notification::from_lifecycle(&event) {
                                self.dispatch(n);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Notifier skipped {} lifecycle events", skipped)
                        }
                        Err(RecvError::Closed) => lifecycle_open = false,
                    },
                    event = pipelines.recv(), if pipelines_open => match event {
                        Ok(event) => {
                            if let Some(n) = Notification::from_pipeline(&event) {
                                self.dispatch(n);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Notifier skipped {} pipeline events", skipped)
                        }
                        Err(RecvError::Closed) => pipelines_open = false,
                    },
                }
            }
            debug!("Notifier stopped");
        })
    }
}
