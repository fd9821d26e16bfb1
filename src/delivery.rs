use reqwest::blocking::Client;
use tracing::{error, info, warn};

use crate::config::DeliverySettings;
use crate::error::DeliveryError;
use crate::notify::OutboundMessage;
use crate::retry::RetryPolicy;

/// Sink for formatted messages. `channel` is the address of one destination,
/// for webhooks the full URL. One call is one attempt.
pub trait Deliver {
    fn deliver(&self, channel: &str, message: &OutboundMessage) -> Result<(), DeliveryError>;
}

pub struct WebhookSink {
    client: Client,
}

impl WebhookSink {
    pub fn new(settings: &DeliverySettings) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(settings.timeout()).build()?;
        Ok(Self { client })
    }
}

impl Deliver for WebhookSink {
    fn deliver(&self, channel: &str, message: &OutboundMessage) -> Result<(), DeliveryError> {
        let response = self.client.post(channel).json(message).send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Primary channel gave up; the default channel took the message.
    DeliveredToFallback,
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        !matches!(self, DeliveryOutcome::Failed(_))
    }
}

/// Bounded retries per channel, then one pass on the default channel.
pub struct Dispatcher<'a> {
    sink: &'a dyn Deliver,
    retry: RetryPolicy,
    default_channel: Option<&'a str>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(sink: &'a dyn Deliver, settings: &'a DeliverySettings) -> Self {
        Self {
            sink,
            retry: RetryPolicy::new(settings.attempts, settings.retry_delay()),
            default_channel: settings.default_channel.as_deref(),
        }
    }

    /// `channel` is the partition's own channel, if any.
    pub fn send(&self, channel: Option<&str>, message: &OutboundMessage) -> DeliveryOutcome {
        let Some(primary) = channel.or(self.default_channel) else {
            let e = DeliveryError::NoChannel(message.partition.clone());
            error!(partition = %message.partition, error = %e, "message dropped");
            return DeliveryOutcome::Failed(e.to_string());
        };

        let first_error = match self.attempt(primary, message) {
            Ok(()) => {
                info!(partition = %message.partition, records = message.fingerprints.len(), "message delivered");
                return DeliveryOutcome::Delivered;
            }
            Err(e) => e,
        };

        match self.default_channel.filter(|fallback| *fallback != primary) {
            Some(fallback) => {
                warn!(
                    partition = %message.partition,
                    error = %first_error,
                    "partition channel failed, trying default channel"
                );
                match self.attempt(fallback, message) {
                    Ok(()) => {
                        info!(partition = %message.partition, "message delivered to default channel");
                        DeliveryOutcome::DeliveredToFallback
                    }
                    Err(e) => {
                        error!(partition = %message.partition, error = %e, "default channel failed, message dropped");
                        DeliveryOutcome::Failed(e.to_string())
                    }
                }
            }
            None => {
                error!(partition = %message.partition, error = %first_error, "message dropped");
                DeliveryOutcome::Failed(first_error.to_string())
            }
        }
    }

    fn attempt(&self, channel: &str, message: &OutboundMessage) -> Result<(), DeliveryError> {
        self.retry.run(
            "deliver",
            |_| self.sink.deliver(channel, message),
            DeliveryError::is_retryable,
        )
    }
}
