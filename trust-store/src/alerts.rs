//! Alerting sink for anomalies found while walking chains of trust.
//!
//! Sinks are fire-and-forget: a failing sink is logged by the caller and
//! never changes the result of an evaluation. A `TrustStore` delivers
//! anomalies after releasing its lock, so a sink may read the store.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::models::AnomalyKind;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Alert channel closed")]
    ChannelClosed,

    #[error("Alert delivery failed: {0}")]
    DeliveryFailed(String),
}

#[cfg_attr(test, mockall::automock)]
pub trait AlertSink: Send + Sync {
    fn notify_anomaly(
        &self,
        kind: AnomalyKind,
        certificate_key_id: &str,
        details: &str,
    ) -> Result<(), AlertError>;
}

/// Emits anomalies as structured `tracing` warnings.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn notify_anomaly(
        &self,
        kind: AnomalyKind,
        certificate_key_id: &str,
        details: &str,
    ) -> Result<(), AlertError> {
        tracing::warn!(
            anomaly = %kind,
            key_id = certificate_key_id,
            details = details,
            "Trust store anomaly"
        );
        Ok(())
    }
}

/// Anomaly as delivered through a [`ChannelAlertSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub certificate_key_id: String,
    pub details: String,
}

/// Forwards anomalies to an unbounded channel for an external consumer.
#[derive(Debug, Clone)]
pub struct ChannelAlertSink {
    sender: mpsc::UnboundedSender<Anomaly>,
}

impl ChannelAlertSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Anomaly>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl AlertSink for ChannelAlertSink {
    fn notify_anomaly(
        &self,
        kind: AnomalyKind,
        certificate_key_id: &str,
        details: &str,
    ) -> Result<(), AlertError> {
        self.sender
            .send(Anomaly {
                kind,
                certificate_key_id: certificate_key_id.to_string(),
                details: details.to_string(),
            })
            .map_err(|_| AlertError::ChannelClosed)
    }
}
