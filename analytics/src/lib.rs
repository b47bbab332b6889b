//! Agma analytics for auctions.
//!
//! [`AnalyticsModule::start`] wires the pieces together: an [`HttpSender`]
//! posting to the collector, a [`BufferController`] batching events, and
//! an [`AgmaLogger`] that the auction dispatcher reports to.

pub mod agma;
pub mod buffer;
pub mod config;
pub mod controller;
pub mod metrics_defs;
pub mod sender;

#[cfg(test)]
mod testutils;

use auction::analytics::AnalyticsSink;
use std::sync::Arc;
use tokio::task::JoinHandle;

use agma::{AgmaLogger, AllowAll, Clock, ConsentGate, RequireConsentString};
use controller::{AnalyticsHandle, BufferController};
use sender::HttpSender;

pub use config::{AnalyticsConfig, ConfigError};
pub use controller::ControllerError;

/// A running analytics pipeline.
pub struct AnalyticsModule {
    logger: Arc<AgmaLogger>,
    handle: AnalyticsHandle,
    task: JoinHandle<()>,
}

impl AnalyticsModule {
    /// Validates `config` and starts the buffer controller.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &AnalyticsConfig, client: reqwest::Client) -> Result<Self, ConfigError> {
        Self::start_with_clock(config, client, chrono::Utc::now)
    }

    fn start_with_clock(
        config: &AnalyticsConfig,
        client: reqwest::Client,
        clock: Clock,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let sender = Arc::new(HttpSender::new(client, &config.endpoint));
        let (handle, task) = BufferController::spawn(config.buffers.flush_limits(), config.queue, sender);

        let consent: Arc<dyn ConsentGate> = if config.require_consent {
            Arc::new(RequireConsentString)
        } else {
            Arc::new(AllowAll)
        };
        let logger = AgmaLogger::new(config, handle.clone(), consent)?.with_clock(clock);

        tracing::info!(
            endpoint = %config.endpoint.url,
            accounts = config.accounts.len(),
            "Agma analytics started"
        );

        Ok(Self {
            logger: Arc::new(logger),
            handle,
            task,
        })
    }

    pub fn sink(&self) -> Arc<dyn AnalyticsSink> {
        self.logger.clone()
    }

    /// Flushes buffered events and waits until every batch has been sent.
    pub async fn shutdown(self) -> Result<(), ControllerError> {
        self.handle.shutdown().await?;
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Analytics controller task failed");
        }
        Ok(())
    }
}
