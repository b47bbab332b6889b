//! Buffers analytics events and decides when to flush them.
//!
//! A single task owns the [`EventBuffer`]. Producers talk to it through an
//! [`AnalyticsHandle`], which forwards commands over one bounded, ordered
//! channel. A flush happens when any of these holds:
//! - the buffer holds `max_events` events
//! - the buffer holds `max_bytes` bytes
//! - `max_dwell` elapsed since the previous flush
//! - the controller shuts down
//!
//! Flushed batches are handed to a detached send task, so a slow collector
//! never holds up the buffer.

use bytes::Bytes;
use shared::{counter, histogram};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use std::time::Duration;
use tokio::time::Instant;

use crate::buffer::EventBuffer;
use crate::config::{FlushLimits, OverflowPolicy, QueueConfig};
use crate::metrics_defs::{
    BATCH_BYTES, BATCH_EVENTS, BATCH_SEND_FAILURES, BATCHES_FLUSHED, EVENTS_DROPPED,
    EVENTS_LOGGED,
};
use crate::sender::Sender;

/// Roughly 30 years.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Analytics buffer controller has stopped")]
    Stopped,
}

/// Snapshot of the buffer contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    pub events: usize,
    pub bytes: usize,
}

#[derive(Debug)]
enum Command {
    Event(Bytes),
    Stats(oneshot::Sender<BufferStats>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControllerState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushReason {
    EventCount,
    BufferSize,
    Interval,
    Shutdown,
}

impl FlushReason {
    fn as_str(&self) -> &'static str {
        match self {
            FlushReason::EventCount => "event_count",
            FlushReason::BufferSize => "buffer_size",
            FlushReason::Interval => "interval",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

/// Cheap to clone. Every clone feeds the same controller.
#[derive(Clone)]
pub struct AnalyticsHandle {
    commands: mpsc::Sender<Command>,
    overflow: OverflowPolicy,
}

impl AnalyticsHandle {
    /// Queues one serialized event.
    ///
    /// With [`OverflowPolicy::Drop`] this never waits: when the queue is full
    /// the event is discarded.
    pub async fn log_event(&self, payload: Bytes) {
        match self.overflow {
            OverflowPolicy::Drop => match self.commands.try_send(Command::Event(payload)) {
                Ok(()) => counter!(EVENTS_LOGGED).increment(1),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Analytics queue is full, dropping event");
                    counter!(EVENTS_DROPPED, "reason" => "queue_full").increment(1);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!("Analytics controller stopped, dropping event");
                    counter!(EVENTS_DROPPED, "reason" => "stopped").increment(1);
                }
            },
            OverflowPolicy::Block => {
                if self.commands.send(Command::Event(payload)).await.is_ok() {
                    counter!(EVENTS_LOGGED).increment(1);
                } else {
                    tracing::debug!("Analytics controller stopped, dropping event");
                    counter!(EVENTS_DROPPED, "reason" => "stopped").increment(1);
                }
            }
        }
    }

    pub async fn stats(&self) -> Result<BufferStats, ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Stats(tx))
            .await
            .map_err(|_| ControllerError::Stopped)?;
        rx.await.map_err(|_| ControllerError::Stopped)
    }

    /// Flushes whatever is buffered and stops the controller.
    ///
    /// Returns once the final batch has been handed to a send task. The send
    /// itself may still be in flight.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Shutdown(tx))
            .await
            .map_err(|_| ControllerError::Stopped)?;
        rx.await.map_err(|_| ControllerError::Stopped)
    }
}

pub struct BufferController {
    buffer: EventBuffer,
    limits: FlushLimits,
    sender: Arc<dyn Sender>,
    commands: mpsc::Receiver<Command>,
    sends: JoinSet<()>,
    state: ControllerState,
}

impl BufferController {
    /// Starts the controller task.
    ///
    /// The returned task finishes after shutdown, once every in-flight send
    /// has completed.
    pub fn spawn(
        limits: FlushLimits,
        queue: QueueConfig,
        sender: Arc<dyn Sender>,
    ) -> (AnalyticsHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue.capacity.max(1));
        let controller = BufferController {
            buffer: EventBuffer::new(),
            limits,
            sender,
            commands: rx,
            sends: JoinSet::new(),
            state: ControllerState::Running,
        };

        let handle = AnalyticsHandle {
            commands: tx,
            overflow: queue.overflow,
        };
        (handle, tokio::spawn(controller.run()))
    }

    async fn run(mut self) {
        tracing::debug!(
            max_events = self.limits.max_events,
            max_bytes = self.limits.max_bytes,
            max_dwell_ms = self.limits.max_dwell.as_millis() as u64,
            "Analytics buffer controller started"
        );

        let dwell = tokio::time::sleep_until(dwell_deadline(self.limits.max_dwell));
        tokio::pin!(dwell);

        while self.state == ControllerState::Running {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Event(payload)) => {
                        self.buffer.write(&payload);
                        if let Some(reason) = self.threshold_reached() {
                            self.flush(reason);
                            dwell.as_mut().reset(dwell_deadline(self.limits.max_dwell));
                        }
                    }
                    Some(Command::Stats(reply)) => {
                        let _ = reply.send(self.stats());
                    }
                    Some(Command::Shutdown(ack)) => {
                        self.drain(vec![ack]);
                    }
                    None => {
                        tracing::debug!("All analytics handles dropped");
                        self.drain(Vec::new());
                    }
                },
                _ = &mut dwell => {
                    self.flush(FlushReason::Interval);
                    dwell.as_mut().reset(dwell_deadline(self.limits.max_dwell));
                }
                Some(joined) = self.sends.join_next(), if !self.sends.is_empty() => {
                    reap_send(joined);
                }
            }
        }

        while let Some(joined) = self.sends.join_next().await {
            reap_send(joined);
        }

        tracing::debug!("Analytics buffer controller stopped");
    }

    /// Consumes whatever is still queued, flushes once and acknowledges every
    /// shutdown request.
    fn drain(&mut self, mut acks: Vec<oneshot::Sender<()>>) {
        self.state = ControllerState::Draining;
        self.commands.close();

        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Event(payload) => self.buffer.write(&payload),
                Command::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Command::Shutdown(ack) => acks.push(ack),
            }
        }

        self.flush(FlushReason::Shutdown);
        for ack in acks {
            let _ = ack.send(());
        }
        self.state = ControllerState::Stopped;
    }

    fn stats(&self) -> BufferStats {
        let (events, bytes) = self.buffer.size();
        BufferStats { events, bytes }
    }

    fn threshold_reached(&self) -> Option<FlushReason> {
        let (events, bytes) = self.buffer.size();
        if events >= self.limits.max_events {
            Some(FlushReason::EventCount)
        } else if bytes >= self.limits.max_bytes {
            Some(FlushReason::BufferSize)
        } else {
            None
        }
    }

    fn flush(&mut self, reason: FlushReason) {
        let Some(batch) = self.buffer.take_all() else {
            return;
        };

        tracing::debug!(
            events = batch.events,
            bytes = batch.payload.len(),
            reason = reason.as_str(),
            "Flushing analytics batch"
        );
        counter!(BATCHES_FLUSHED, "reason" => reason.as_str()).increment(1);
        histogram!(BATCH_EVENTS).record(batch.events as f64);
        histogram!(BATCH_BYTES).record(batch.payload.len() as f64);

        let sender = self.sender.clone();
        self.sends.spawn(async move {
            let events = batch.events;
            if let Err(e) = sender.send(batch).await {
                tracing::error!(error = %e, events, "Failed to send analytics batch");
                counter!(BATCH_SEND_FAILURES, "kind" => e.kind()).increment(1);
            }
        });
    }
}

/// The instant a dwell timer started now fires. Saturates far in the future.
fn dwell_deadline(max_dwell: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(max_dwell)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

fn reap_send(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!("Analytics send task panicked");
            counter!(BATCH_SEND_FAILURES, "kind" => "panic").increment(1);
        }
    }
}
