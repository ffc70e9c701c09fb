//! Capture middleware.
//!
//! Sits between the agent and the session manager: classifies each message,
//! fixes the interaction id, and records it through an [`InteractionSink`].
//! A busy or unreachable database is retried locally with backoff; a record
//! that cannot be written is reported as [`Error::CaptureFailed`], never as
//! success.

pub mod classify;

pub use classify::{classify, CapturedMessage, Direction};

use tokio::sync::{Mutex, Semaphore};

use crate::config::CaptureSettings;
use crate::error::{Error, Result};
use crate::ingestion::RetryPolicy;
use crate::model::{NewInteraction, RecordOutcome};
use crate::session::SessionManager;

/// Where captured interactions are written.
pub trait InteractionSink: Send {
    /// Record one prepared interaction. Must be idempotent on its id.
    ///
    /// # Errors
    ///
    /// Returns the store error unchanged so the caller can classify it.
    fn record_interaction(
        &mut self,
        session_id: &str,
        interaction: &NewInteraction,
    ) -> Result<RecordOutcome>;
}

impl InteractionSink for SessionManager<'_> {
    fn record_interaction(
        &mut self,
        session_id: &str,
        interaction: &NewInteraction,
    ) -> Result<RecordOutcome> {
        SessionManager::record_interaction(self, session_id, interaction)
    }
}

/// Store failures worth retrying from the capture path.
fn is_retryable_store_error(err: &Error) -> bool {
    err.is_busy_database() || matches!(err, Error::Io(_))
}

/// Classify-and-record with bounded local retry.
///
/// Concurrent callers share one sink. Each record in backoff holds one of
/// `buffer_capacity` slots; a transient failure with no free slot fails
/// the capture at once.
pub struct CaptureMiddleware<S> {
    sink: Mutex<S>,
    policy: RetryPolicy,
    max_attempts: u32,
    buffer: Semaphore,
    buffer_capacity: usize,
}

impl<S: InteractionSink> CaptureMiddleware<S> {
    pub fn new(sink: S, settings: &CaptureSettings) -> Self {
        Self {
            sink: Mutex::new(sink),
            policy: RetryPolicy::from(settings),
            max_attempts: settings.max_attempts.max(1),
            buffer: Semaphore::new(settings.buffer_capacity),
            buffer_capacity: settings.buffer_capacity,
        }
    }

    /// Records currently waiting for a retry.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer_capacity
            .saturating_sub(self.buffer.available_permits())
    }

    /// Classify `message` and record it against `session_id`.
    ///
    /// # Errors
    ///
    /// Not-found and state errors surface immediately; transient store
    /// errors surface as `CaptureFailed` once retries run out.
    pub async fn capture(&self, session_id: &str, message: &CapturedMessage) -> Result<RecordOutcome> {
        let prepared = classify(message);
        self.deliver(session_id, &prepared).await
    }

    /// Record an already prepared interaction, retrying transient failures.
    ///
    /// Every attempt sends the same id, so an attempt that landed despite
    /// reporting an error is not duplicated by the next one.
    ///
    /// # Errors
    ///
    /// See [`CaptureMiddleware::capture`].
    pub async fn deliver(
        &self,
        session_id: &str,
        interaction: &NewInteraction,
    ) -> Result<RecordOutcome> {
        let mut slot = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = self
                .sink
                .lock()
                .await
                .record_interaction(session_id, interaction);

            let err = match result {
                Ok(outcome) => {
                    if attempt > 1 {
                        tracing::info!(interaction = %interaction.id, attempt, "Capture recovered");
                    }
                    return Ok(outcome);
                }
                Err(err) if !is_retryable_store_error(&err) => return Err(err),
                Err(err) => err,
            };

            if attempt >= self.max_attempts {
                tracing::error!(
                    interaction = %interaction.id,
                    attempts = attempt,
                    error = %err,
                    "Capture failed, retries exhausted"
                );
                return Err(Error::CaptureFailed {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            if slot.is_none() {
                match self.buffer.try_acquire() {
                    Ok(permit) => slot = Some(permit),
                    Err(_) => {
                        tracing::error!(
                            interaction = %interaction.id,
                            capacity = self.buffer_capacity,
                            "Capture buffer full"
                        );
                        return Err(Error::CaptureFailed {
                            attempts: attempt,
                            source: Box::new(err),
                        });
                    }
                }
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                interaction = %interaction.id,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Capture write failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Give back the sink.
    pub fn into_inner(self) -> S {
        self.sink.into_inner()
    }
}
