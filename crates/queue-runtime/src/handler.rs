//! Callback-style message handling.
//!
//! A [`MessageHandler`] is registered on a queue client together with
//! [`MessageHandlerOptions`]. The client then pulls messages in the
//! background and hands each one to [`MessageHandler::on_message`]. Any
//! failure the dispatcher observes, whether while receiving, inside the
//! handler, or while settling a message, is reported to
//! [`MessageHandler::on_error`] with an [`ErrorContext`] and dispatch continues.
//!
//! Concurrency is bounded by a semaphore: a permit is taken before each
//! receive and released when the handler (and any automatic settlement) has
//! finished, so `max_concurrent_calls = 1` processes messages strictly one at
//! a time.

use crate::client::QueueProvider;
use crate::error::{QueueError, ValidationError};
use crate::message::{QueueName, ReceivedMessage};
use async_trait::async_trait;
use chrono::Duration;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;

// ============================================================================
// Options
// ============================================================================

/// Options controlling how a registered handler is driven
#[derive(Debug, Clone)]
pub struct MessageHandlerOptions {
    /// Upper bound on simultaneous `on_message` invocations
    pub max_concurrent_calls: usize,

    /// Complete the message automatically when `on_message` returns `Ok`
    pub auto_complete: bool,

    /// How long a single receive call waits for a message
    pub max_wait_time: Duration,

    /// Pause after a failed receive before trying again
    pub receive_error_backoff: Duration,
}

impl MessageHandlerOptions {
    /// Create options with default values
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_calls(mut self, max_concurrent_calls: usize) -> Self {
        self.max_concurrent_calls = max_concurrent_calls;
        self
    }

    pub fn with_auto_complete(mut self, auto_complete: bool) -> Self {
        self.auto_complete = auto_complete;
        self
    }

    pub fn with_max_wait_time(mut self, max_wait_time: Duration) -> Self {
        self.max_wait_time = max_wait_time;
        self
    }

    pub fn with_receive_error_backoff(mut self, backoff: Duration) -> Self {
        self.receive_error_backoff = backoff;
        self
    }

    /// Validate option values
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_calls == 0 {
            return Err(ValidationError::OutOfRange {
                field: "max_concurrent_calls".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.max_wait_time <= Duration::zero() {
            return Err(ValidationError::OutOfRange {
                field: "max_wait_time".to_string(),
                message: "must be positive".to_string(),
            });
        }

        if self.receive_error_backoff < Duration::zero() {
            return Err(ValidationError::OutOfRange {
                field: "receive_error_backoff".to_string(),
                message: "must not be negative".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for MessageHandlerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 1,
            auto_complete: true,
            max_wait_time: Duration::seconds(30),
            receive_error_backoff: Duration::seconds(2),
        }
    }
}

// ============================================================================
// Error reporting
// ============================================================================

/// What the dispatcher was doing when an error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionAction {
    /// Pulling the next message from the queue
    Receive,
    /// Running the registered `on_message` callback
    UserCallback,
    /// Completing a message after the callback succeeded
    Complete,
    /// Abandoning a message after the callback failed
    Abandon,
}

impl ExceptionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Receive => "Receive",
            Self::UserCallback => "UserCallback",
            Self::Complete => "Complete",
            Self::Abandon => "Abandon",
        }
    }
}

impl fmt::Display for ExceptionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure produced by, or observed around, a message handler
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Message handler failed: {message}")]
    Failed { message: String },

    #[error("Message handler panicked: {message}")]
    Panicked { message: String },
}

impl HandlerError {
    /// Build a `Failed` error from any message
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// The message lock is gone, so settling it again cannot succeed
    pub fn is_lock_lost(&self) -> bool {
        matches!(self, Self::Queue(QueueError::MessageNotFound { .. }))
    }
}

/// Diagnostic details handed to [`MessageHandler::on_error`]
#[derive(Debug)]
pub struct ErrorContext {
    /// Namespace endpoint of the client
    pub endpoint: String,
    /// Queue the handler is registered on
    pub entity_path: String,
    /// Operation in progress when the error occurred
    pub action: ExceptionAction,
    pub error: HandlerError,
}

// ============================================================================
// Cancellation
// ============================================================================

/// Signals that the registration delivering a message is shutting down
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    receiver: watch::Receiver<bool>,
}

impl CancellationSignal {
    pub(crate) fn from_receiver(receiver: watch::Receiver<bool>) -> Self {
        Self { receiver }
    }

    /// A signal that never fires, for invoking handlers directly
    pub fn none() -> Self {
        let (_sender, receiver) = watch::channel(false);
        Self { receiver }
    }

    /// Whether shutdown has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until shutdown is requested
    ///
    /// Pends forever when nothing can request shutdown any more.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.receiver.borrow_and_update() {
                return;
            }
            if self.receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

// ============================================================================
// Handler trait
// ============================================================================

/// Callbacks invoked by a handler registration
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one received message
    ///
    /// Returning `Err` reports the error through `on_error` with
    /// [`ExceptionAction::UserCallback`] and abandons the message.
    async fn on_message(
        &self,
        message: &ReceivedMessage,
        cancellation: CancellationSignal,
    ) -> Result<(), HandlerError>;

    /// Observe an error raised during dispatch
    ///
    /// Must not panic; dispatch continues after this returns.
    async fn on_error(&self, context: ErrorContext);
}

// ============================================================================
// Registration
// ============================================================================

/// Handle to a running handler registration
///
/// Dropping the handle requests shutdown without waiting; [`close`](Self::close)
/// requests shutdown and waits for in-flight callbacks to finish.
pub struct HandlerRegistration {
    queue_name: QueueName,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl HandlerRegistration {
    pub fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }

    /// Whether the dispatch loop is still running
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop receiving and wait for in-flight callbacks to finish
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(queue = %self.queue_name, error = %e, "Message dispatch task ended abnormally");
            }
        }

        info!(queue = %self.queue_name, "Message handler registration closed");
    }
}

impl Drop for HandlerRegistration {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("queue_name", &self.queue_name)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Start the dispatch loop on the current tokio runtime
pub(crate) fn spawn_dispatcher(
    provider: Arc<dyn QueueProvider>,
    queue: QueueName,
    handler: Arc<dyn MessageHandler>,
    options: MessageHandlerOptions,
    client_closed: watch::Receiver<bool>,
) -> HandlerRegistration {
    let (shutdown, shutdown_rx) = watch::channel(false);

    let dispatcher = Dispatcher {
        provider,
        queue: queue.clone(),
        handler,
        options,
    };
    let task = tokio::spawn(dispatcher.run(shutdown_rx, client_closed));

    HandlerRegistration {
        queue_name: queue,
        shutdown,
        task: Some(task),
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

#[derive(Clone)]
struct Dispatcher {
    provider: Arc<dyn QueueProvider>,
    queue: QueueName,
    handler: Arc<dyn MessageHandler>,
    options: MessageHandlerOptions,
}

/// Resolves once the flag is set or its sender is gone
async fn stop_requested(flag: &mut watch::Receiver<bool>) {
    loop {
        if *flag.borrow_and_update() {
            return;
        }
        if flag.changed().await.is_err() {
            return;
        }
    }
}

impl Dispatcher {
    async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
        mut client_closed: watch::Receiver<bool>,
    ) {
        let permits = Arc::new(Semaphore::new(self.options.max_concurrent_calls));
        let (cancel, cancel_rx) = watch::channel(false);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        info!(
            queue = %self.queue,
            max_concurrent_calls = self.options.max_concurrent_calls,
            auto_complete = self.options.auto_complete,
            "Message handler registered"
        );

        loop {
            let permit = tokio::select! {
                biased;
                _ = stop_requested(&mut shutdown) => break,
                _ = stop_requested(&mut client_closed) => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            while let Some(joined) = in_flight.try_join_next() {
                self.observe_join(joined).await;
            }

            // A receive that is already on the wire may come back holding a
            // lock, so shutdown lets it finish and releases what it returns
            let receive = self
                .provider
                .receive_message(&self.queue, self.options.max_wait_time);
            tokio::pin!(receive);
            let received = tokio::select! {
                biased;
                result = &mut receive => result,
                _ = stop_requested(&mut shutdown) => {
                    self.release_unprocessed(receive.await).await;
                    break;
                }
                _ = stop_requested(&mut client_closed) => {
                    self.release_unprocessed(receive.await).await;
                    break;
                }
            };

            match received {
                Ok(Some(message)) => {
                    debug!(
                        queue = %self.queue,
                        sequence_number = message.sequence_number,
                        delivery_count = message.delivery_count,
                        "Dispatching message"
                    );

                    let dispatcher = self.clone();
                    let cancellation = CancellationSignal::from_receiver(cancel_rx.clone());
                    in_flight.spawn(async move {
                        dispatcher.process(message, cancellation).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                }
                Err(e) => {
                    drop(permit);
                    warn!(queue = %self.queue, error = %e, "Receive failed");
                    self.report(ExceptionAction::Receive, e.into()).await;

                    let backoff = self
                        .options
                        .receive_error_backoff
                        .to_std()
                        .unwrap_or_default();
                    tokio::select! {
                        biased;
                        _ = stop_requested(&mut shutdown) => break,
                        _ = stop_requested(&mut client_closed) => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        let _ = cancel.send(true);
        while let Some(joined) = in_flight.join_next().await {
            self.observe_join(joined).await;
        }

        info!(queue = %self.queue, "Message handler stopped");
    }

    async fn process(&self, message: ReceivedMessage, cancellation: CancellationSignal) {
        let outcome = AssertUnwindSafe(self.handler.on_message(&message, cancellation))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(queue = %self.queue, panic = %message, "Message handler panicked");
                Err(HandlerError::Panicked { message })
            });

        match outcome {
            Ok(()) => {
                if self.options.auto_complete {
                    if let Err(e) = self
                        .provider
                        .complete_message(&self.queue, &message.lock_token)
                        .await
                    {
                        warn!(queue = %self.queue, error = %e, "Automatic completion failed");
                        self.report(ExceptionAction::Complete, e.into()).await;
                    }
                }
            }
            Err(e) => {
                warn!(
                    queue = %self.queue,
                    sequence_number = message.sequence_number,
                    error = %e,
                    "Message handler returned an error"
                );

                let lock_lost = e.is_lock_lost();
                self.report(ExceptionAction::UserCallback, e).await;

                if lock_lost || message.lock_token.is_expired() {
                    return;
                }

                if let Err(e) = self
                    .provider
                    .abandon_message(&self.queue, &message.lock_token)
                    .await
                {
                    self.report(ExceptionAction::Abandon, e.into()).await;
                }
            }
        }
    }

    async fn observe_join(&self, joined: Result<(), JoinError>) {
        let Err(e) = joined else {
            return;
        };

        // on_message panics are caught in `process`; this is whatever escaped
        // from settlement or on_error
        if e.is_panic() {
            let message = panic_message(e.into_panic().as_ref());
            error!(queue = %self.queue, panic = %message, "Message dispatch panicked");
            self.report(ExceptionAction::UserCallback, HandlerError::Panicked { message })
                .await;
        }
    }

    /// Abandon a message that arrived after shutdown was requested
    async fn release_unprocessed(&self, received: Result<Option<ReceivedMessage>, QueueError>) {
        let Ok(Some(message)) = received else {
            return;
        };

        debug!(
            queue = %self.queue,
            sequence_number = message.sequence_number,
            "Releasing message received during shutdown"
        );
        if let Err(e) = self
            .provider
            .abandon_message(&self.queue, &message.lock_token)
            .await
        {
            warn!(queue = %self.queue, error = %e, "Failed to release message during shutdown");
        }
    }

    async fn report(&self, action: ExceptionAction, error: HandlerError) {
        let context = ErrorContext {
            endpoint: self.provider.endpoint().to_string(),
            entity_path: self.queue.to_string(),
            action,
            error,
        };
        self.handler.on_error(context).await;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}
