//! The public client facade: the surface an embedding application
//! actually holds onto. Everything here is a thin wrapper around posting
//! onto channels that feed a [`Driver`](crate::driver::Driver); the facade
//! itself never touches `ClientState` directly.

use std::sync::Arc;

use snafu::ensure;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::driver::Driver;
use crate::error::{AlreadyRunningSnafu, DriverError};
use crate::event::DriverEvent;
use crate::options::AssociationParams;
use crate::outcome::{ClientNotification, Outcome};
use crate::port::Connection;
use crate::queue::{Request, RequestQueue};

const NOTIFICATION_CHANNEL_CAPACITY: usize = 64;

/// A handle to whatever association the facade is currently driving, shared
/// between [`DicomClient::send`] (which creates it) and
/// [`DicomClient::abort`]/[`DicomClient::add_request`] (which look it up).
struct Inflight {
    commands: mpsc::UnboundedSender<DriverEvent>,
    completed: watch::Receiver<bool>,
}

/// A client-side DICOM Upper Layer association state machine.
///
/// Owns the [request queue](RequestQueue) and the notification channel,
/// both of which outlive any individual [`send`](Self::send) call; the
/// actual [`Driver`] is built fresh for each call and dropped once it
/// resolves: a new client is not required per association, reuse
/// re-enters Idle on the next `send`.
///
/// # Example
///
/// ```no_run
/// # use dicom_assoc_fsm::client::DicomClient;
/// # use dicom_assoc_fsm::options::ClientStateMachineOptions;
/// # use dicom_assoc_fsm::port::Connection;
/// # use tokio_util::sync::CancellationToken;
/// # async fn run(connection: Connection) -> Result<(), Box<dyn std::error::Error>> {
/// let params = ClientStateMachineOptions::new()
///     .remote_address("127.0.0.1:104".parse()?)
///     .with_abstract_syntax("1.2.840.10008.1.1")
///     .build()?;
/// let client = DicomClient::new(params);
/// let outcome = client.send(connection, CancellationToken::new()).await?;
/// println!("{outcome:?}");
/// # Ok(())
/// # }
/// ```
pub struct DicomClient {
    queue: Arc<RequestQueue>,
    params: Arc<AssociationParams>,
    notifications: broadcast::Sender<ClientNotification>,
    inflight: Mutex<Option<Inflight>>,
}

impl DicomClient {
    /// Build a new client for the given, immutable association parameters.
    pub fn new(params: AssociationParams) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        DicomClient {
            queue: Arc::new(RequestQueue::new()),
            params: Arc::new(params),
            notifications,
            inflight: Mutex::new(None),
        }
    }

    /// Append a request to the queue.
    ///
    /// Always succeeds, with no feedback until the request's response
    /// callback fires; safe to call before the first [`send`](Self::send),
    /// while an association is active, or after one has completed. What
    /// happens to a request enqueued after `Completed` is undefined, but
    /// the enqueue itself never fails.
    pub async fn add_request(&self, request: Request) {
        self.queue.enqueue(request).await;
        // Nudge whichever state is current to look at the queue again; if
        // nothing is running yet, the next `send` drains it anyway.
        if let Some(inflight) = self.inflight.lock().await.as_ref() {
            let _ = inflight.commands.send(DriverEvent::Enqueue);
        }
    }

    /// Subscribe to this client's association-level notifications
    /// (`AssociationAccepted`, `AssociationRejected`, `AssociationReleased`,
    /// `StateChanged`).
    pub fn subscribe(&self) -> broadcast::Receiver<ClientNotification> {
        self.notifications.subscribe()
    }

    /// Drive one association to completion over `connection`, draining
    /// whatever is in the request queue (and whatever gets enqueued while
    /// it runs), and returning the terminal [`Outcome`].
    ///
    /// `cancel` maps onto a `Cancel` event delivered to whichever state is
    /// current; every non-terminal state responds to it by transitioning to
    /// `Abort`.
    ///
    /// Fails fast with [`DriverError::AlreadyRunning`] if a previous `send`
    /// on this same client is still in flight: at most one association may
    /// be driven by a client at a time.
    pub async fn send(
        &self,
        connection: Connection,
        cancel: CancellationToken,
    ) -> Result<Outcome, DriverError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (completed_tx, completed_rx) = watch::channel(false);

        {
            let mut guard = self.inflight.lock().await;
            ensure!(guard.is_none(), AlreadyRunningSnafu);
            *guard = Some(Inflight {
                commands: events_tx.clone(),
                completed: completed_rx,
            });
        }

        let cancel_forwarder = {
            let events_tx = events_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                let _ = events_tx.send(DriverEvent::Cancel);
            })
        };

        let driver = Driver::new(
            connection,
            Arc::clone(&self.queue),
            Arc::clone(&self.params),
            self.notifications.clone(),
            events_tx.clone(),
            events_rx,
        );

        // Kick the state machine out of `Idle`: its `Send` handler is what
        // decides whether there's anything to drain at all.
        let _ = events_tx.send(DriverEvent::Send);

        let outcome = driver.run().await;

        cancel_forwarder.abort();
        let _ = completed_tx.send(true);
        *self.inflight.lock().await = None;

        debug!(?outcome, "association completed");
        Ok(outcome)
    }

    /// Abort whichever association is currently running, if any, and wait
    /// for it to reach `Completed`.
    ///
    /// A no-op if nothing is in flight. Concurrent calls coalesce: every
    /// caller posts the same idempotent `AbortRequest` event and waits on
    /// the same completion signal, rather than racing independent abort
    /// attempts.
    pub async fn abort(&self) {
        let (commands, mut completed) = {
            let guard = self.inflight.lock().await;
            match guard.as_ref() {
                Some(inflight) => (inflight.commands.clone(), inflight.completed.clone()),
                None => return,
            }
        };

        let _ = commands.send(DriverEvent::AbortRequest);
        let _ = completed.wait_for(|done| *done).await;
    }
}
