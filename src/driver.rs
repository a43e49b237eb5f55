//! The state machine driver: owns the current state, fans events in
//! from a single serialized queue, and performs the exit → dispose → swap →
//! enter transition protocol on every move between states.
//!
//! `Abort` is the one state not driven through the generic
//! [`ClientState::on_enter`]/[`ClientState::handle_event`] pair, see
//! [`Driver::run_abort`] for why.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::event::{Command, ConnectionEvent, DriverEvent, TimeoutKind};
use crate::options::{AssociationParams, ASSOCIATION_ABORT_TIMEOUT};
use crate::outcome::{ClientNotification, Outcome};
use crate::port::{Connection, ConnectionSink, ConnectionSource};
use crate::queue::RequestQueue;
use crate::state::{AbortState, ClientState, StateKind};

/// Drives one client-side association, from `Idle` to `Completed`.
///
/// A `Driver` is single-use: it is built for one [`send`](crate::client::DicomClient::send)
/// call, consumes the [`Connection`] it was given, and is dropped once
/// `run` resolves. The facade is what persists across repeated `send`
/// calls; the driver does not. A new client is not required per
/// association: reuse re-enters Idle on the next `send` by building a
/// fresh `Driver`, starting fresh at `Idle`, for every call.
pub struct Driver {
    state: ClientState,
    sink: Box<dyn ConnectionSink>,
    source_task: JoinHandle<()>,
    queue: Arc<RequestQueue>,
    params: Arc<AssociationParams>,
    notifications: broadcast::Sender<ClientNotification>,
    events_tx: mpsc::UnboundedSender<DriverEvent>,
    events_rx: mpsc::UnboundedReceiver<DriverEvent>,
    timer: Option<JoinHandle<()>>,
}

impl Driver {
    /// Build a driver for a freshly-connected [`Connection`], ready to be
    /// [`run`](Self::run) once an initial `Send` event has been posted onto
    /// `events_tx`.
    pub(crate) fn new(
        connection: Connection,
        queue: Arc<RequestQueue>,
        params: Arc<AssociationParams>,
        notifications: broadcast::Sender<ClientNotification>,
        events_tx: mpsc::UnboundedSender<DriverEvent>,
        events_rx: mpsc::UnboundedReceiver<DriverEvent>,
    ) -> Self {
        let Connection { sink, mut source } = connection;

        // The read half of the connection is single-consumer by contract;
        // forwarding it into the driver's own event queue is what lets all
        // events post into this one queue without the driver loop itself
        // needing to juggle more than one receiver.
        let forward_tx = events_tx.clone();
        let source_task = tokio::spawn(async move {
            while let Some(event) = source.recv_event().await {
                let is_closed = matches!(event, ConnectionEvent::ConnectionClosed { .. });
                if forward_tx.send(DriverEvent::Connection(event)).is_err() {
                    break;
                }
                if is_closed {
                    break;
                }
            }
        });

        Driver {
            state: ClientState::Idle,
            sink,
            source_task,
            queue,
            params,
            notifications,
            events_tx,
            events_rx,
            timer: None,
        }
    }

    /// Run the association to completion, returning the terminal [`Outcome`].
    ///
    /// Consumes `self`: by the time this resolves, the connection has been
    /// told to disconnect and the background event-forwarding task has been
    /// stopped.
    pub(crate) async fn run(mut self) -> Outcome {
        loop {
            let event = match self.events_rx.recv().await {
                Some(event) => event,
                // The forwarding task only stops after delivering a
                // `ConnectionClosed`, or because this driver dropped its own
                // sender, which can't happen while `self` is still running
                // this loop. Treat an unexpected closure defensively rather
                // than panicking.
                None => DriverEvent::Connection(ConnectionEvent::ConnectionClosed { cause: None }),
            };

            self.process(event).await;

            if matches!(self.state, ClientState::Abort(_)) {
                self.run_abort().await;
            }

            if matches!(self.state, ClientState::Completed(_)) {
                break;
            }
        }

        self.cancel_timer();
        self.source_task.abort();

        match self.state {
            ClientState::Completed(outcome) => outcome,
            _ => unreachable!("the driver loop only exits once `Completed` is reached"),
        }
    }

    /// Dispatch one event to the current state and apply whatever
    /// transition it requests (the exit/swap/enter protocol, for every
    /// state other than `Abort`).
    async fn process(&mut self, event: DriverEvent) {
        debug!(?event, state = %self.state.kind(), "processing event");
        // `ClientState::Idle` is a valid, side-effect-free placeholder:
        // `handle_event` always returns a fresh `next` that immediately
        // replaces it below, so this is never observed as the "current"
        // state by anything else.
        let current = std::mem::replace(&mut self.state, ClientState::Idle);
        let effect = current.handle_event(event, &self.queue).await;
        self.transition_to(effect.next, effect.notification, effect.commands)
            .await;
    }

    /// Apply one transition: dispatch any commands the event handler asked
    /// for, then, if the state's *kind* actually changed, run the full
    /// exit/swap/enter protocol. A handler that returns the same
    /// kind (e.g. `Sending` absorbing another `Enqueue`) only updates the
    /// stored value; it does not re-run entry actions.
    async fn transition_to(
        &mut self,
        next: ClientState,
        notification: Option<ClientNotification>,
        commands: Vec<Command>,
    ) {
        self.dispatch_commands(commands).await;

        let old_kind = self.state.kind();
        let new_kind = next.kind();

        if old_kind == new_kind {
            self.state = next;
            if let Some(notification) = notification {
                let _ = self.notifications.send(notification);
            }
            return;
        }

        info!(from = %old_kind, to = %new_kind, "state_changing");
        self.cancel_timer();
        self.state = next;
        let _ = self.notifications.send(ClientNotification::StateChanged {
            old: old_kind,
            new: new_kind,
        });
        if let Some(notification) = notification {
            let _ = self.notifications.send(notification);
        }

        if new_kind == StateKind::Abort {
            // Entry into `Abort` is handled by `run_abort`, called by the
            // outer loop right after this returns; see its docs for why
            // this can't be a normal `on_enter`.
            return;
        }

        let enter = self.state.on_enter(&self.queue).await;
        self.dispatch_commands(enter.commands).await;
        self.arm_timer(enter.timer);
    }

    /// The `Abort` state's entry action: a race between four ways
    /// the association can be considered aborted, with the first to
    /// resolve winning and the rest dropped.
    ///
    /// This can't be expressed as a plain `on_enter`/`handle_event` pair
    /// because it needs to hold the in-flight `send_abort` future alive
    /// *across* however many unrelated events (`Enqueue`, a stray
    /// `RequestCompleted`) arrive before one of the four branches actually
    /// resolves, and a single `handle_event` call only ever sees one event
    /// at a time. `tokio::select!` is the natural multiplexer for exactly this
    /// (mirrors how the reference crate's own async read paths race a
    /// socket read against other futures); every loser is simply dropped
    /// when the function returns, which cancels it.
    async fn run_abort(&mut self) {
        let AbortState { source, planned_outcome } = match &self.state {
            ClientState::Abort(state) => state.clone(),
            other => unreachable!("run_abort called with state {other:?}"),
        };

        let mut send_abort_fut = Some(Box::pin(self.sink.send_abort(source.clone())));
        let timer = tokio::time::sleep(ASSOCIATION_ABORT_TIMEOUT);
        tokio::pin!(timer);

        let outcome = loop {
            tokio::select! {
                result = async {
                    match &mut send_abort_fut {
                        Some(fut) => fut.await,
                        None => std::future::pending().await,
                    }
                }, if send_abort_fut.is_some() => {
                    send_abort_fut = None;
                    if let Err(error) = result {
                        warn!(%error, "failed to dispatch local abort");
                    }
                    break planned_outcome;
                }
                event = self.events_rx.recv() => {
                    match event {
                        Some(DriverEvent::Connection(ConnectionEvent::Abort { source })) => {
                            break Outcome::AbortedByPeer { source };
                        }
                        Some(DriverEvent::Connection(ConnectionEvent::ConnectionClosed { cause })) => {
                            break Outcome::ConnectionLost { cause };
                        }
                        Some(_) => {
                            // `Enqueue`, a trailing `RequestCompleted`, and
                            // so on: acknowledged (the queue append already
                            // happened) but otherwise ignored.
                            continue;
                        }
                        None => break Outcome::ConnectionLost { cause: None },
                    }
                }
                _ = &mut timer => {
                    error!("abort acknowledgement timed out after {:?}; completing anyway", ASSOCIATION_ABORT_TIMEOUT);
                    break Outcome::TimedOut { kind: TimeoutKind::AbortAck };
                }
            }
        };

        // Drop the in-flight `send_abort` future (if it didn't already win
        // and get taken) before reclaiming `&mut self` below: it still
        // holds a borrow of `self.sink` for as long as it's alive.
        drop(send_abort_fut);

        self.transition_to(ClientState::Completed(outcome), None, Vec::new())
            .await;
    }

    async fn dispatch_commands(&mut self, commands: Vec<Command>) {
        for command in commands {
            if !self.dispatch_command(command).await {
                break;
            }
        }
    }

    /// Issue one command to the connection port. Returns `false` if the
    /// connection appears to have failed, in which case the caller stops
    /// issuing the rest of the batch; the event loop will pick up the
    /// `ConnectionClosed` this posts back to itself and react normally.
    async fn dispatch_command(&mut self, command: Command) -> bool {
        debug!(?command, "dispatching command");
        let result = match command {
            Command::Connect => self.sink.connect().await,
            Command::SendAssociationRequest => {
                self.sink.send_association_request(&self.params).await
            }
            Command::SendRequest(request) => self.sink.send_request(request).await,
            Command::SendAssociationRelease => self.sink.send_association_release().await,
            Command::SendAbort { source } => self.sink.send_abort(source).await,
            Command::Disconnect => self.sink.disconnect().await,
        };

        match result {
            Ok(()) => true,
            Err(error) => {
                warn!(%error, "connection command failed");
                let _ = self.events_tx.send(DriverEvent::Connection(ConnectionEvent::ConnectionClosed {
                    cause: Some(error.to_string()),
                }));
                false
            }
        }
    }

    fn arm_timer(&mut self, directive: crate::state::TimerDirective) {
        self.cancel_timer();
        if let crate::state::TimerDirective::Arm(kind) = directive {
            let duration = self.timeout_duration(kind);
            debug!(timer = %crate::event::describe_timeout(kind, duration), "timer armed");
            let tx = self.events_tx.clone();
            self.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(duration).await;
                let _ = tx.send(DriverEvent::Timeout(kind));
            }));
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }

    fn timeout_duration(&self, kind: TimeoutKind) -> Duration {
        match kind {
            TimeoutKind::RequestAssoc => self.params.timeouts.association_request_timeout,
            TimeoutKind::ReleaseAssoc => self.params.timeouts.association_release_timeout,
            TimeoutKind::Linger => self.params.timeouts.association_linger_timeout,
            TimeoutKind::AbortAck => ASSOCIATION_ABORT_TIMEOUT,
        }
    }
}
