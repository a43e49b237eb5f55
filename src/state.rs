//! The seven states of a client-driven association and the transitions
//! between them.
//!
//! This is modeled as a single tagged enum, [`ClientState`], rather than as
//! a trait object per state. A trait-object-per-state design (`Box<dyn
//! State>` with virtual `on_enter`/`handle_event` methods) was considered
//! and rejected: every unhandled event would silently fall through a
//! default no-op method, which is exactly the failure mode this state
//! machine exists to prevent. An exhaustive `match` over a closed enum
//! means the compiler rejects a new event variant or a new state variant
//! that isn't handled everywhere it needs to be, instead of silently doing
//! nothing at runtime.
//!
//! Each state owns exactly the data it needs for as long as it's current;
//! when the driver replaces `self.current` with the next `ClientState`,
//! the old value (and anything it owned, an [`AssociationHandle`], an
//! abort reason) is simply dropped. That's also how "a state releases its
//! local resources on exit" is realized here: there's no separate
//! `on_exit` hook, ownership and `Drop` already do the job.

use std::collections::HashMap;
use std::fmt;

use tokio::sync::mpsc;
use tracing::debug;

use crate::association::AssociationHandle;
use crate::event::{Command, DriverEvent, TimeoutKind};
use crate::outcome::{ClientNotification, Outcome};
use crate::queue::{Request, RequestQueue, Response, ResponseStatus};
use crate::types::AbortRQSource;

/// The discriminant of a [`ClientState`], with no payload.
///
/// Exists separately from `ClientState` so that a
/// [`ClientNotification::StateChanged`](crate::outcome::ClientNotification::StateChanged)
/// can be broadcast to subscribers without forcing `ClientState` itself (and
/// everything it owns) to be `Clone`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum StateKind {
    Idle,
    RequestAssociation,
    Sending,
    Linger,
    ReleaseAssociation,
    Abort,
    Completed,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateKind::Idle => "idle",
            StateKind::RequestAssociation => "request-association",
            StateKind::Sending => "sending",
            StateKind::Linger => "linger",
            StateKind::ReleaseAssociation => "release-association",
            StateKind::Abort => "abort",
            StateKind::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Local data belonging to the `Sending` state.
///
/// `Sending` dispatches whatever was queued at entry and whatever arrives
/// afterward, and only moves on to `Linger` once every dispatched request
/// has reached a terminal response *and* the port's own write buffer has
/// drained *and* the user's request queue is empty again, all three, since
/// any one of them being false means there's still work this state owns.
#[derive(Debug)]
pub struct SendingState {
    pub handle: AssociationHandle,
    outstanding: usize,
    flushed: bool,
    /// Response callbacks for requests dispatched but not yet terminally
    /// resolved, keyed by message ID. A dispatched [`Request`] is moved
    /// whole into its [`Command::SendRequest`] (the connection port needs
    /// the payload), so this is the only place its callback survives long
    /// enough to be reachable once the matching `RequestCompleted` event
    /// comes back.
    pending: HashMap<u16, mpsc::UnboundedSender<Response>>,
}

impl SendingState {
    fn fresh(handle: AssociationHandle) -> Self {
        SendingState {
            handle,
            outstanding: 0,
            flushed: false,
            pending: HashMap::new(),
        }
    }

    fn ready_to_linger(&self, queue_is_empty: bool) -> bool {
        self.flushed && self.outstanding == 0 && queue_is_empty
    }

    /// Register `request`'s callback before it is handed off in a
    /// [`Command::SendRequest`], and bump the outstanding count.
    fn track(&mut self, request: &Request) {
        self.pending.insert(request.message_id, request.callback.clone());
        self.outstanding += 1;
    }

    /// Forward `response` to the request it belongs to, if still tracked,
    /// and drop the bookkeeping once the response is terminal.
    fn complete(&mut self, request_id: u16, response: Response) {
        let terminal = response.status.is_terminal();
        if let Some(callback) = self.pending.get(&request_id) {
            let _ = callback.send(response);
        }
        if terminal {
            self.pending.remove(&request_id);
            self.outstanding = self.outstanding.saturating_sub(1);
        }
    }

    /// Resolve every still-pending callback with a terminal failure, used
    /// when the association ends out from under `Sending` (connection
    /// loss, abort) without those requests ever getting a real response.
    fn fail_all_pending(&mut self) {
        for (_, callback) in self.pending.drain() {
            let _ = callback.send(Response {
                status: ResponseStatus::Failure,
            });
        }
        self.outstanding = 0;
    }
}

/// Local data belonging to the `Abort` state: the reason being reported to
/// the peer, and the outcome this association will resolve to if our own
/// send-abort/timeout wins the race. If the race is instead
/// won by an inbound peer abort or a connection closure, the outcome
/// reported to the caller is replaced with one describing *that*, since
/// it's the more accurate account of what happened.
#[derive(Debug, Clone)]
pub struct AbortState {
    pub source: AbortRQSource,
    pub planned_outcome: Outcome,
}

/// The state machine's current state, exactly one of seven variants at any
/// moment.
#[derive(Debug)]
pub enum ClientState {
    Idle,
    RequestAssociation,
    Sending(SendingState),
    Linger(AssociationHandle),
    ReleaseAssociation(AssociationHandle),
    /// Handled specially by [`Driver::run_abort`](crate::driver::Driver::run_abort)
    /// rather than through the generic `on_enter`/`handle_event` dispatch;
    /// see that function's documentation for why.
    Abort(AbortState),
    Completed(Outcome),
}

impl ClientState {
    pub fn kind(&self) -> StateKind {
        match self {
            ClientState::Idle => StateKind::Idle,
            ClientState::RequestAssociation => StateKind::RequestAssociation,
            ClientState::Sending(_) => StateKind::Sending,
            ClientState::Linger(_) => StateKind::Linger,
            ClientState::ReleaseAssociation(_) => StateKind::ReleaseAssociation,
            ClientState::Abort(_) => StateKind::Abort,
            ClientState::Completed(_) => StateKind::Completed,
        }
    }
}

/// What a state wants done immediately upon becoming current.
#[derive(Debug, Default)]
pub struct EnterEffect {
    pub commands: Vec<Command>,
    pub timer: TimerDirective,
}

/// What a state wants done in response to one [`DriverEvent`].
pub struct EventEffect {
    pub next: ClientState,
    pub commands: Vec<Command>,
    pub notification: Option<ClientNotification>,
}

impl EventEffect {
    fn stay(state: ClientState) -> Self {
        EventEffect {
            next: state,
            commands: Vec::new(),
            notification: None,
        }
    }

    fn transition(state: ClientState) -> Self {
        EventEffect {
            next: state,
            commands: Vec::new(),
            notification: None,
        }
    }

    fn transition_with_notification(state: ClientState, notification: ClientNotification) -> Self {
        EventEffect {
            next: state,
            commands: Vec::new(),
            notification: Some(notification),
        }
    }
}

/// Instruction for the one timer the driver arms on behalf of whichever
/// state is current.
///
/// Only one timer is ever armed at a time: entering a new state always
/// starts from [`Unchanged`](TimerDirective::Unchanged) (the driver cancels
/// any previous timer as part of the generic transition, regardless of
/// what the new state asks for), so `Unchanged` here really means "no
/// timer for this state."
#[derive(Debug, Default, Clone, Copy)]
pub enum TimerDirective {
    #[default]
    Unchanged,
    Arm(TimeoutKind),
}

fn abort_locally(reason: AbortRQSource, outcome: Outcome) -> ClientState {
    ClientState::Abort(AbortState {
        source: reason,
        planned_outcome: outcome,
    })
}

fn user_abort() -> ClientState {
    abort_locally(AbortRQSource::ServiceUser, Outcome::AbortedLocally)
}

impl ClientState {
    /// Entry action for whichever state `self` currently is.
    ///
    /// `Abort` is not handled here: the driver recognizes a transition into
    /// `Abort` before calling this and routes to
    /// [`Driver::run_abort`](crate::driver::Driver::run_abort) instead.
    pub(crate) async fn on_enter(&mut self, queue: &RequestQueue) -> EnterEffect {
        match self {
            ClientState::Idle => EnterEffect::default(),
            ClientState::RequestAssociation => EnterEffect {
                commands: vec![Command::Connect, Command::SendAssociationRequest],
                timer: TimerDirective::Arm(TimeoutKind::RequestAssoc),
            },
            ClientState::Sending(state) => {
                let requests = queue.drain_all().await;
                let mut commands = Vec::with_capacity(requests.len());
                for request in requests {
                    state.track(&request);
                    commands.push(Command::SendRequest(request));
                }
                EnterEffect {
                    commands,
                    timer: TimerDirective::Unchanged,
                }
            }
            ClientState::Linger(_) => EnterEffect {
                commands: Vec::new(),
                timer: TimerDirective::Arm(TimeoutKind::Linger),
            },
            ClientState::ReleaseAssociation(_) => EnterEffect {
                commands: vec![Command::SendAssociationRelease],
                timer: TimerDirective::Arm(TimeoutKind::ReleaseAssoc),
            },
            ClientState::Abort(_) => {
                unreachable!("Abort is entered through Driver::run_abort, not on_enter")
            }
            ClientState::Completed(_) => EnterEffect {
                commands: vec![Command::Disconnect],
                timer: TimerDirective::Unchanged,
            },
        }
    }

    /// Event handler for whichever state `self` currently is.
    ///
    /// Consumes `self`: the returned [`EventEffect::next`] either carries
    /// forward the same variant (possibly with updated fields) or moves to
    /// a different one. Every state ignores events it has no entry for;
    /// unhandled combinations fall through to the final `_` arm, which
    /// stays put and logs at `debug`.
    pub(crate) async fn handle_event(self, event: DriverEvent, queue: &RequestQueue) -> EventEffect {
        use crate::event::ConnectionEvent as CE;

        match (self, event) {
            // -- Idle --------------------------------------------------
            (ClientState::Idle, DriverEvent::Send) => {
                if queue.is_empty().await {
                    EventEffect::transition(ClientState::Completed(Outcome::ReleasedCleanly))
                } else {
                    EventEffect::transition(ClientState::RequestAssociation)
                }
            }
            (ClientState::Idle, DriverEvent::Enqueue) => EventEffect::stay(ClientState::Idle),

            // -- RequestAssociation ------------------------------------
            (ClientState::RequestAssociation, DriverEvent::Connection(CE::AssociationAccept(handle))) => {
                EventEffect::transition_with_notification(
                    ClientState::Sending(SendingState::fresh(handle.clone())),
                    ClientNotification::AssociationAccepted(handle),
                )
            }
            (
                ClientState::RequestAssociation,
                DriverEvent::Connection(CE::AssociationReject { result, source }),
            ) => EventEffect::transition_with_notification(
                ClientState::Completed(Outcome::RejectedByPeer { result, source }),
                ClientNotification::AssociationRejected { result, source },
            ),
            (ClientState::RequestAssociation, DriverEvent::Connection(CE::ConnectionClosed { cause })) => {
                EventEffect::transition(ClientState::Completed(Outcome::ConnectionLost { cause }))
            }
            (ClientState::RequestAssociation, DriverEvent::Connection(CE::Abort { source })) => {
                EventEffect::transition(ClientState::Completed(Outcome::AbortedByPeer { source }))
            }
            (ClientState::RequestAssociation, DriverEvent::Timeout(TimeoutKind::RequestAssoc)) => {
                EventEffect::transition(abort_locally(
                    AbortRQSource::ServiceUser,
                    Outcome::TimedOut {
                        kind: TimeoutKind::RequestAssoc,
                    },
                ))
            }
            (ClientState::RequestAssociation, DriverEvent::AbortRequest | DriverEvent::Cancel) => {
                EventEffect::transition(user_abort())
            }
            (ClientState::RequestAssociation, DriverEvent::Enqueue) => {
                EventEffect::stay(ClientState::RequestAssociation)
            }

            // -- Sending -------------------------------------------------
            (
                ClientState::Sending(mut state),
                DriverEvent::Connection(CE::RequestCompleted { request_id, response }),
            ) => {
                state.complete(request_id, response);
                let queue_is_empty = queue.is_empty().await;
                transition_out_of_sending(state, queue_is_empty)
            }
            (ClientState::Sending(mut state), DriverEvent::Connection(CE::SendQueueEmpty)) => {
                state.flushed = true;
                let queue_is_empty = queue.is_empty().await;
                transition_out_of_sending(state, queue_is_empty)
            }
            (ClientState::Sending(mut state), DriverEvent::Enqueue) => {
                let requests = queue.drain_all().await;
                if requests.is_empty() {
                    EventEffect::stay(ClientState::Sending(state))
                } else {
                    state.flushed = false;
                    let mut commands = Vec::with_capacity(requests.len());
                    for request in requests {
                        state.track(&request);
                        commands.push(Command::SendRequest(request));
                    }
                    EventEffect {
                        commands,
                        notification: None,
                        next: ClientState::Sending(state),
                    }
                }
            }
            (ClientState::Sending(mut state), DriverEvent::Connection(CE::ConnectionClosed { cause })) => {
                state.fail_all_pending();
                EventEffect::transition(ClientState::Completed(Outcome::ConnectionLost { cause }))
            }
            (ClientState::Sending(mut state), DriverEvent::Connection(CE::Abort { source })) => {
                state.fail_all_pending();
                EventEffect::transition(ClientState::Completed(Outcome::AbortedByPeer { source }))
            }
            (ClientState::Sending(mut state), DriverEvent::AbortRequest | DriverEvent::Cancel) => {
                state.fail_all_pending();
                EventEffect::transition(user_abort())
            }

            // -- Linger ----------------------------------------------------
            (ClientState::Linger(handle), DriverEvent::Enqueue) => {
                EventEffect::transition(ClientState::Sending(SendingState::fresh(handle)))
            }
            (ClientState::Linger(handle), DriverEvent::Timeout(TimeoutKind::Linger)) => {
                EventEffect::transition(ClientState::ReleaseAssociation(handle))
            }
            (ClientState::Linger(_), DriverEvent::Connection(CE::ConnectionClosed { cause })) => {
                EventEffect::transition(ClientState::Completed(Outcome::ConnectionLost { cause }))
            }
            (ClientState::Linger(_), DriverEvent::Connection(CE::Abort { source })) => {
                EventEffect::transition(ClientState::Completed(Outcome::AbortedByPeer { source }))
            }
            (ClientState::Linger(_), DriverEvent::AbortRequest | DriverEvent::Cancel) => {
                EventEffect::transition(user_abort())
            }

            // -- ReleaseAssociation -----------------------------------
            (ClientState::ReleaseAssociation(_), DriverEvent::Connection(CE::AssociationReleaseResponse)) => {
                EventEffect::transition_with_notification(
                    ClientState::Completed(Outcome::ReleasedCleanly),
                    ClientNotification::AssociationReleased,
                )
            }
            (ClientState::ReleaseAssociation(_), DriverEvent::Connection(CE::ConnectionClosed { cause })) => {
                EventEffect::transition(ClientState::Completed(Outcome::ConnectionLost { cause }))
            }
            (ClientState::ReleaseAssociation(_), DriverEvent::Connection(CE::Abort { source })) => {
                EventEffect::transition(ClientState::Completed(Outcome::AbortedByPeer { source }))
            }
            (ClientState::ReleaseAssociation(_), DriverEvent::Timeout(TimeoutKind::ReleaseAssoc)) => {
                EventEffect::transition(abort_locally(
                    AbortRQSource::ServiceUser,
                    Outcome::TimedOut {
                        kind: TimeoutKind::ReleaseAssoc,
                    },
                ))
            }
            (ClientState::ReleaseAssociation(_), DriverEvent::AbortRequest | DriverEvent::Cancel) => {
                EventEffect::transition(user_abort())
            }
            (ClientState::ReleaseAssociation(handle), DriverEvent::Enqueue) => {
                EventEffect::stay(ClientState::ReleaseAssociation(handle))
            }

            // -- Completed ----------------------------------------------
            // A terminal state: nothing dispatches further, but a queued
            // request is still accepted (it simply waits for the next
            // `send()` call to start a fresh association over it).
            (state @ ClientState::Completed(_), DriverEvent::Enqueue) => EventEffect::stay(state),
            (state @ ClientState::Completed(_), _) => {
                debug!("event ignored: association already completed");
                EventEffect::stay(state)
            }

            // -- Abort --------------------------------------------------
            (state @ ClientState::Abort(_), _) => {
                unreachable!(
                    "Abort events are handled by Driver::run_abort, state was: {:?}",
                    state
                )
            }

            // -- fallback: an event this state has no entry for ---------
            (state, event) => {
                debug!(state = %state.kind(), ?event, "event ignored in this state");
                EventEffect::stay(state)
            }
        }
    }
}

fn transition_out_of_sending(state: SendingState, queue_is_empty: bool) -> EventEffect {
    if state.ready_to_linger(queue_is_empty) {
        let handle = state.handle.clone();
        EventEffect::transition(ClientState::Linger(handle))
    } else {
        EventEffect::stay(ClientState::Sending(state))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::queue::{Request, Response, ResponseStatus};
    use crate::types::{AssociationRJResult, AssociationRJSource, AssociationRJServiceUserReason};

    fn handle() -> AssociationHandle {
        AssociationHandle {
            presentation_contexts: Vec::new(),
            max_pdu_length: 16384,
        }
    }

    #[tokio::test]
    async fn idle_send_with_empty_queue_completes_immediately() {
        let queue = RequestQueue::new();
        let effect = ClientState::Idle.handle_event(DriverEvent::Send, &queue).await;
        assert!(matches!(effect.next, ClientState::Completed(Outcome::ReleasedCleanly)));
    }

    #[tokio::test]
    async fn idle_send_with_queued_request_starts_requesting_association() {
        let queue = RequestQueue::new();
        let (req, _rx) = Request::new(1, vec![]);
        queue.enqueue(req).await;
        let effect = ClientState::Idle.handle_event(DriverEvent::Send, &queue).await;
        assert!(matches!(effect.next, ClientState::RequestAssociation));
    }

    #[tokio::test]
    async fn association_accept_moves_to_sending_and_notifies() {
        let queue = RequestQueue::new();
        let effect = ClientState::RequestAssociation
            .handle_event(
                DriverEvent::Connection(crate::event::ConnectionEvent::AssociationAccept(handle())),
                &queue,
            )
            .await;
        assert!(matches!(effect.next, ClientState::Sending(_)));
        assert!(matches!(
            effect.notification,
            Some(ClientNotification::AssociationAccepted(_))
        ));
    }

    #[tokio::test]
    async fn association_reject_completes_with_rejected_outcome() {
        let queue = RequestQueue::new();
        let effect = ClientState::RequestAssociation
            .handle_event(
                DriverEvent::Connection(crate::event::ConnectionEvent::AssociationReject {
                    result: AssociationRJResult::Permanent,
                    source: AssociationRJSource::ServiceUser(AssociationRJServiceUserReason::NoReasonGiven),
                }),
                &queue,
            )
            .await;
        assert!(matches!(
            effect.next,
            ClientState::Completed(Outcome::RejectedByPeer { .. })
        ));
    }

    #[rstest]
    #[case::request_association(ClientState::RequestAssociation)]
    #[case::sending(ClientState::Sending(SendingState::fresh(handle())))]
    #[case::linger(ClientState::Linger(handle()))]
    #[case::release_association(ClientState::ReleaseAssociation(handle()))]
    #[tokio::test]
    async fn peer_abort_completes_directly_without_entering_abort_state(#[case] state: ClientState) {
        let queue = RequestQueue::new();
        let effect = state
            .handle_event(
                DriverEvent::Connection(crate::event::ConnectionEvent::Abort {
                    source: crate::types::AbortRQSource::ServiceUser,
                }),
                &queue,
            )
            .await;
        assert!(matches!(
            effect.next,
            ClientState::Completed(Outcome::AbortedByPeer { .. })
        ));
    }

    #[tokio::test]
    async fn request_association_timeout_moves_to_abort() {
        let queue = RequestQueue::new();
        let effect = ClientState::RequestAssociation
            .handle_event(DriverEvent::Timeout(TimeoutKind::RequestAssoc), &queue)
            .await;
        match effect.next {
            ClientState::Abort(AbortState { planned_outcome: Outcome::TimedOut { kind }, .. }) => {
                assert_eq!(kind, TimeoutKind::RequestAssoc);
            }
            other => panic!("expected Abort with TimedOut outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sending_stays_until_flushed_and_drained_and_idle() {
        let queue = RequestQueue::new();
        let mut state = SendingState::fresh(handle());
        state.outstanding = 1;
        let effect = ClientState::Sending(state)
            .handle_event(
                DriverEvent::Connection(crate::event::ConnectionEvent::SendQueueEmpty),
                &queue,
            )
            .await;
        // outstanding still 1: not ready to linger yet.
        assert!(matches!(effect.next, ClientState::Sending(_)));
    }

    #[tokio::test]
    async fn sending_moves_to_linger_once_everything_settles() {
        let queue = RequestQueue::new();
        let mut state = SendingState::fresh(handle());
        state.flushed = true;
        let effect = ClientState::Sending(state)
            .handle_event(
                DriverEvent::Connection(crate::event::ConnectionEvent::RequestCompleted {
                    request_id: 1,
                    response: Response {
                        status: ResponseStatus::Success,
                    },
                }),
                &queue,
            )
            .await;
        assert!(matches!(effect.next, ClientState::Linger(_)));
    }

    #[tokio::test]
    async fn linger_enqueue_returns_to_sending() {
        let queue = RequestQueue::new();
        let effect = ClientState::Linger(handle())
            .handle_event(DriverEvent::Enqueue, &queue)
            .await;
        assert!(matches!(effect.next, ClientState::Sending(_)));
    }

    #[tokio::test]
    async fn linger_timeout_moves_to_release() {
        let queue = RequestQueue::new();
        let effect = ClientState::Linger(handle())
            .handle_event(DriverEvent::Timeout(TimeoutKind::Linger), &queue)
            .await;
        assert!(matches!(effect.next, ClientState::ReleaseAssociation(_)));
    }

    #[tokio::test]
    async fn release_response_completes_cleanly_and_notifies() {
        let queue = RequestQueue::new();
        let effect = ClientState::ReleaseAssociation(handle())
            .handle_event(
                DriverEvent::Connection(crate::event::ConnectionEvent::AssociationReleaseResponse),
                &queue,
            )
            .await;
        assert!(matches!(effect.next, ClientState::Completed(Outcome::ReleasedCleanly)));
        assert!(matches!(
            effect.notification,
            Some(ClientNotification::AssociationReleased)
        ));
    }

    #[rstest]
    #[case::request_association(ClientState::RequestAssociation)]
    #[case::sending(ClientState::Sending(SendingState::fresh(handle())))]
    #[case::linger(ClientState::Linger(handle()))]
    #[case::release_association(ClientState::ReleaseAssociation(handle()))]
    #[tokio::test]
    async fn cancel_during_any_active_state_requests_abort(#[case] state: ClientState) {
        let queue = RequestQueue::new();
        let effect = state.handle_event(DriverEvent::Cancel, &queue).await;
        assert!(matches!(effect.next, ClientState::Abort(_)));
    }

    #[tokio::test]
    async fn completed_entry_disconnects() {
        let queue = RequestQueue::new();
        let effect = ClientState::Completed(Outcome::ReleasedCleanly).on_enter(&queue).await;
        assert!(matches!(effect.commands.as_slice(), [Command::Disconnect]));
    }

    #[tokio::test]
    async fn completed_still_accepts_enqueue_but_ignores_other_events() {
        let queue = RequestQueue::new();
        let effect = ClientState::Completed(Outcome::ReleasedCleanly)
            .handle_event(DriverEvent::Enqueue, &queue)
            .await;
        assert!(matches!(effect.next, ClientState::Completed(_)));

        let effect = ClientState::Completed(Outcome::ReleasedCleanly)
            .handle_event(DriverEvent::Send, &queue)
            .await;
        assert!(matches!(effect.next, ClientState::Completed(_)));
    }
}
