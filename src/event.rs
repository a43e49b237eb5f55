//! Tagged vocabularies for everything that can happen to a running
//! association: events observed from the connection, actions requested by
//! the user, timer firings, and the commands the state machine issues back
//! to the connection.

use std::fmt;
use std::time::Duration;

use crate::association::AssociationHandle;
use crate::queue::{Request, Response};
use crate::types::{AbortRQSource, AssociationRJResult, AssociationRJSource};

/// An event observed on the wire, as delivered by a
/// [`ConnectionSource`](crate::port::ConnectionSource).
///
/// PDU decoding is not this crate's job: a port implementation is expected
/// to have already parsed the incoming PDU and translated it into one of
/// these variants before it ever reaches the state machine.
#[derive(Debug)]
#[non_exhaustive]
pub enum ConnectionEvent {
    /// The peer accepted the proposed association.
    AssociationAccept(AssociationHandle),
    /// The peer rejected the proposed association.
    AssociationReject {
        result: AssociationRJResult,
        source: AssociationRJSource,
    },
    /// The peer acknowledged a graceful release.
    AssociationReleaseResponse,
    /// The peer requested an immediate abort.
    Abort { source: AbortRQSource },
    /// The underlying transport was closed, gracefully or otherwise.
    ConnectionClosed { cause: Option<String> },
    /// A previously dispatched request reached a terminal response.
    RequestCompleted { request_id: u16, response: Response },
    /// The port's outbound send pipeline has drained: every dispatched
    /// command has been written to the wire.
    SendQueueEmpty,
}

/// The kind of timer that elapsed, used to disambiguate
/// [`DriverEvent::Timeout`] since a state may be racing more than one timer
/// (the abort state races four waiters at once).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TimeoutKind {
    RequestAssoc,
    ReleaseAssoc,
    Linger,
    AbortAck,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TimeoutKind::RequestAssoc => "association request",
            TimeoutKind::ReleaseAssoc => "association release",
            TimeoutKind::Linger => "linger",
            TimeoutKind::AbortAck => "abort acknowledgement",
        };
        f.write_str(name)
    }
}

/// A single event fed into the driver's serialized event loop.
///
/// User actions, connection events, and internal timer firings are all
/// folded into this one enum so that the driver can implement the
/// transition contract as a plain loop over a single channel, rather than
/// racing several differently-typed sources at the top level (the racing
/// that does need to happen, in the `Abort` state, happens locally with a
/// `tokio::select!` that itself posts a single `DriverEvent` back onto this
/// queue once it resolves).
#[derive(Debug)]
#[non_exhaustive]
pub enum DriverEvent {
    /// From the connection port.
    Connection(ConnectionEvent),
    /// A user request was appended to the request queue.
    ///
    /// The append itself already happened (the facade writes straight into
    /// the shared [`RequestQueue`](crate::queue::RequestQueue), which is
    /// safe to mutate from any state); this is only the wake-up nudge that
    /// tells whichever state is current to look at the queue again.
    Enqueue,
    /// A user request to start draining the queue over a fresh association.
    Send,
    /// A user request to abort immediately.
    AbortRequest,
    /// The cancellation token passed to `send` fired.
    Cancel,
    /// A state-local timer elapsed.
    Timeout(TimeoutKind),
}

/// An outbound intent issued by the state machine to the connection port.
///
/// Every variant here has a matching method on
/// [`ConnectionSink`](crate::port::ConnectionSink).
#[derive(Debug)]
#[non_exhaustive]
pub enum Command {
    Connect,
    SendAssociationRequest,
    SendRequest(Request),
    SendAssociationRelease,
    SendAbort { source: AbortRQSource },
    Disconnect,
}

/// How long to wait before giving up, used purely for documentation at call
/// sites; the actual waiting happens via `tokio::time::sleep`/`timeout`.
pub(crate) fn describe_timeout(kind: TimeoutKind, duration: Duration) -> String {
    format!("{kind} timeout ({duration:?})")
}
