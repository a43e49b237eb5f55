//! The terminal classification of an association's lifetime, and the
//! notification events subscribers observe along the way.

use crate::association::AssociationHandle;
use crate::event::TimeoutKind;
use crate::types::{AbortRQSource, AssociationRJResult, AssociationRJSource};

/// How an association's lifetime ended, returned as the resolution of
/// [`DicomClient::send`](crate::client::DicomClient::send).
///
/// This is a classification, not an error type: callers match on it
/// directly rather than propagating it with `?`.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Outcome {
    /// The association was negotiated, used, and released cleanly.
    ReleasedCleanly,
    /// The peer rejected the association request.
    RejectedByPeer {
        result: AssociationRJResult,
        source: AssociationRJSource,
    },
    /// The peer requested an abort.
    AbortedByPeer { source: AbortRQSource },
    /// This client aborted, by user cancellation.
    AbortedLocally,
    /// The transport was lost.
    ConnectionLost { cause: Option<String> },
    /// A local timer elapsed before the peer responded.
    TimedOut { kind: TimeoutKind },
}

/// A notification emitted as the association progresses, observable via
/// the facade's event subscriptions.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ClientNotification {
    /// The peer accepted the association.
    AssociationAccepted(AssociationHandle),
    /// The peer rejected the association.
    AssociationRejected {
        result: AssociationRJResult,
        source: AssociationRJSource,
    },
    /// The association was released cleanly.
    AssociationReleased,
    /// The state machine transitioned from one state to another.
    ///
    /// The variant names here mirror [`crate::state::StateKind`] rather
    /// than embedding the (non-`Clone`) state values themselves, since a
    /// `broadcast` notification may be observed by several independent
    /// subscribers long after the state itself has moved on.
    StateChanged {
        old: crate::state::StateKind,
        new: crate::state::StateKind,
    },
}
