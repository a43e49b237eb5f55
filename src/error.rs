//! Error types for the seams that can fail locally, as opposed to the
//! association-level [`Outcome`](crate::outcome::Outcome) which classifies
//! how an association's *lifetime* ended rather than a single local failure.

use snafu::Snafu;

/// Errors raised while building a [`ClientStateMachineOptions`](crate::options::ClientStateMachineOptions)
/// into a runnable state machine.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum OptionsError {
    /// missing abstract syntax to begin negotiation
    MissingAbstractSyntax,

    /// missing remote address to connect to
    MissingRemoteAddress,
}

/// Errors raised by a [`ConnectionSink`](crate::port::ConnectionSink)
/// implementation used by a client.
///
/// These are the local, synchronous failure modes of the port itself
/// (an I/O error establishing the socket, a broken pipe on write); once
/// the association is underway, the *outcome* of an association that fails
/// is instead reported through [`Outcome::ConnectionLost`](crate::outcome::Outcome::ConnectionLost).
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ConnectionError {
    /// could not connect to the remote application entity
    #[snafu(display("could not connect to the remote application entity: {source}"))]
    Connect { source: std::io::Error },

    /// failed to write a PDU intent to the connection
    #[snafu(display("failed to send PDU: {source}"))]
    Write { source: std::io::Error },

    /// failed to read from the connection
    #[snafu(display("failed to receive PDU: {source}"))]
    Read { source: std::io::Error },
}

/// Programming errors raised by the [driver](crate::driver), which indicate
/// an invariant violation by the caller rather than anything observed on the
/// wire.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum DriverError {
    /// `send` was called while a previous `send` on the same client was
    /// still in flight; at most one association may be driven at a time
    #[snafu(display(
        "a `send` is already in flight on this client; at most one association \
         may be driven at a time"
    ))]
    AlreadyRunning,
}
