//! The connection port: the abstract interface between the state machine
//! and whatever actually owns bytes on a socket.
//!
//! PDU framing, TLS, and DICOM message serialization all live on the other
//! side of this boundary. The state machine only ever sees already-parsed
//! [`ConnectionEvent`]s coming in, and only ever emits already-built
//! [`Command`](crate::event::Command) intents going out.
//!
//! The port is split into two halves, [`ConnectionSink`] and
//! [`ConnectionSource`], mirroring the read/write halves a real transport
//! splits into (`TcpStream::into_split`, the pattern `dicom-ul`'s own async
//! server association uses internally for its read loop versus its write
//! calls). The split matters here for a concrete reason: the `Abort` state
//! must race a `send_abort` write against inbound events arriving
//! on the *same* connection. If both lived behind one `&mut self`, the
//! in-flight write would have to hold an exclusive borrow for as long as
//! the race lasts, which would make it impossible to also poll for inbound
//! events at the same time. Two independently-borrowable fields sidestep
//! that entirely.

use async_trait::async_trait;

use crate::error::ConnectionError;
use crate::event::ConnectionEvent;
use crate::options::AssociationParams;
use crate::queue::Request;
use crate::types::AbortRQSource;

/// The write side of a connection to a DICOM peer.
///
/// Implementations are expected to be cheap to hold onto across an `await`
/// boundary without blocking unrelated reads: in practice this usually
/// means an implementation is a thin handle over a channel to a dedicated
/// writer task, rather than a raw socket handle, which is why every method
/// here takes `&self` rather than `&mut self`.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
    /// Establish the transport (TCP, optionally wrapped in TLS).
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Send the association request built from `params`.
    async fn send_association_request(&self, params: &AssociationParams) -> Result<(), ConnectionError>;

    /// Enqueue `request` on the transport's outbound send pipeline.
    ///
    /// Completion signals that the request was handed to the pipeline, not
    /// that the peer has acknowledged it; responses arrive later as
    /// [`ConnectionEvent::RequestCompleted`] through the
    /// [`ConnectionSource`].
    async fn send_request(&self, request: Request) -> Result<(), ConnectionError>;

    /// Request a graceful release. Best-effort: completion signals
    /// write-dispatched, not acknowledged.
    async fn send_association_release(&self) -> Result<(), ConnectionError>;

    /// Request an immediate abort. Best-effort, same caveat as
    /// [`send_association_release`](Self::send_association_release).
    async fn send_abort(&self, source: AbortRQSource) -> Result<(), ConnectionError>;

    /// Idempotent close of the underlying transport.
    async fn disconnect(&self) -> Result<(), ConnectionError>;
}

/// The read side of a connection to a DICOM peer: a single-consumer stream
/// of already-parsed [`ConnectionEvent`]s.
///
/// Ordering guarantee: events are delivered in the order they were
/// received from the wire, and a [`ConnectionEvent::ConnectionClosed`] is
/// always the last event observed for a given association.
#[async_trait]
pub trait ConnectionSource: Send {
    /// Receive the next event from the connection, or `None` once the
    /// event source is exhausted.
    async fn recv_event(&mut self) -> Option<ConnectionEvent>;
}

/// A connected pair ready to be handed to a [`Driver`](crate::driver::Driver).
pub struct Connection {
    pub sink: Box<dyn ConnectionSink>,
    pub source: Box<dyn ConnectionSource>,
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    //! An in-memory [`ConnectionSink`]/[`ConnectionSource`] pair for driving
    //! the state machine in tests without a real socket.
    //!
    //! This is the fake used by this crate's own scenario tests
    //! (`tests/scenario_*.rs`) and is exported behind `test-util` so
    //! downstream crates embedding this state machine can write their own
    //! scenario tests against it too, the same way the reference crate
    //! keeps its association fakes inside its own `tests/` tree today.

    use super::*;
    use tokio::sync::mpsc;

    /// A command observed by the test harness, with enough payload to make
    /// assertions (the live [`Command`](crate::event::Command) enum carries
    /// a [`Request`], which isn't [`Clone`], so the harness instead records
    /// a cheap summary of what was dispatched).
    #[derive(Debug, Clone, Eq, PartialEq)]
    pub enum ObservedCommand {
        Connect,
        SendAssociationRequest,
        SendRequest { message_id: u16 },
        SendAssociationRelease,
        SendAbort,
        Disconnect,
    }

    /// The write half of an in-memory connection: records every command
    /// issued by the state machine onto an unbounded channel.
    pub struct ChannelSink {
        observed: mpsc::UnboundedSender<ObservedCommand>,
        connect_fails: bool,
    }

    #[async_trait]
    impl ConnectionSink for ChannelSink {
        async fn connect(&self) -> Result<(), ConnectionError> {
            if self.connect_fails {
                return Err(ConnectionError::Connect {
                    source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
                });
            }
            let _ = self.observed.send(ObservedCommand::Connect);
            Ok(())
        }

        async fn send_association_request(
            &self,
            _params: &AssociationParams,
        ) -> Result<(), ConnectionError> {
            let _ = self.observed.send(ObservedCommand::SendAssociationRequest);
            Ok(())
        }

        async fn send_request(&self, request: Request) -> Result<(), ConnectionError> {
            let _ = self.observed.send(ObservedCommand::SendRequest {
                message_id: request.message_id,
            });
            Ok(())
        }

        async fn send_association_release(&self) -> Result<(), ConnectionError> {
            let _ = self.observed.send(ObservedCommand::SendAssociationRelease);
            Ok(())
        }

        async fn send_abort(&self, _source: AbortRQSource) -> Result<(), ConnectionError> {
            let _ = self.observed.send(ObservedCommand::SendAbort);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), ConnectionError> {
            let _ = self.observed.send(ObservedCommand::Disconnect);
            Ok(())
        }
    }

    /// The read half of an in-memory connection: a test injects
    /// [`ConnectionEvent`]s through [`ChannelConnectionHandle::events`] and
    /// they surface here.
    pub struct ChannelSource {
        events: mpsc::UnboundedReceiver<ConnectionEvent>,
    }

    #[async_trait]
    impl ConnectionSource for ChannelSource {
        async fn recv_event(&mut self) -> Option<ConnectionEvent> {
            self.events.recv().await
        }
    }

    /// The other end of a fake connection: lets a test inspect every
    /// command the state machine issued, and inject inbound events as if
    /// they came from the peer.
    pub struct ChannelConnectionHandle {
        pub commands: mpsc::UnboundedReceiver<ObservedCommand>,
        pub events: mpsc::UnboundedSender<ConnectionEvent>,
    }

    /// Build an in-memory connected pair: the [`Connection`] to hand to the
    /// driver, and the [`ChannelConnectionHandle`] to keep in the test.
    pub fn channel_connection() -> (Connection, ChannelConnectionHandle) {
        build(false)
    }

    /// Build a pair whose `connect()` always fails, for exercising the
    /// transport-failure path without a real socket.
    pub fn channel_connection_failing_to_connect() -> (Connection, ChannelConnectionHandle) {
        build(true)
    }

    fn build(connect_fails: bool) -> (Connection, ChannelConnectionHandle) {
        let (observed_tx, observed_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = Connection {
            sink: Box::new(ChannelSink {
                observed: observed_tx,
                connect_fails,
            }),
            source: Box::new(ChannelSource { events: events_rx }),
        };
        let handle = ChannelConnectionHandle {
            commands: observed_rx,
            events: events_tx,
        };
        (connection, handle)
    }
}
