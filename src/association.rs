//! The negotiated association descriptor, live only while a state is one
//! of `Sending`, `Linger`, `ReleaseAssociation`, or `Abort`.

use crate::types::PresentationContextResult;

/// The outcome of a successful association negotiation: the accepted
/// presentation contexts and the agreed maximum PDU length.
///
/// This mirrors the reference crate's `Association`/`ClientAssociation`
/// structs, minus the live socket: the socket (or TLS stream, or anything
/// else a transport needs) lives behind the
/// [`ConnectionSink`](crate::port::ConnectionSink)/[`ConnectionSource`](crate::port::ConnectionSource)
/// pair, not in the state machine.
#[derive(Debug, Clone)]
pub struct AssociationHandle {
    /// The presentation contexts accepted by the peer.
    pub presentation_contexts: Vec<PresentationContextResult>,
    /// The maximum PDU length accepted by the peer.
    pub max_pdu_length: u32,
}

impl AssociationHandle {
    /// The presentation context accepted for a given abstract syntax, if
    /// any was accepted.
    pub fn context_for(&self, presentation_context_id: u8) -> Option<&PresentationContextResult> {
        self.presentation_contexts
            .iter()
            .find(|pc| pc.id == presentation_context_id)
    }
}
