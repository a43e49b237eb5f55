//! Association parameters and timeout configuration.
//!
//! [`ClientStateMachineOptions`] is a consuming builder in the same style as
//! the reference crate's `ClientAssociationOptions`/`ServerAssociationOptions`:
//! every `with_*`/setter method takes `self` by value and returns `Self`, so
//! options are assembled with a method chain and then consumed once, by
//! [`build`](ClientStateMachineOptions::build).

use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Duration;

use snafu::{ensure, OptionExt};

use crate::address::{AeAddr, FullAeAddr};
use crate::error::{MissingAbstractSyntaxSnafu, MissingRemoteAddressSnafu, OptionsError};

/// The hard-coded abort acknowledgement timeout.
///
/// The reference implementation this crate is modeled on hard-codes this at
/// 100 ms, independent of any other configuration, and so does this crate:
/// no builder method exists to override it. See `DESIGN.md` for why this is
/// preserved rather than "fixed" into a configurable value.
pub const ASSOCIATION_ABORT_TIMEOUT: Duration = Duration::from_millis(100);

/// Timeouts governing how long the state machine waits for the peer before
/// giving up and aborting.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub association_request_timeout: Duration,
    pub association_release_timeout: Duration,
    pub association_linger_timeout: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            association_request_timeout: Duration::from_millis(5000),
            association_release_timeout: Duration::from_millis(10_000),
            association_linger_timeout: Duration::from_millis(50),
        }
    }
}

/// A builder for the parameters of a client-driven association.
///
/// # Example
///
/// ```
/// # use dicom_assoc_fsm::options::ClientStateMachineOptions;
/// # use std::time::Duration;
/// let options = ClientStateMachineOptions::new()
///     .calling_ae_title("THIS-SCU")
///     .called_ae_title("ANY-SCP")
///     .remote_address("127.0.0.1:104".parse().unwrap())
///     .with_abstract_syntax("1.2.840.10008.1.1")
///     .with_transfer_syntax("1.2.840.10008.1.2.1")
///     .association_linger_timeout(Duration::from_millis(25))
///     .build()
///     .unwrap();
/// assert_eq!(options.calling_ae_title(), "THIS-SCU");
/// ```
#[derive(Debug, Clone)]
pub struct ClientStateMachineOptions {
    calling_ae_title: Cow<'static, str>,
    called_ae_title: Cow<'static, str>,
    remote_address: Option<SocketAddr>,
    application_context_name: Cow<'static, str>,
    abstract_syntax_uids: Vec<Cow<'static, str>>,
    transfer_syntax_uids: Vec<Cow<'static, str>>,
    additional_presentation_contexts: Vec<(Cow<'static, str>, Vec<Cow<'static, str>>)>,
    protocol_version: u16,
    max_pdu_length: u32,
    max_operations_invoked: u16,
    max_operations_performed: u16,
    fallback_text_encoding: Cow<'static, str>,
    tls: bool,
    timeouts: Timeouts,
}

impl Default for ClientStateMachineOptions {
    fn default() -> Self {
        ClientStateMachineOptions {
            calling_ae_title: "THIS-SCU".into(),
            called_ae_title: "ANY-SCP".into(),
            remote_address: None,
            application_context_name: "1.2.840.10008.3.1.1.1".into(),
            abstract_syntax_uids: Vec::new(),
            transfer_syntax_uids: Vec::new(),
            additional_presentation_contexts: Vec::new(),
            protocol_version: 1,
            max_pdu_length: 16384,
            max_operations_invoked: 1,
            max_operations_performed: 1,
            fallback_text_encoding: "ISO_IR 6".into(),
            tls: false,
            timeouts: Timeouts::default(),
        }
    }
}

impl ClientStateMachineOptions {
    /// Create a new set of options for driving an association.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the calling application entity title for the association,
    /// which refers to this DICOM node.
    ///
    /// The default is `THIS-SCU`.
    pub fn calling_ae_title<T>(mut self, calling_ae_title: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.calling_ae_title = calling_ae_title.into();
        self
    }

    /// Define the called application entity title for the association,
    /// which refers to the target DICOM node.
    ///
    /// The default is `ANY-SCP`.
    pub fn called_ae_title<T>(mut self, called_ae_title: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.called_ae_title = called_ae_title.into();
        self
    }

    /// Define the network address of the called application entity.
    ///
    /// This is the host/port pair the connection port is expected to
    /// `connect()` to; the state machine never opens the socket itself, but
    /// `build` rejects options with no destination, the same way it rejects
    /// options with no proposed abstract syntax.
    pub fn remote_address(mut self, remote_address: SocketAddr) -> Self {
        self.remote_address = Some(remote_address);
        self
    }

    /// Define both the called AE title and the remote address at once, from
    /// a parsed [`FullAeAddr`] (`"{ae_title}@{socket_address}"`).
    pub fn remote(mut self, remote: FullAeAddr) -> Self {
        self.called_ae_title = remote.ae_title().to_string().into();
        self.remote_address = Some(remote.socket_addr());
        self
    }

    /// Define the remote address from a parsed [`AeAddr`], which carries the
    /// called AE title only if the input string included one; when absent,
    /// the previously configured [`called_ae_title`](Self::called_ae_title)
    /// (or its default) is left untouched.
    pub fn remote_ae_addr(mut self, remote: AeAddr) -> Self {
        if let Some(ae_title) = remote.ae_title() {
            self.called_ae_title = ae_title.to_string().into();
        }
        self.remote_address = Some(remote.socket_addr());
        self
    }

    /// Whether to negotiate the association over a TLS-secured channel.
    ///
    /// This is a flag consulted by the connection port implementation when
    /// `connect` is called; the state machine never touches TLS itself.
    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Include this abstract syntax in the list of proposed presentation
    /// contexts.
    pub fn with_abstract_syntax<T>(mut self, abstract_syntax_uid: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.abstract_syntax_uids.push(abstract_syntax_uid.into());
        self
    }

    /// Include this transfer syntax in each proposed presentation context.
    pub fn with_transfer_syntax<T>(mut self, transfer_syntax_uid: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.transfer_syntax_uids.push(transfer_syntax_uid.into());
        self
    }

    /// Propose an additional presentation context with its own independent
    /// set of transfer syntaxes, alongside the abstract/transfer syntaxes
    /// accumulated via [`with_abstract_syntax`](Self::with_abstract_syntax)
    /// and [`with_transfer_syntax`](Self::with_transfer_syntax).
    pub fn with_additional_presentation_context<A, T, I>(
        mut self,
        abstract_syntax_uid: A,
        transfer_syntax_uids: I,
    ) -> Self
    where
        A: Into<Cow<'static, str>>,
        T: Into<Cow<'static, str>>,
        I: IntoIterator<Item = T>,
    {
        self.additional_presentation_contexts.push((
            abstract_syntax_uid.into(),
            transfer_syntax_uids.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Override the maximum expected PDU length. Defaults to 16384 bytes.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Override the number of asynchronous operations this node may invoke
    /// concurrently. Defaults to 1.
    pub fn max_operations_invoked(mut self, value: u16) -> Self {
        self.max_operations_invoked = value;
        self
    }

    /// Override the number of asynchronous operations this node may
    /// perform concurrently. Defaults to 1.
    pub fn max_operations_performed(mut self, value: u16) -> Self {
        self.max_operations_performed = value;
        self
    }

    /// Override the text encoding assumed when the peer does not negotiate
    /// one explicitly. Defaults to `ISO_IR 6` (the DICOM default repertoire).
    pub fn fallback_text_encoding<T>(mut self, encoding: T) -> Self
    where
        T: Into<Cow<'static, str>>,
    {
        self.fallback_text_encoding = encoding.into();
        self
    }

    /// Override how long to wait for the peer to respond to the association
    /// request before timing out. Defaults to 5000 ms.
    pub fn association_request_timeout(mut self, value: Duration) -> Self {
        self.timeouts.association_request_timeout = value;
        self
    }

    /// Override how long to wait for the peer to acknowledge a release
    /// request before timing out. Defaults to 10000 ms.
    pub fn association_release_timeout(mut self, value: Duration) -> Self {
        self.timeouts.association_release_timeout = value;
        self
    }

    /// Override how long to linger after the send queue drains before
    /// releasing the association. Defaults to 50 ms.
    pub fn association_linger_timeout(mut self, value: Duration) -> Self {
        self.timeouts.association_linger_timeout = value;
        self
    }

    /// Finalize the options into an immutable [`AssociationParams`],
    /// failing if the parameters are incomplete.
    pub fn build(self) -> Result<AssociationParams, OptionsError> {
        ensure!(!self.abstract_syntax_uids.is_empty(), MissingAbstractSyntaxSnafu);
        let remote_address = self.remote_address.context(MissingRemoteAddressSnafu)?;

        let mut transfer_syntax_uids = self.transfer_syntax_uids;
        if transfer_syntax_uids.is_empty() {
            // Explicit VR Little Endian
            transfer_syntax_uids.push("1.2.840.10008.1.2.1".into());
            // Implicit VR Little Endian
            transfer_syntax_uids.push("1.2.840.10008.1.2".into());
        }

        let presentation_contexts = self
            .abstract_syntax_uids
            .into_iter()
            .enumerate()
            .map(|(i, abstract_syntax)| crate::types::PresentationContextProposed {
                id: (i * 2 + 1) as u8,
                abstract_syntax: abstract_syntax.to_string(),
                transfer_syntaxes: transfer_syntax_uids.iter().map(|uid| uid.to_string()).collect(),
            })
            .chain(
                self.additional_presentation_contexts
                    .into_iter()
                    .enumerate()
                    .map(|(i, (abstract_syntax, transfer_syntaxes))| {
                        crate::types::PresentationContextProposed {
                            id: ((i + 1) * 2) as u8 + 1,
                            abstract_syntax: abstract_syntax.to_string(),
                            transfer_syntaxes: transfer_syntaxes
                                .into_iter()
                                .map(|uid| uid.to_string())
                                .collect(),
                        }
                    }),
            )
            .collect();

        Ok(AssociationParams {
            calling_ae_title: self.calling_ae_title.to_string(),
            called_ae_title: self.called_ae_title.to_string(),
            remote_address,
            application_context_name: self.application_context_name.to_string(),
            presentation_contexts,
            protocol_version: self.protocol_version,
            max_pdu_length: self.max_pdu_length,
            max_operations_invoked: self.max_operations_invoked,
            max_operations_performed: self.max_operations_performed,
            fallback_text_encoding: self.fallback_text_encoding.to_string(),
            tls: self.tls,
            timeouts: self.timeouts,
        })
    }

    /// The calling AE title configured so far.
    pub fn calling_ae_title(&self) -> &str {
        &self.calling_ae_title
    }
}

/// The immutable, fully-resolved parameters of a client-driven association.
#[derive(Debug, Clone)]
pub struct AssociationParams {
    pub calling_ae_title: String,
    pub called_ae_title: String,
    pub remote_address: SocketAddr,
    pub application_context_name: String,
    pub presentation_contexts: Vec<crate::types::PresentationContextProposed>,
    pub protocol_version: u16,
    pub max_pdu_length: u32,
    pub max_operations_invoked: u16,
    pub max_operations_performed: u16,
    pub fallback_text_encoding: String,
    pub tls: bool,
    pub timeouts: Timeouts,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:104".parse().unwrap()
    }

    #[test]
    fn build_fails_without_abstract_syntax() {
        let err = ClientStateMachineOptions::new()
            .remote_address(test_addr())
            .build()
            .unwrap_err();
        assert!(matches!(err, OptionsError::MissingAbstractSyntax));
    }

    #[test]
    fn build_fails_without_remote_address() {
        let err = ClientStateMachineOptions::new()
            .with_abstract_syntax("1.2.840.10008.1.1")
            .build()
            .unwrap_err();
        assert!(matches!(err, OptionsError::MissingRemoteAddress));
    }

    #[test]
    fn build_fills_in_default_transfer_syntaxes() {
        let params = ClientStateMachineOptions::new()
            .remote_address(test_addr())
            .with_abstract_syntax("1.2.840.10008.1.1")
            .build()
            .unwrap();
        assert_eq!(params.presentation_contexts.len(), 1);
        assert_eq!(
            params.presentation_contexts[0].transfer_syntaxes,
            vec!["1.2.840.10008.1.2.1", "1.2.840.10008.1.2"]
        );
    }

    #[test]
    fn remote_parses_ae_title_and_address_together() {
        let full: FullAeAddr = "REMOTE-SCP@127.0.0.1:104".parse().unwrap();
        let params = ClientStateMachineOptions::new()
            .remote(full)
            .with_abstract_syntax("1.2.840.10008.1.1")
            .build()
            .unwrap();
        assert_eq!(params.called_ae_title, "REMOTE-SCP");
        assert_eq!(params.remote_address, test_addr());
    }

    #[test]
    fn additional_presentation_contexts_get_distinct_odd_ids() {
        let params = ClientStateMachineOptions::new()
            .remote_address(test_addr())
            .with_abstract_syntax("1.2.840.10008.1.1")
            .with_additional_presentation_context(
                "1.2.840.10008.5.1.4.1.1.7",
                vec!["1.2.840.10008.1.2.1"],
            )
            .build()
            .unwrap();
        assert_eq!(params.presentation_contexts.len(), 2);
        assert_ne!(
            params.presentation_contexts[0].id,
            params.presentation_contexts[1].id
        );
    }
}
