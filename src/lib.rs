//! A client-side DICOM Upper Layer association state machine.
//!
//! This crate drives a single DICOM association, idle → requesting →
//! active → lingering → releasing (or aborting) → completed, on top of an
//! already-established byte-level connection. It does not speak TCP, TLS,
//! or the DICOM wire format itself; those live behind the
//! [`port::ConnectionSink`]/[`port::ConnectionSource`] pair, which a
//! concrete transport (e.g. `dicom-ul`'s own association machinery)
//! implements.
//!
//! - The [`client`] module provides [`client::DicomClient`], the
//!   user-facing facade: `add_request`, `send`, `abort`, and notification
//!   subscriptions.
//! - The [`options`] module builds the immutable [`options::AssociationParams`]
//!   a `send` negotiates with, via [`options::ClientStateMachineOptions`].
//! - The [`port`] module is the abstract connection boundary; its
//!   `test-util` feature exposes an in-memory fake for driving the machine
//!   without a socket.
//! - The [`queue`] module is the FIFO of requests awaiting dispatch.
//! - The [`state`] and [`driver`] modules implement the machine itself:
//!   the seven states and the transition protocol between them.
//! - The [`event`], [`outcome`], [`types`], and [`association`] modules are
//!   the vocabularies everything else is built from.
//! - The [`address`] module provides `{ae_title}@{socket_address}` address
//!   parsing, reused from the reference crate unchanged since it is ambient
//!   rather than protocol-state.
//!
//! ## Features
//! * `test-util`: exposes [`port::test_util`], the in-memory connection fake
//!   this crate's own tests are built on, for use from downstream
//!   integration tests.

pub mod address;
pub mod association;
pub mod client;
pub mod driver;
pub mod error;
pub mod event;
pub mod options;
pub mod outcome;
pub mod port;
pub mod queue;
pub mod state;
pub mod types;

pub use address::{AeAddr, FullAeAddr};
pub use client::DicomClient;
pub use options::{AssociationParams, ClientStateMachineOptions};
pub use outcome::{ClientNotification, Outcome};
