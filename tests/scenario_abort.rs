//! End-to-end scenario 4: a user-requested abort while the association is
//! actively sending, and a peer-initiated abort racing it from the other
//! side.

use dicom_assoc_fsm::association::AssociationHandle;
use dicom_assoc_fsm::client::DicomClient;
use dicom_assoc_fsm::event::ConnectionEvent;
use dicom_assoc_fsm::options::ClientStateMachineOptions;
use dicom_assoc_fsm::outcome::Outcome;
use dicom_assoc_fsm::port::test_util::{channel_connection, ObservedCommand};
use dicom_assoc_fsm::queue::Request;
use dicom_assoc_fsm::types::AbortRQSource;
use tokio_util::sync::CancellationToken;

fn params() -> dicom_assoc_fsm::options::AssociationParams {
    ClientStateMachineOptions::new()
        .remote_address("127.0.0.1:104".parse().unwrap())
        .with_abstract_syntax("1.2.840.10008.1.1")
        .build()
        .unwrap()
}

fn accepted_handle() -> AssociationHandle {
    AssociationHandle {
        presentation_contexts: Vec::new(),
        max_pdu_length: 16384,
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test]
async fn user_abort_while_sending_completes_locally() {
    init_tracing();
    let client = DicomClient::new(params());
    let (req, _responses) = Request::new(1, b"echo".to_vec());
    client.add_request(req).await;

    let (connection, mut handle) = channel_connection();

    let client = std::sync::Arc::new(client);
    let send_task = tokio::spawn({
        let client = std::sync::Arc::clone(&client);
        async move { client.send(connection, CancellationToken::new()).await }
    });

    assert_eq!(handle.commands.recv().await, Some(ObservedCommand::Connect));
    assert_eq!(
        handle.commands.recv().await,
        Some(ObservedCommand::SendAssociationRequest)
    );

    handle
        .events
        .send(ConnectionEvent::AssociationAccept(accepted_handle()))
        .unwrap();

    assert_eq!(
        handle.commands.recv().await,
        Some(ObservedCommand::SendRequest { message_id: 1 })
    );

    client.abort().await;

    assert_eq!(handle.commands.recv().await, Some(ObservedCommand::SendAbort));
    assert_eq!(handle.commands.recv().await, Some(ObservedCommand::Disconnect));

    let outcome = send_task.await.unwrap().unwrap();
    assert!(matches!(outcome, Outcome::AbortedLocally));
}

#[tokio::test]
async fn peer_initiated_abort_completes_directly_as_aborted_by_peer() {
    init_tracing();
    let client = DicomClient::new(params());
    let (req, _responses) = Request::new(1, b"echo".to_vec());
    client.add_request(req).await;

    let (connection, mut handle) = channel_connection();

    let client = std::sync::Arc::new(client);
    let send_task = tokio::spawn({
        let client = std::sync::Arc::clone(&client);
        async move { client.send(connection, CancellationToken::new()).await }
    });

    assert_eq!(handle.commands.recv().await, Some(ObservedCommand::Connect));
    assert_eq!(
        handle.commands.recv().await,
        Some(ObservedCommand::SendAssociationRequest)
    );

    handle
        .events
        .send(ConnectionEvent::AssociationAccept(accepted_handle()))
        .unwrap();
    assert_eq!(
        handle.commands.recv().await,
        Some(ObservedCommand::SendRequest { message_id: 1 })
    );

    // The peer aborts on its own initiative, with no local abort requested:
    // this bypasses the local `Abort` race entirely and completes directly.
    handle
        .events
        .send(ConnectionEvent::Abort {
            source: AbortRQSource::ServiceProvider(
                dicom_assoc_fsm::types::AbortRQServiceProviderReason::UnexpectedPdu,
            ),
        })
        .unwrap();

    assert_eq!(handle.commands.recv().await, Some(ObservedCommand::Disconnect));

    let outcome = send_task.await.unwrap().unwrap();
    assert!(matches!(outcome, Outcome::AbortedByPeer { .. }));
}
