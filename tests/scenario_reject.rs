//! End-to-end scenario 2: the peer rejects the association outright.

use dicom_assoc_fsm::client::DicomClient;
use dicom_assoc_fsm::options::ClientStateMachineOptions;
use dicom_assoc_fsm::outcome::Outcome;
use dicom_assoc_fsm::port::test_util::{channel_connection, ObservedCommand};
use dicom_assoc_fsm::queue::Request;
use dicom_assoc_fsm::event::ConnectionEvent;
use dicom_assoc_fsm::types::{AssociationRJResult, AssociationRJServiceUserReason, AssociationRJSource};
use tokio_util::sync::CancellationToken;

fn params() -> dicom_assoc_fsm::options::AssociationParams {
    ClientStateMachineOptions::new()
        .remote_address("127.0.0.1:104".parse().unwrap())
        .with_abstract_syntax("1.2.840.10008.1.1")
        .build()
        .unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test]
async fn peer_rejection_completes_with_rejected_outcome() {
    init_tracing();
    let client = DicomClient::new(params());
    let (req, _responses) = Request::new(1, b"echo".to_vec());
    client.add_request(req).await;

    let (connection, mut handle) = channel_connection();

    let send_task = tokio::spawn({
        let client = std::sync::Arc::new(client);
        let client2 = std::sync::Arc::clone(&client);
        async move { client2.send(connection, CancellationToken::new()).await }
    });

    assert_eq!(handle.commands.recv().await, Some(ObservedCommand::Connect));
    assert_eq!(
        handle.commands.recv().await,
        Some(ObservedCommand::SendAssociationRequest)
    );

    handle
        .events
        .send(ConnectionEvent::AssociationReject {
            result: AssociationRJResult::Permanent,
            source: AssociationRJSource::ServiceUser(AssociationRJServiceUserReason::NoReasonGiven),
        })
        .unwrap();

    assert_eq!(handle.commands.recv().await, Some(ObservedCommand::Disconnect));

    let outcome = send_task.await.unwrap().unwrap();
    assert!(matches!(
        outcome,
        Outcome::RejectedByPeer {
            result: AssociationRJResult::Permanent,
            ..
        }
    ));
}
