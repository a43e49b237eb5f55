//! End-to-end scenario 3: the peer never answers the association request,
//! so the request timeout fires, driving the machine through `Abort` and
//! into a `TimedOut` completion.

use std::time::Duration;

use dicom_assoc_fsm::client::DicomClient;
use dicom_assoc_fsm::event::TimeoutKind;
use dicom_assoc_fsm::options::ClientStateMachineOptions;
use dicom_assoc_fsm::outcome::Outcome;
use dicom_assoc_fsm::port::test_util::{channel_connection, ObservedCommand};
use dicom_assoc_fsm::queue::Request;
use tokio_util::sync::CancellationToken;

fn quick_timeout_params() -> dicom_assoc_fsm::options::AssociationParams {
    ClientStateMachineOptions::new()
        .remote_address("127.0.0.1:104".parse().unwrap())
        .with_abstract_syntax("1.2.840.10008.1.1")
        .association_request_timeout(Duration::from_millis(20))
        .build()
        .unwrap()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[tokio::test]
async fn unanswered_association_request_times_out_and_aborts() {
    init_tracing();
    let client = DicomClient::new(quick_timeout_params());
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

    // The peer never responds: no event is injected. The request timeout
    // should fire on its own, driving Abort's local send-abort branch,
    // which in this fake always succeeds immediately.
    assert_eq!(handle.commands.recv().await, Some(ObservedCommand::SendAbort));
    assert_eq!(handle.commands.recv().await, Some(ObservedCommand::Disconnect));

    let outcome = send_task.await.unwrap().unwrap();
    assert!(matches!(
        outcome,
        Outcome::TimedOut {
            kind: TimeoutKind::RequestAssoc
        }
    ));
}
