//! End-to-end scenario 5: a request arrives while the association is
//! lingering, kicking it back into `Sending` before it eventually releases.

use std::time::Duration;

use dicom_assoc_fsm::association::AssociationHandle;
use dicom_assoc_fsm::client::DicomClient;
use dicom_assoc_fsm::event::ConnectionEvent;
use dicom_assoc_fsm::options::ClientStateMachineOptions;
use dicom_assoc_fsm::outcome::{ClientNotification, Outcome};
use dicom_assoc_fsm::port::test_util::{channel_connection, ObservedCommand};
use dicom_assoc_fsm::queue::{Request, Response, ResponseStatus};
use dicom_assoc_fsm::state::StateKind;
use tokio_util::sync::CancellationToken;

fn params() -> dicom_assoc_fsm::options::AssociationParams {
    ClientStateMachineOptions::new()
        .remote_address("127.0.0.1:104".parse().unwrap())
        .with_abstract_syntax("1.2.840.10008.1.1")
        .association_linger_timeout(Duration::from_millis(30))
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
async fn request_during_linger_returns_to_sending_then_relinger_and_release() {
    init_tracing();
    let client = DicomClient::new(params());
    let mut notifications = client.subscribe();
    let (req1, _rx1) = Request::new(1, b"first".to_vec());
    client.add_request(req1).await;

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

    handle
        .events
        .send(ConnectionEvent::RequestCompleted {
            request_id: 1,
            response: Response {
                status: ResponseStatus::Success,
            },
        })
        .unwrap();
    handle.events.send(ConnectionEvent::SendQueueEmpty).unwrap();

    // Now lingering. Before the linger timer fires, enqueue a second request.
    let (req2, _rx2) = Request::new(2, b"second".to_vec());
    client.add_request(req2).await;

    assert_eq!(
        handle.commands.recv().await,
        Some(ObservedCommand::SendRequest { message_id: 2 })
    );

    handle
        .events
        .send(ConnectionEvent::RequestCompleted {
            request_id: 2,
            response: Response {
                status: ResponseStatus::Success,
            },
        })
        .unwrap();
    handle.events.send(ConnectionEvent::SendQueueEmpty).unwrap();

    assert_eq!(
        handle.commands.recv().await,
        Some(ObservedCommand::SendAssociationRelease)
    );
    handle
        .events
        .send(ConnectionEvent::AssociationReleaseResponse)
        .unwrap();
    assert_eq!(handle.commands.recv().await, Some(ObservedCommand::Disconnect));

    let outcome = send_task.await.unwrap().unwrap();
    assert!(matches!(outcome, Outcome::ReleasedCleanly));

    let mut trace = Vec::new();
    while let Ok(notification) = notifications.try_recv() {
        if let ClientNotification::StateChanged { new, .. } = notification {
            trace.push(new);
        }
    }
    assert_eq!(
        trace,
        vec![
            StateKind::RequestAssociation,
            StateKind::Sending,
            StateKind::Linger,
            StateKind::Sending,
            StateKind::Linger,
            StateKind::ReleaseAssociation,
            StateKind::Completed,
        ]
    );
}
