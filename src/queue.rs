//! The FIFO of user-submitted requests awaiting dispatch.
//!
//! The queue outlives any individual state: a caller may enqueue requests
//! before `send` is ever called, and may enqueue more while the association
//! is lingering. It is therefore owned by the [facade](crate::client), not
//! by the state machine itself, and is only ever *drained from* by the
//! `Sending` state.

use std::collections::VecDeque;

use tokio::sync::{mpsc, Mutex};

/// The final or intermediate status of a response to a dispatched request.
///
/// Only the terminal statuses decrement the "outstanding responses" count
/// that the `Sending` state uses to decide when the send queue has truly
/// drained.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ResponseStatus {
    /// An intermediate status; more responses for this request are coming.
    Pending,
    /// A warning that is itself a continuation marker, not a terminus.
    WarningContinuation,
    Success,
    Warning,
    Failure,
    Cancel,
}

impl ResponseStatus {
    /// Whether this status ends the request's lifecycle.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ResponseStatus::Pending | ResponseStatus::WarningContinuation)
    }
}

/// A response to a previously dispatched request.
///
/// The dataset/command payload itself is out of scope for this crate; a
/// connection port implementation hands over only what the state machine
/// needs to make progress.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: ResponseStatus,
}

/// A queued DICOM request descriptor.
///
/// The payload is an opaque, connection-port-specific value: this crate
/// does not encode or interpret DIMSE messages, it only tracks dispatch and
/// completion.
#[derive(Debug)]
pub struct Request {
    pub message_id: u16,
    pub payload: Vec<u8>,
    pub(crate) callback: mpsc::UnboundedSender<Response>,
}

impl Request {
    /// Create a new request descriptor together with the receiving half of
    /// its response callback channel.
    pub fn new(message_id: u16, payload: Vec<u8>) -> (Self, mpsc::UnboundedReceiver<Response>) {
        let (callback, responses) = mpsc::unbounded_channel();
        (
            Request {
                message_id,
                payload,
                callback,
            },
            responses,
        )
    }
}

/// An ordered, append-at-tail/pop-at-head queue of requests awaiting
/// dispatch.
///
/// Invariant: a request present in the queue has not yet received a
/// terminal response.
#[derive(Debug, Default)]
pub struct RequestQueue {
    inner: Mutex<VecDeque<Request>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        RequestQueue {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a request to the tail of the queue. Safe to call from any
    /// state, including `Abort` and `Completed`.
    pub async fn enqueue(&self, request: Request) {
        self.inner.lock().await.push_back(request);
    }

    /// Pop the request at the head of the queue, if any.
    ///
    /// Only the `Sending` state is expected to call this.
    pub async fn try_pop(&self) -> Option<Request> {
        self.inner.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Drain every currently queued request, in FIFO order.
    pub async fn drain_all(&self) -> Vec<Request> {
        self.inner.lock().await.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = RequestQueue::new();
        for id in 0..3u16 {
            let (req, _rx) = Request::new(id, vec![]);
            queue.enqueue(req).await;
        }
        assert_eq!(queue.len().await, 3);
        assert_eq!(queue.try_pop().await.unwrap().message_id, 0);
        assert_eq!(queue.try_pop().await.unwrap().message_id, 1);
        assert_eq!(queue.try_pop().await.unwrap().message_id, 2);
        assert!(queue.try_pop().await.is_none());
    }

    #[tokio::test]
    async fn response_terminality() {
        assert!(!ResponseStatus::Pending.is_terminal());
        assert!(!ResponseStatus::WarningContinuation.is_terminal());
        assert!(ResponseStatus::Success.is_terminal());
        assert!(ResponseStatus::Failure.is_terminal());
        assert!(ResponseStatus::Cancel.is_terminal());
        assert!(ResponseStatus::Warning.is_terminal());
    }
}
