//! Correlated request/response plumbing.
//!
//! Every outbound request gets a sequence number and a parked waiter; the
//! read pump completes waiters as responses arrive. Closing the connection
//! fails every parked waiter at once, so nothing hangs on a dead socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use skirmish_proto::{
    DispatchCall, EntitySnapshot, ObjectId, RequestBody, ResponseBody, WireMessage,
};
use tokio::sync::{mpsc, oneshot};

use crate::error::RequestError;

pub(crate) struct Dispatcher {
    next_seq: AtomicU64,
    /// `None` once the connection is closed; new requests fail fast.
    pending: Mutex<Option<HashMap<u64, oneshot::Sender<ResponseBody>>>>,
    outbound: mpsc::Sender<WireMessage>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(outbound: mpsc::Sender<WireMessage>, timeout: Duration) -> Self {
        Self {
            next_seq: AtomicU64::new(1),
            pending: Mutex::new(Some(HashMap::new())),
            outbound,
            timeout,
        }
    }

    /// Send one request and wait for its correlated response.
    pub async fn request(&self, body: RequestBody) -> Result<ResponseBody, RequestError> {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            match pending.as_mut() {
                Some(map) => map.insert(seq, tx),
                None => return Err(RequestError::ConnectionClosed),
            };
        }

        if self
            .outbound
            .send(WireMessage::Request { seq, body })
            .await
            .is_err()
        {
            self.forget(seq);
            return Err(RequestError::ConnectionClosed);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(ResponseBody::Error(err))) => Err(RequestError::Refused(err)),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RequestError::ConnectionClosed),
            Err(_) => {
                self.forget(seq);
                Err(RequestError::Timeout)
            }
        }
    }

    /// Send one call and report whether the authoritative model changed.
    pub async fn dispatch(&self, call: DispatchCall) -> Result<bool, RequestError> {
        match self.request(RequestBody::Call(call)).await? {
            ResponseBody::CallOutcome { changed, .. } => Ok(changed),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    /// Fetch the authoritative snapshot of one entity.
    pub async fn fetch(&self, target: ObjectId) -> Result<EntitySnapshot, RequestError> {
        match self.request(RequestBody::Fetch { target }).await? {
            ResponseBody::Entity(snapshot) => Ok(snapshot),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    /// Queue an answer to a relayed request. Used by the hosting side.
    pub async fn respond(&self, seq: u64, body: ResponseBody) -> Result<(), RequestError> {
        self.outbound
            .send(WireMessage::Response { seq, body })
            .await
            .map_err(|_| RequestError::ConnectionClosed)
    }

    /// Hand an inbound response to its parked waiter.
    pub fn complete(&self, seq: u64, body: ResponseBody) {
        let waiter = self.pending.lock().as_mut().and_then(|map| map.remove(&seq));
        match waiter {
            // the waiter may have timed out in the meantime
            Some(tx) => {
                let _ = tx.send(body);
            }
            None => tracing::warn!(seq, "Response with no waiting request"),
        }
    }

    /// Fail every parked waiter and refuse new requests.
    pub fn fail_all(&self) {
        if let Some(map) = self.pending.lock().take() {
            if !map.is_empty() {
                tracing::debug!(count = map.len(), "Failing requests on closed connection");
            }
        }
    }

    fn forget(&self, seq: u64) {
        if let Some(map) = self.pending.lock().as_mut() {
            map.remove(&seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use skirmish_proto::WireError;

    use super::*;

    fn harness(timeout: Duration) -> (Arc<Dispatcher>, mpsc::Receiver<WireMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (Arc::new(Dispatcher::new(tx, timeout)), rx)
    }

    #[tokio::test]
    async fn test_response_resolves_request() {
        let (dispatcher, mut rx) = harness(Duration::from_secs(5));

        let responder = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                let Some(WireMessage::Request { seq, body }) = rx.recv().await else {
                    panic!("no request on the wire");
                };
                assert_eq!(body, RequestBody::ListLobbies);
                dispatcher.complete(seq, ResponseBody::Lobbies(Vec::new()));
            }
        });

        let got = dispatcher.request(RequestBody::ListLobbies).await.unwrap();
        assert_eq!(got, ResponseBody::Lobbies(Vec::new()));
        responder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_request_times_out() {
        let (dispatcher, _rx) = harness(Duration::from_millis(100));

        let got = dispatcher.request(RequestBody::ListLobbies).await;
        assert_eq!(got, Err(RequestError::Timeout));
    }

    #[tokio::test]
    async fn test_error_response_becomes_refused() {
        let (dispatcher, mut rx) = harness(Duration::from_secs(5));

        let responder = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                if let Some(WireMessage::Request { seq, .. }) = rx.recv().await {
                    dispatcher.complete(seq, ResponseBody::Error(WireError::NotPermitted));
                }
            }
        });

        let got = dispatcher.request(RequestBody::ListLobbies).await;
        assert_eq!(got, Err(RequestError::Refused(WireError::NotPermitted)));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_all_rejects_pending_and_future_requests() {
        let (dispatcher, _rx) = harness(Duration::from_secs(30));

        let parked = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            async move { dispatcher.request(RequestBody::ListLobbies).await }
        });
        tokio::task::yield_now().await;

        dispatcher.fail_all();

        assert_eq!(parked.await.unwrap(), Err(RequestError::ConnectionClosed));
        assert_eq!(
            dispatcher.request(RequestBody::ListLobbies).await,
            Err(RequestError::ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn test_closed_outbound_channel_fails_request() {
        let (dispatcher, rx) = harness(Duration::from_secs(5));
        drop(rx);

        let got = dispatcher.request(RequestBody::ListLobbies).await;
        assert_eq!(got, Err(RequestError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_mismatched_response_shape_is_rejected() {
        let (dispatcher, mut rx) = harness(Duration::from_secs(5));

        let responder = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            async move {
                if let Some(WireMessage::Request { seq, .. }) = rx.recv().await {
                    dispatcher.complete(seq, ResponseBody::Ok);
                }
            }
        });

        let got = dispatcher.fetch(ObjectId(3)).await;
        assert_eq!(got, Err(RequestError::UnexpectedResponse));
        responder.await.unwrap();
    }
}
