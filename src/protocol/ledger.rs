//! Outstanding-request ledger.
//!
//! Maps the id of every request still waiting for a reply to the
//! [`Mailbox`] its caller is blocked on. Whoever removes an entry resolves
//! its mailbox, so a fulfilment racing a timeout sweep or a connection drain
//! still delivers exactly one outcome.
//!
//! Id collisions are rejected: the existing entry stays untouched and the
//! second caller gets `ProtocolError::DuplicateRequestId`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::{ProtocolError, Result};
use crate::protocol::mailbox::Mailbox;
use crate::protocol::message::{MessageType, Request, RequestId, Response};

/// What a waiting caller eventually receives
pub type Reply = std::result::Result<Response, ProtocolError>;

#[derive(Debug)]
struct LedgerEntry {
    mailbox: Arc<Mailbox<Reply>>,
    kind: MessageType,
    registered_at: Instant,
    deadline: Instant,
}

#[derive(Debug, Default)]
pub struct Ledger {
    entries: DashMap<RequestId, LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register `request` and return the mailbox its reply will land in
    ///
    /// # Errors
    /// Returns `ProtocolError::DuplicateRequestId` if the id is already outstanding.
    pub fn add(&self, request: &Request, timeout: Duration) -> Result<Arc<Mailbox<Reply>>> {
        let now = Instant::now();
        match self.entries.entry(request.id().clone()) {
            Entry::Occupied(_) => Err(ProtocolError::DuplicateRequestId(
                request.id().to_string(),
            )),
            Entry::Vacant(slot) => {
                let mailbox = Arc::new(Mailbox::new());
                slot.insert(LedgerEntry {
                    mailbox: mailbox.clone(),
                    kind: request.kind(),
                    registered_at: now,
                    deadline: now + timeout,
                });
                trace!(id = %request.id(), kind = %request.kind(), "Request registered");
                Ok(mailbox)
            }
        }
    }

    /// Drop an entry without resolving it. Idempotent.
    pub fn remove(&self, id: &RequestId) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn include(&self, id: &RequestId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deliver `response` to the caller waiting on its id and return the
    /// kind of the request it answered.
    ///
    /// Hands the response back when no such request is outstanding.
    pub fn fulfill(&self, response: Response) -> std::result::Result<MessageType, Response> {
        match self.entries.remove(response.id()) {
            Some((id, entry)) => {
                trace!(
                    %id,
                    kind = %entry.kind,
                    elapsed_ms = entry.registered_at.elapsed().as_millis() as u64,
                    "Request fulfilled"
                );
                entry.mailbox.put(Ok(response));
                Ok(entry.kind)
            }
            None => Err(response),
        }
    }

    /// Fail one outstanding request
    pub fn reject(&self, id: &RequestId, error: ProtocolError) -> bool {
        match self.entries.remove(id) {
            Some((_, entry)) => entry.mailbox.put(Err(error)),
            None => false,
        }
    }

    /// Fail every outstanding request. Returns how many were rejected.
    pub fn drain<F>(&self, make_error: F) -> usize
    where
        F: Fn() -> ProtocolError,
    {
        let ids: Vec<RequestId> = self.entries.iter().map(|e| e.key().clone()).collect();
        let rejected = ids
            .iter()
            .filter(|id| self.reject(id, make_error()))
            .count();

        if rejected > 0 {
            debug!(rejected, "Ledger drained");
        }
        rejected
    }

    /// Resolve every entry whose deadline has passed with `ProtocolError::Timeout`
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let expired: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| e.key().clone())
            .collect();

        let mut swept = 0;
        for id in expired {
            if let Some((_, entry)) = self.entries.remove_if(&id, |_, e| e.deadline <= now) {
                debug!(%id, kind = %entry.kind, "Request expired");
                entry.mailbox.put(Err(ProtocolError::Timeout));
                swept += 1;
            }
        }
        swept
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::mailbox::Taken;

    fn reply_to(request: &Request, content: &str) -> Response {
        Response::new(request.id().clone(), MessageType::Message, content.into())
    }

    #[test]
    fn test_add_then_remove() {
        let ledger = Ledger::new();
        let request = Request::new(MessageType::Message, "{}");
        ledger.add(&request, Duration::from_secs(5)).unwrap();
        assert!(ledger.include(request.id()));

        assert!(ledger.remove(request.id()));
        assert!(!ledger.include(request.id()));
        assert!(!ledger.remove(request.id()));
    }

    #[test]
    fn test_duplicate_id_rejected_and_original_kept() {
        let ledger = Ledger::new();
        let id = RequestId::parse("aaaaaaaaaaaaaaaa").unwrap();
        let first = Request::with_id(id.clone(), MessageType::Message, "one");
        let second = Request::with_id(id.clone(), MessageType::Initialize, "two");

        let mailbox = ledger.add(&first, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            ledger.add(&second, Duration::from_secs(5)),
            Err(ProtocolError::DuplicateRequestId(_))
        ));

        assert!(ledger.fulfill(reply_to(&first, "ok")).is_ok());
        assert!(mailbox.is_resolved());
        assert_eq!(ledger.len(), 0);
    }

    #[tokio::test]
    async fn test_fulfill_delivers_reply() {
        let ledger = Ledger::new();
        let request = Request::new(MessageType::Message, "ping");
        let mailbox = ledger.add(&request, Duration::from_secs(5)).unwrap();

        assert!(ledger.fulfill(reply_to(&request, "pong")).is_ok());
        assert!(!ledger.include(request.id()));

        match mailbox.take(Duration::from_millis(50)).await {
            Taken::Value(Ok(response)) => assert_eq!(response.content(), "pong"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_fulfill_unknown_hands_response_back() {
        let ledger = Ledger::new();
        let stray = Request::new(MessageType::Message, "stray");
        let returned = ledger.fulfill(reply_to(&stray, "x")).unwrap_err();
        assert_eq!(returned.id(), stray.id());
    }

    #[tokio::test]
    async fn test_sweep_only_expired_entries() {
        let ledger = Ledger::new();
        let short = Request::new(MessageType::Message, "short");
        let long = Request::new(MessageType::Message, "long");
        let short_box = ledger.add(&short, Duration::from_millis(0)).unwrap();
        ledger.add(&long, Duration::from_secs(60)).unwrap();

        assert_eq!(ledger.sweep_expired(Instant::now()), 1);
        assert!(!ledger.include(short.id()));
        assert!(ledger.include(long.id()));

        assert!(matches!(
            short_box.take(Duration::from_millis(50)).await,
            Taken::Value(Err(ProtocolError::Timeout))
        ));
    }

    #[tokio::test]
    async fn test_drain_rejects_everything() {
        let ledger = Ledger::new();
        let boxes: Vec<_> = (0..4)
            .map(|_| {
                let request = Request::new(MessageType::Message, "");
                ledger.add(&request, Duration::from_secs(60)).unwrap()
            })
            .collect();

        assert_eq!(ledger.drain(|| ProtocolError::ConnectionClosed), 4);
        assert!(ledger.is_empty());
        for mailbox in boxes {
            assert!(matches!(
                mailbox.take(Duration::from_millis(50)).await,
                Taken::Value(Err(ProtocolError::ConnectionClosed))
            ));
        }
    }

    #[tokio::test]
    async fn test_fulfill_after_sweep_is_not_delivered() {
        let ledger = Ledger::new();
        let request = Request::new(MessageType::Message, "");
        let mailbox = ledger.add(&request, Duration::from_millis(0)).unwrap();
        ledger.sweep_expired(Instant::now());

        assert!(ledger.fulfill(reply_to(&request, "late")).is_err());
        assert!(matches!(
            mailbox.take(Duration::from_millis(50)).await,
            Taken::Value(Err(ProtocolError::Timeout))
        ));
    }
}
