// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outstanding-request table of a client port.

use crate::dispatch::Dispatcher;
use crate::error::{ErrorCode, ErrorMessage};
use crate::message::RemactMessage;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::error;

/// Request id used after the counter reaches `i32::MAX`.
///
/// Low ids stay free for requests sent right after connect.
pub const REQUEST_ID_WRAP: i32 = 10;

/// Where the response to a request goes.
pub enum ResponseSink {
    /// Awaited by a task; resumes in that task.
    Waiter(oneshot::Sender<RemactMessage>),
    /// Callback run through the port's dispatcher.
    Callback(Box<dyn FnOnce(RemactMessage) + Send + 'static>),
}

impl ResponseSink {
    pub fn callback(f: impl FnOnce(RemactMessage) + Send + 'static) -> Self {
        Self::Callback(Box::new(f))
    }

    /// Hand the response over.
    pub fn deliver(self, msg: RemactMessage, dispatcher: &Dispatcher) {
        match self {
            // The waiting task may have been dropped (timeout, cancel).
            Self::Waiter(tx) => {
                let _ = tx.send(msg);
            }
            Self::Callback(f) => dispatcher.dispatch(move || f(msg)),
        }
    }
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiter(_) => f.write_str("ResponseSink::Waiter"),
            Self::Callback(_) => f.write_str("ResponseSink::Callback"),
        }
    }
}

/// A request waiting for its response.
#[derive(Debug)]
pub struct PendingRequest {
    pub request_id: i32,
    pub client_id: i32,
    pub method: String,
    pub sink: ResponseSink,
}

impl PendingRequest {
    pub fn new(request: &RemactMessage, sink: ResponseSink) -> Self {
        Self {
            request_id: request.request_id,
            client_id: request.client_id,
            method: request.destination_method.clone(),
            sink,
        }
    }

    /// Error envelope answering this request.
    pub fn synthesize_error(&self, code: ErrorCode, text: &str) -> RemactMessage {
        let mut msg = RemactMessage::error(
            self.request_id,
            self.client_id,
            &ErrorMessage::new(code, text),
        );
        msg.destination_method = self.method.clone();
        msg
    }
}

/// Table of requests sent but not answered yet.
#[derive(Debug, Default)]
pub struct OutstandingRequests {
    entries: HashMap<i32, PendingRequest>,
    last_request_id: i32,
}

impl OutstandingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next request id.
    ///
    /// Monotonic; wraps to [`REQUEST_ID_WRAP`] and skips ids still
    /// outstanding.
    pub fn next_request_id(&mut self) -> i32 {
        loop {
            self.last_request_id = if self.last_request_id >= i32::MAX || self.last_request_id < 0
            {
                REQUEST_ID_WRAP
            } else {
                self.last_request_id + 1
            };
            if !self.entries.contains_key(&self.last_request_id) {
                return self.last_request_id;
            }
        }
    }

    /// Record a request. A stale entry under the same id is evicted and
    /// returned.
    pub fn insert(&mut self, pending: PendingRequest) -> Option<PendingRequest> {
        let evicted = self.entries.insert(pending.request_id, pending);
        if let Some(stale) = &evicted {
            error!(
                "request id {} ('{}') was still outstanding; evicting stale entry",
                stale.request_id, stale.method
            );
        }
        evicted
    }

    pub fn take(&mut self, request_id: i32) -> Option<PendingRequest> {
        self.entries.remove(&request_id)
    }

    /// Remove all entries, ordered by request id.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        let mut all: Vec<PendingRequest> = self.entries.drain().map(|(_, p)| p).collect();
        all.sort_by_key(|p| p.request_id);
        all
    }

    pub fn contains(&self, request_id: i32) -> bool {
        self.entries.contains_key(&request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn set_last_request_id(&mut self, id: i32) {
        self.last_request_id = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageType, Payload};

    fn pending(id: i32) -> PendingRequest {
        let mut req = RemactMessage::request("Read", Payload::empty());
        req.request_id = id;
        req.client_id = 3;
        let (tx, _rx) = oneshot::channel();
        PendingRequest::new(&req, ResponseSink::Waiter(tx))
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut table = OutstandingRequests::new();
        assert_eq!(table.next_request_id(), 1);
        assert_eq!(table.next_request_id(), 2);
        assert_eq!(table.next_request_id(), 3);
    }

    #[test]
    fn test_wrap_skips_outstanding_ids() {
        let mut table = OutstandingRequests::new();
        table.insert(pending(REQUEST_ID_WRAP));
        table.set_last_request_id(i32::MAX);

        assert_eq!(table.next_request_id(), REQUEST_ID_WRAP + 1);
    }

    #[test]
    fn test_insert_evicts_stale_entry() {
        let mut table = OutstandingRequests::new();
        assert!(table.insert(pending(7)).is_none());
        let evicted = table.insert(pending(7)).unwrap();
        assert_eq!(evicted.request_id, 7);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_drain_empties_table_in_order() {
        let mut table = OutstandingRequests::new();
        for id in [5, 2, 9] {
            table.insert(pending(id));
        }
        let drained: Vec<i32> = table.drain().iter().map(|p| p.request_id).collect();
        assert_eq!(drained, vec![2, 5, 9]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_synthesized_error_keeps_correlation() {
        let p = pending(4);
        let msg = p.synthesize_error(ErrorCode::CouldNotSend, "connection lost");
        assert_eq!(msg.message_type, MessageType::Error);
        assert_eq!(msg.request_id, 4);
        assert_eq!(msg.client_id, 3);
        assert_eq!(msg.destination_method, "Read");
        assert_eq!(msg.error_message().unwrap().code, ErrorCode::CouldNotSend);
    }

    #[test]
    fn test_waiter_receives_response() {
        let (tx, mut rx) = oneshot::channel();
        let msg = RemactMessage::notification("Done", Payload::empty());
        ResponseSink::Waiter(tx).deliver(msg.clone(), &Dispatcher::Inline);
        assert_eq!(rx.try_recv().unwrap(), msg);
    }
}
