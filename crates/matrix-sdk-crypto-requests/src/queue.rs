// Copyright 2024 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use indexmap::IndexMap;
use ruma::{OwnedTransactionId, TransactionId};
use tracing::{debug, trace};

use crate::{
    error::QueueFullError,
    types::requests::{OutgoingRequest, RequestKind},
};

/// The state of a queued request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    /// The request is waiting to be handed out.
    Pending,
    /// The request was handed out and we're waiting for it to be marked as
    /// sent.
    InFlight,
}

#[derive(Debug)]
struct QueuedRequest {
    request: OutgoingRequest,
    state: RequestState,
}

/// The requests the state machine decided to send out which haven't been
/// marked as sent yet.
///
/// Requests are kept in the order they were enqueued in, handing them out
/// doesn't remove them from the queue, only marking them as sent does.
#[derive(Debug, Default)]
pub(crate) struct OutgoingRequestQueue {
    requests: IndexMap<OwnedTransactionId, QueuedRequest>,
    capacity: Option<usize>,
}

impl OutgoingRequestQueue {
    pub(crate) fn new(capacity: Option<usize>) -> Self {
        Self { requests: IndexMap::new(), capacity }
    }

    pub(crate) fn len(&self) -> usize {
        self.requests.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.capacity.is_some_and(|capacity| self.requests.len() >= capacity)
    }

    fn check_capacity(&self) -> Result<(), QueueFullError> {
        match self.capacity {
            Some(capacity) if self.requests.len() >= capacity => Err(QueueFullError { capacity }),
            _ => Ok(()),
        }
    }

    /// Append a request to the queue, it will be handed out by the next call
    /// to [`OutgoingRequestQueue::drain_pending`].
    pub(crate) fn enqueue(&mut self, request: OutgoingRequest) -> Result<(), QueueFullError> {
        self.insert(request, RequestState::Pending)
    }

    /// Append a request which is handed out right away, without going through
    /// [`OutgoingRequestQueue::drain_pending`].
    pub(crate) fn enqueue_in_flight(
        &mut self,
        request: OutgoingRequest,
    ) -> Result<(), QueueFullError> {
        self.insert(request, RequestState::InFlight)
    }

    fn insert(&mut self, request: OutgoingRequest, state: RequestState) -> Result<(), QueueFullError> {
        self.check_capacity()?;

        trace!(
            request_id = ?request.request_id(),
            kind = %request.kind(),
            ?state,
            "Queueing up an outgoing request"
        );

        self.requests.insert(request.request_id.clone(), QueuedRequest { request, state });

        Ok(())
    }

    /// Hand out all the pending requests, in the order they were enqueued in.
    ///
    /// The requests are marked as in-flight, calling this method again before
    /// something new is enqueued returns an empty list.
    pub(crate) fn drain_pending(&mut self) -> Vec<OutgoingRequest> {
        let drained: Vec<_> = self
            .requests
            .values_mut()
            .filter(|r| r.state == RequestState::Pending)
            .map(|r| {
                r.state = RequestState::InFlight;
                r.request.clone()
            })
            .collect();

        if !drained.is_empty() {
            debug!(
                count = drained.len(),
                request_ids = ?drained.iter().map(|r| r.request_id()).collect::<Vec<_>>(),
                "Handing out outgoing requests"
            );
        }

        drained
    }

    /// Get a queued request and its state.
    pub(crate) fn get(&self, request_id: &TransactionId) -> Option<(&OutgoingRequest, RequestState)> {
        self.requests.get(request_id).map(|r| (&r.request, r.state))
    }

    /// Remove an in-flight request from the queue.
    ///
    /// Pending requests are left alone, they can't have been sent out yet.
    pub(crate) fn remove_in_flight(&mut self, request_id: &TransactionId) -> Option<OutgoingRequest> {
        match self.requests.get(request_id) {
            Some(r) if r.state == RequestState::InFlight => {
                self.requests.shift_remove(request_id).map(|r| r.request)
            }
            _ => None,
        }
    }

    /// Remove the pending requests for which the predicate returns `false`.
    ///
    /// In-flight requests are always kept, they need to be marked as sent.
    pub(crate) fn retain_pending(&mut self, mut keep: impl FnMut(&OutgoingRequest) -> bool) {
        self.requests.retain(|_, r| r.state == RequestState::InFlight || keep(&r.request));
    }

    /// Iterate over all the queued requests, in the order they were enqueued
    /// in.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (&OutgoingRequest, RequestState)> {
        self.requests.values().map(|r| (&r.request, r.state))
    }

    pub(crate) fn pending(&self) -> impl Iterator<Item = &OutgoingRequest> {
        self.iter().filter(|(_, s)| *s == RequestState::Pending).map(|(r, _)| r)
    }

    pub(crate) fn in_flight(&self) -> impl Iterator<Item = &OutgoingRequest> {
        self.iter().filter(|(_, s)| *s == RequestState::InFlight).map(|(r, _)| r)
    }

    /// Iterate over the queued requests of the given kind, no matter if they
    /// are pending or in-flight.
    pub(crate) fn of_kind(&self, kind: RequestKind) -> impl Iterator<Item = &OutgoingRequest> {
        self.requests.values().map(|r| &r.request).filter(move |r| r.kind() == kind)
    }

    pub(crate) fn contains_kind(&self, kind: RequestKind) -> bool {
        self.of_kind(kind).next().is_some()
    }
}
