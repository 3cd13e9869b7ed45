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

use std::collections::VecDeque;

use ruma::{OwnedTransactionId, TransactionId};
use tracing::{debug, warn};

use crate::{
    error::{MarkRequestError, MarkRequestResult, UnknownRequestError},
    queue::{OutgoingRequestQueue, RequestState},
    types::requests::{OutgoingRequest, RequestOutcome},
};

/// How many resolved request IDs we remember, only used to produce better log
/// lines if a request is marked as sent twice.
const RESOLVED_HISTORY_SIZE: usize = 128;

/// An in-flight request which was coupled with its outcome.
#[derive(Debug)]
pub(crate) struct Completion<'a> {
    pub request: OutgoingRequest,
    pub outcome: RequestOutcome<'a>,
}

/// Couples the outcomes the host reports back with the in-flight requests
/// they belong to.
///
/// Every in-flight request can be resolved exactly once.
#[derive(Debug, Default)]
pub(crate) struct CompletionTracker {
    resolved: VecDeque<OwnedTransactionId>,
}

impl CompletionTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Remove the in-flight request with the given ID from the queue and pair
    /// it with its outcome.
    ///
    /// If the outcome contains a response for a different kind of request
    /// the request stays in-flight, so it can still be resolved with the
    /// correct response.
    pub(crate) fn resolve<'a>(
        &mut self,
        queue: &mut OutgoingRequestQueue,
        request_id: &TransactionId,
        outcome: RequestOutcome<'a>,
    ) -> MarkRequestResult<Completion<'a>> {
        let unknown = || UnknownRequestError { request_id: request_id.to_owned() };

        let kind = match queue.get(request_id) {
            Some((request, RequestState::InFlight)) => request.kind(),
            Some((_, RequestState::Pending)) => {
                warn!(?request_id, "Tried to mark a request as sent which was never handed out");
                return Err(unknown().into());
            }
            None => {
                if self.resolved.iter().any(|id| **id == *request_id) {
                    warn!(?request_id, "Tried to mark a request as sent a second time");
                } else {
                    warn!(?request_id, "Tried to mark an unknown request as sent");
                }

                return Err(unknown().into());
            }
        };

        if let RequestOutcome::Success(response) = &outcome {
            if response.kind() != kind {
                warn!(
                    ?request_id,
                    expected = %kind,
                    got = %response.kind(),
                    "Tried to mark a request as sent using a response of the wrong kind"
                );

                return Err(MarkRequestError::MismatchedResponse {
                    request_id: request_id.to_owned(),
                    expected: kind,
                    got: response.kind(),
                });
            }
        }

        let request = queue.remove_in_flight(request_id).ok_or_else(unknown)?;

        if self.resolved.len() >= RESOLVED_HISTORY_SIZE {
            self.resolved.pop_front();
        }
        self.resolved.push_back(request_id.to_owned());

        match &outcome {
            RequestOutcome::Success(_) => {
                debug!(?request_id, %kind, "Marked an outgoing request as sent")
            }
            RequestOutcome::Failure(failure) => debug!(
                ?request_id,
                %kind,
                class = ?failure.class,
                reason = %failure.reason,
                "An outgoing request failed"
            ),
        }

        Ok(Completion { request, outcome })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches2::assert_matches;
    use ruma::{OwnedTransactionId, TransactionId};

    use super::CompletionTracker;
    use crate::{
        error::{MarkRequestError, UnknownRequestError},
        queue::OutgoingRequestQueue,
        testing::one_request_of_each_kind,
        types::requests::{
            KeysUploadResponse, RequestFailure, RequestKind, RequestOutcome, ToDeviceResponse,
        },
    };

    fn queue_with_in_flight_upload() -> (OutgoingRequestQueue, OwnedTransactionId) {
        let mut queue = OutgoingRequestQueue::new(None);
        let request = one_request_of_each_kind().remove(0);
        let request_id = request.request_id().to_owned();

        queue.enqueue(request).unwrap();
        queue.drain_pending();

        (queue, request_id)
    }

    #[test]
    fn test_resolve_removes_the_request() {
        let (mut queue, request_id) = queue_with_in_flight_upload();
        let mut tracker = CompletionTracker::new();
        let response = KeysUploadResponse::default();

        let completion = tracker.resolve(&mut queue, &request_id, (&response).into()).unwrap();

        assert_eq!(completion.request.kind(), RequestKind::KeysUpload);
        assert_matches!(completion.outcome, RequestOutcome::Success(_));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_resolving_twice_fails() {
        let (mut queue, request_id) = queue_with_in_flight_upload();
        let mut tracker = CompletionTracker::new();
        let response = KeysUploadResponse::default();

        tracker.resolve(&mut queue, &request_id, (&response).into()).unwrap();

        assert_matches!(
            tracker.resolve(&mut queue, &request_id, (&response).into()),
            Err(MarkRequestError::UnknownRequest(UnknownRequestError { request_id: id }))
        );
        assert_eq!(id, request_id);
    }

    #[test]
    fn test_unknown_and_pending_requests_fail() {
        let mut queue = OutgoingRequestQueue::new(None);
        let mut tracker = CompletionTracker::new();
        let pending = one_request_of_each_kind().remove(0);
        queue.enqueue(pending.clone()).unwrap();

        let failure = RequestFailure::transient("timed out");

        assert_matches!(
            tracker.resolve(&mut queue, &TransactionId::new(), failure.clone().into()),
            Err(MarkRequestError::UnknownRequest(_))
        );
        assert_matches!(
            tracker.resolve(&mut queue, pending.request_id(), failure.into()),
            Err(MarkRequestError::UnknownRequest(_))
        );
        assert_eq!(queue.len(), 1, "The pending request is left alone");
    }

    #[test]
    fn test_mismatched_response_keeps_the_request_in_flight() {
        let (mut queue, request_id) = queue_with_in_flight_upload();
        let mut tracker = CompletionTracker::new();
        let response = ToDeviceResponse {};

        assert_matches!(
            tracker.resolve(&mut queue, &request_id, (&response).into()),
            Err(MarkRequestError::MismatchedResponse { expected, got, .. })
        );
        assert_eq!(expected, RequestKind::KeysUpload);
        assert_eq!(got, RequestKind::ToDevice);
        assert_eq!(queue.in_flight().count(), 1);

        let completion =
            tracker.resolve(&mut queue, &request_id, RequestFailure::permanent("bad").into());
        assert_matches!(completion, Ok(_));
    }
}
