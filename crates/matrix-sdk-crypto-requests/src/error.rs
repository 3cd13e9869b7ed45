// Copyright 2020 The Matrix.org Foundation C.I.C.
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

//! Error types of the outgoing request model.

use ruma::{OwnedRoomId, OwnedTransactionId, OwnedUserId};
use serde_json::Error as SerdeError;
use thiserror::Error;

use crate::types::requests::RequestKind;

/// Result type returned when marking a request as sent.
pub type MarkRequestResult<T> = Result<T, MarkRequestError>;

/// Error describing why a request payload couldn't be created.
///
/// Payloads are validated when the state machine builds them, a payload that
/// exists always satisfies the constraints of its endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A keys upload request would not upload anything.
    #[error("a keys upload request needs device keys, one-time keys or fallback keys")]
    NothingToUpload,

    /// A keys query request was created without any user to query.
    #[error("a keys query request needs at least one user")]
    NoUsersToQuery,

    /// A request that targets users was created without any user.
    #[error("the {0:?} request doesn't target any user")]
    NoTargetUsers(RequestKind),

    /// A request contains a user without any device or key.
    #[error("the {kind:?} request contains no entries for user {user_id}")]
    EmptyUserEntry {
        /// The kind of the request that failed validation.
        kind: RequestKind,
        /// The user with the empty entry.
        user_id: OwnedUserId,
    },

    /// The event type of a to-device or room message request is empty.
    #[error("the {0:?} request has an empty event type")]
    EmptyEventType(RequestKind),

    /// The transaction ID of a to-device or room message request is empty.
    #[error("the {0:?} request has an empty transaction ID")]
    EmptyTransactionId(RequestKind),

    /// The content of a room message isn't a JSON object.
    #[error("the content of a room message needs to be a JSON object")]
    ContentNotAnObject,

    /// A keys backup request was created without a backup version.
    #[error("a keys backup request needs a backup version")]
    EmptyBackupVersion,

    /// A keys backup request was created without any room key.
    #[error("a keys backup request needs at least one room key")]
    NoRoomKeys,

    /// A keys backup request contains a room without any room key.
    #[error("the keys backup request contains no room keys for room {0}")]
    EmptyRoomEntry(OwnedRoomId),
}

/// Error returned by the binding-visible constructors of the host request
/// types.
///
/// Requests are only ever created by the state machine. Letting a host
/// fabricate one would let it mark requests as sent which were never sent
/// out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot construct a `{type_name}` outside of the engine, requests are created by the state machine")]
pub struct ConstructionForbiddenError {
    /// The name of the type that was attempted to be constructed.
    pub type_name: &'static str,
}

/// The request ID passed to
/// [`CryptoMachine::mark_request_as_sent`](crate::CryptoMachine::mark_request_as_sent)
/// doesn't belong to an in-flight request.
///
/// The request was either never handed out by this state machine, it was
/// already marked as sent, or it was handed out by a different state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no in-flight request with the request ID {request_id} exists")]
pub struct UnknownRequestError {
    /// The unknown request ID.
    pub request_id: OwnedTransactionId,
}

/// The outgoing request queue reached its configured capacity.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("the outgoing request queue is full, it holds {capacity} requests")]
pub struct QueueFullError {
    /// The maximal number of requests the queue holds.
    pub capacity: usize,
}

/// Error representing a failure to mark a request as sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkRequestError {
    /// The request ID doesn't belong to an in-flight request.
    #[error(transparent)]
    UnknownRequest(#[from] UnknownRequestError),

    /// The response that was passed in belongs to a different kind of request
    /// than the in-flight request with the given request ID.
    #[error("the request {request_id} is a {expected:?} request but a {got:?} response was given")]
    MismatchedResponse {
        /// The ID of the in-flight request.
        request_id: OwnedTransactionId,
        /// The kind of the in-flight request.
        expected: RequestKind,
        /// The kind of the response.
        got: RequestKind,
    },
}

/// Error representing a failure to convert a request into its host
/// representation, or a host response into a typed response.
#[derive(Error, Debug)]
pub enum HostConversionError {
    /// The request or response couldn't be (de)serialized.
    #[error(transparent)]
    Json(#[from] SerdeError),

    /// The numeric request type isn't a known [`RequestKind`].
    #[error("unknown request type {0}")]
    UnknownRequestType(u8),
}

/// Error representing a failure to create a request on demand.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestCreationError {
    /// The request payload would be invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The request doesn't fit into the outgoing request queue.
    #[error(transparent)]
    QueueFull(#[from] QueueFullError),
}
