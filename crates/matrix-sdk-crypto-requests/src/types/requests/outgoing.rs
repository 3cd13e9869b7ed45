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

use std::sync::Arc;

use ruma::{OwnedTransactionId, TransactionId};

use super::{AnyOutgoingRequest, RequestKind};

/// Outgoing request type, holds the unique ID of the request and the actual
/// request.
///
/// Outgoing requests are only ever created by the
/// [`CryptoMachine`](crate::CryptoMachine). The request ID is what couples the
/// response, passed to
/// [`CryptoMachine::mark_request_as_sent`](crate::CryptoMachine::mark_request_as_sent),
/// to the request, so it can't be chosen by anybody else:
///
/// ```compile_fail
/// use std::sync::Arc;
///
/// use matrix_sdk_crypto_requests::types::requests::{AnyOutgoingRequest, OutgoingRequest};
///
/// fn forge(request: AnyOutgoingRequest) -> OutgoingRequest {
///     OutgoingRequest { request_id: "forged".into(), request: Arc::new(request) }
/// }
/// ```
///
/// Neither can the request itself be built outside of the state machine:
///
/// ```compile_fail
/// use matrix_sdk_crypto_requests::types::requests::KeysBackupRequest;
///
/// let request = KeysBackupRequest { version: "1".to_owned(), rooms: Default::default() };
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutgoingRequest {
    /// The unique id of a request, needs to be passed when receiving a
    /// response.
    pub(crate) request_id: OwnedTransactionId,
    /// The underlying outgoing request.
    pub(crate) request: Arc<AnyOutgoingRequest>,
}

impl OutgoingRequest {
    /// Wrap a request, giving it a fresh request ID.
    pub(crate) fn new(request: impl Into<AnyOutgoingRequest>) -> Self {
        Self { request_id: TransactionId::new(), request: Arc::new(request.into()) }
    }

    /// Get the unique id of this request.
    pub fn request_id(&self) -> &TransactionId {
        &self.request_id
    }

    /// Get the underlying outgoing request.
    pub fn request(&self) -> &AnyOutgoingRequest {
        &self.request
    }

    /// Get the kind of the underlying outgoing request.
    pub fn kind(&self) -> RequestKind {
        self.request.kind()
    }
}
