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

use std::collections::BTreeMap;

use ruma::OwnedUserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RequestKind;
use crate::error::ValidationError;

/// Signed keys that should be uploaded, keyed by the owner of the key and the
/// key ID, either a device ID or the public part of a cross-signing key.
pub type SignedKeys = BTreeMap<OwnedUserId, BTreeMap<String, Value>>;

/// Data for a request to the `/keys/signatures/upload` API endpoint
/// ([specification]).
///
/// Publishes cross-signing signatures for the user.
///
/// ```compile_fail
/// use matrix_sdk_crypto_requests::types::requests::SignatureUploadRequest;
///
/// let request = SignatureUploadRequest { signed_keys: Default::default() };
/// ```
///
/// [specification]: https://spec.matrix.org/unstable/client-server-api/#post_matrixclientv3keyssignaturesupload
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SignatureUploadRequest {
    pub(crate) signed_keys: SignedKeys,
}

impl SignatureUploadRequest {
    pub(crate) fn new(signed_keys: SignedKeys) -> Result<Self, ValidationError> {
        if signed_keys.is_empty() {
            return Err(ValidationError::NoTargetUsers(RequestKind::SignatureUpload));
        }

        if let Some((user_id, _)) = signed_keys.iter().find(|(_, keys)| keys.is_empty()) {
            return Err(ValidationError::EmptyUserEntry {
                kind: RequestKind::SignatureUpload,
                user_id: user_id.clone(),
            });
        }

        Ok(Self { signed_keys })
    }

    /// The signed key objects that should be uploaded.
    pub fn signed_keys(&self) -> &SignedKeys {
        &self.signed_keys
    }
}

/// The response of a `/keys/signatures/upload` request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureUploadResponse {
    /// Signatures that the server rejected, keyed by user and key ID.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<OwnedUserId, BTreeMap<String, Value>>,
}
