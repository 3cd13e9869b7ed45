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

use std::{collections::BTreeMap, time::Duration};

use ruma::{OneTimeKeyAlgorithm, OwnedDeviceId, OwnedUserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{serialize_timeout, RequestKind};
use crate::error::ValidationError;

/// Data for a request to the `/keys/claim` API endpoint
/// ([specification]).
///
/// Claims one-time keys that can be used to establish 1-to-1 E2EE
/// sessions.
///
/// ```compile_fail
/// use matrix_sdk_crypto_requests::types::requests::KeysClaimRequest;
///
/// let request = KeysClaimRequest { timeout: None, one_time_keys: Default::default() };
/// ```
///
/// [specification]: https://spec.matrix.org/unstable/client-server-api/#post_matrixclientv3keysclaim
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeysClaimRequest {
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_timeout")]
    pub(crate) timeout: Option<Duration>,
    pub(crate) one_time_keys: BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, OneTimeKeyAlgorithm>>,
}

impl KeysClaimRequest {
    pub(crate) fn new(
        one_time_keys: BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, OneTimeKeyAlgorithm>>,
        timeout: Option<Duration>,
    ) -> Result<Self, ValidationError> {
        if one_time_keys.is_empty() {
            return Err(ValidationError::NoTargetUsers(RequestKind::KeysClaim));
        }

        if let Some((user_id, _)) = one_time_keys.iter().find(|(_, devices)| devices.is_empty()) {
            return Err(ValidationError::EmptyUserEntry {
                kind: RequestKind::KeysClaim,
                user_id: user_id.clone(),
            });
        }

        Ok(Self { timeout, one_time_keys })
    }

    /// The time the server should wait when claiming keys from remote
    /// servers.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The devices we want to claim a one-time key for, and the algorithm of
    /// the key that should be claimed.
    pub fn one_time_keys(
        &self,
    ) -> &BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, OneTimeKeyAlgorithm>> {
        &self.one_time_keys
    }
}

/// The response of a `/keys/claim` request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysClaimResponse {
    /// If any remote homeservers could not be reached, they are recorded here,
    /// keyed by server name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, Value>,

    /// The claimed one-time keys, keyed by user, device and key ID.
    #[serde(default)]
    pub one_time_keys: BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, BTreeMap<String, Value>>>,
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, time::Duration};

    use ruma::{owned_device_id, owned_user_id, OneTimeKeyAlgorithm};
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::{KeysClaimRequest, KeysClaimResponse};
    use crate::{error::ValidationError, types::requests::RequestKind};

    #[test]
    fn test_claim_validation() {
        assert_eq!(
            KeysClaimRequest::new(BTreeMap::new(), None),
            Err(ValidationError::NoTargetUsers(RequestKind::KeysClaim))
        );

        let empty_user = BTreeMap::from([(owned_user_id!("@bob:example.org"), BTreeMap::new())]);

        assert_eq!(
            KeysClaimRequest::new(empty_user, None),
            Err(ValidationError::EmptyUserEntry {
                kind: RequestKind::KeysClaim,
                user_id: owned_user_id!("@bob:example.org"),
            })
        );
    }

    #[test]
    fn test_claim_body() {
        let one_time_keys = BTreeMap::from([(
            owned_user_id!("@bob:example.org"),
            BTreeMap::from([(owned_device_id!("BOBDEVICE"), OneTimeKeyAlgorithm::SignedCurve25519)]),
        )]);

        let request =
            KeysClaimRequest::new(one_time_keys, Some(Duration::from_millis(1500))).unwrap();

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "timeout": 1500,
                "one_time_keys": {
                    "@bob:example.org": { "BOBDEVICE": "signed_curve25519" }
                }
            })
        );
    }

    #[test]
    fn test_claim_response_deserialization() {
        let response: KeysClaimResponse = serde_json::from_value(json!({
            "one_time_keys": {
                "@bob:example.org": {
                    "BOBDEVICE": {
                        "signed_curve25519:AAAAHg": { "key": "zKbLg+NrIjpnagy+pIY6uPL4ZwEG2v+8F9lmgsnlZzs" }
                    }
                }
            }
        }))
        .unwrap();

        assert!(response.failures.is_empty());
        assert_eq!(response.one_time_keys.len(), 1);
    }
}
