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

use ruma::OneTimeKeyAlgorithm;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Data for a request to the `/keys/upload` API endpoint
/// ([specification]).
///
/// Publishes end-to-end encryption keys for the device.
///
/// The keys are opaque, already signed, JSON objects. The one-time and
/// fallback keys are keyed by their key ID, e.g. `signed_curve25519:AAAAHg`.
///
/// ```compile_fail
/// use matrix_sdk_crypto_requests::types::requests::KeysUploadRequest;
///
/// let request = KeysUploadRequest {
///     device_keys: None,
///     one_time_keys: Default::default(),
///     fallback_keys: Default::default(),
/// };
/// ```
///
/// [specification]: https://spec.matrix.org/unstable/client-server-api/#post_matrixclientv3keysupload
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeysUploadRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) device_keys: Option<Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) one_time_keys: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) fallback_keys: BTreeMap<String, Value>,
}

impl KeysUploadRequest {
    pub(crate) fn new(
        device_keys: Option<Value>,
        one_time_keys: BTreeMap<String, Value>,
        fallback_keys: BTreeMap<String, Value>,
    ) -> Result<Self, ValidationError> {
        if device_keys.is_none() && one_time_keys.is_empty() && fallback_keys.is_empty() {
            Err(ValidationError::NothingToUpload)
        } else {
            Ok(Self { device_keys, one_time_keys, fallback_keys })
        }
    }

    /// The identity keys of the device, if they need to be published.
    pub fn device_keys(&self) -> Option<&Value> {
        self.device_keys.as_ref()
    }

    /// The one-time keys that should be published, keyed by key ID.
    pub fn one_time_keys(&self) -> &BTreeMap<String, Value> {
        &self.one_time_keys
    }

    /// The fallback keys that should be published, keyed by key ID.
    pub fn fallback_keys(&self) -> &BTreeMap<String, Value> {
        &self.fallback_keys
    }
}

/// The response of a `/keys/upload` request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysUploadResponse {
    /// For each key algorithm, the number of unclaimed one-time keys of that
    /// type currently held on the server for this device.
    #[serde(default)]
    pub one_time_key_counts: BTreeMap<OneTimeKeyAlgorithm, u64>,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::KeysUploadRequest;
    use crate::error::ValidationError;

    #[test]
    fn test_empty_upload_is_rejected() {
        let result = KeysUploadRequest::new(None, BTreeMap::new(), BTreeMap::new());
        assert_eq!(result, Err(ValidationError::NothingToUpload));
    }

    #[test]
    fn test_body_omits_empty_fields() {
        let one_time_keys = BTreeMap::from([(
            "signed_curve25519:AAAAHg".to_owned(),
            json!({ "key": "zKbLg+NrIjpnagy+pIY6uPL4ZwEG2v+8F9lmgsnlZzs" }),
        )]);

        let request = KeysUploadRequest::new(None, one_time_keys, BTreeMap::new()).unwrap();

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "one_time_keys": {
                    "signed_curve25519:AAAAHg": {
                        "key": "zKbLg+NrIjpnagy+pIY6uPL4ZwEG2v+8F9lmgsnlZzs"
                    }
                }
            })
        );
    }
}
