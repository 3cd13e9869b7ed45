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

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use ruma::{OwnedDeviceId, OwnedUserId};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};
use serde_json::Value;

use super::serialize_timeout;
use crate::error::ValidationError;

/// Data for a request to the `/keys/query` API endpoint
/// ([specification]).
///
/// Returns the current devices and identity keys for the given users.
///
/// All devices of every user are requested, the body therefore contains an
/// empty device list for each user.
///
/// ```compile_fail
/// use matrix_sdk_crypto_requests::types::requests::KeysQueryRequest;
/// use ruma::owned_user_id;
///
/// let request = KeysQueryRequest::new([owned_user_id!("@alice:example.org")], None, None);
/// ```
///
/// [specification]: https://spec.matrix.org/unstable/client-server-api/#post_matrixclientv3keysquery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeysQueryRequest {
    pub(crate) timeout: Option<Duration>,
    pub(crate) users: BTreeSet<OwnedUserId>,
    pub(crate) token: Option<String>,
}

impl KeysQueryRequest {
    pub(crate) fn new(
        users: impl IntoIterator<Item = OwnedUserId>,
        timeout: Option<Duration>,
        token: Option<String>,
    ) -> Result<Self, ValidationError> {
        let users: BTreeSet<_> = users.into_iter().collect();

        if users.is_empty() {
            Err(ValidationError::NoUsersToQuery)
        } else {
            Ok(Self { timeout, users, token })
        }
    }

    /// The time the server should wait when downloading keys from remote
    /// servers.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The users whose devices and identities are requested.
    pub fn users(&self) -> &BTreeSet<OwnedUserId> {
        &self.users
    }

    /// The sync token which told us about the device list changes, if the
    /// query is a result of such a change.
    ///
    /// This lets the server make sure its response contains the changes that
    /// were advertised in that sync.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }
}

impl Serialize for KeysQueryRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct AllDevices<'a>(&'a BTreeSet<OwnedUserId>);

        impl Serialize for AllDevices<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let no_devices: [OwnedDeviceId; 0] = [];
                let mut map = serializer.serialize_map(Some(self.0.len()))?;

                for user_id in self.0 {
                    map.serialize_entry(user_id, &no_devices)?;
                }

                map.end()
            }
        }

        struct Timeout(Option<Duration>);

        impl Serialize for Timeout {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serialize_timeout(&self.0, serializer)
            }
        }

        let len = 1 + usize::from(self.timeout.is_some()) + usize::from(self.token.is_some());
        let mut map = serializer.serialize_map(Some(len))?;

        if self.timeout.is_some() {
            map.serialize_entry("timeout", &Timeout(self.timeout))?;
        }

        map.serialize_entry("device_keys", &AllDevices(&self.users))?;

        if let Some(token) = &self.token {
            map.serialize_entry("token", token)?;
        }

        map.end()
    }
}

/// The response of a `/keys/query` request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysQueryResponse {
    /// If any remote homeservers could not be reached, they are recorded here,
    /// keyed by server name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failures: BTreeMap<String, Value>,

    /// Information on the queried devices.
    #[serde(default)]
    pub device_keys: BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, Value>>,

    /// The master cross-signing keys of the queried users.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub master_keys: BTreeMap<OwnedUserId, Value>,

    /// The self-signing keys of the queried users.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub self_signing_keys: BTreeMap<OwnedUserId, Value>,

    /// The user-signing key of our own user, if it was queried.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user_signing_keys: BTreeMap<OwnedUserId, Value>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ruma::{owned_user_id, user_id};
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::KeysQueryRequest;
    use crate::error::ValidationError;

    #[test]
    fn test_query_without_users_is_rejected() {
        assert_eq!(
            KeysQueryRequest::new([], None, None),
            Err(ValidationError::NoUsersToQuery)
        );
    }

    #[test]
    fn test_body_requests_all_devices() {
        let request = KeysQueryRequest::new(
            [owned_user_id!("@bob:example.org"), owned_user_id!("@alice:example.org")],
            Some(Duration::from_secs(10)),
            Some("s72595_4483_1934".to_owned()),
        )
        .unwrap();

        assert!(request.users().contains(user_id!("@alice:example.org")));
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "timeout": 10000,
                "device_keys": {
                    "@alice:example.org": [],
                    "@bob:example.org": [],
                },
                "token": "s72595_4483_1934",
            })
        );
    }

    #[test]
    fn test_body_without_timeout() {
        let request =
            KeysQueryRequest::new([owned_user_id!("@alice:example.org")], None, None).unwrap();

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "device_keys": { "@alice:example.org": [] } })
        );
    }
}
