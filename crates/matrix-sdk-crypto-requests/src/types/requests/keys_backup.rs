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

use ruma::OwnedRoomId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// The backed up room keys of a single room, keyed by session ID.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RoomKeyBackup {
    /// The encrypted room keys, keyed by session ID.
    pub sessions: BTreeMap<String, Value>,
}

/// A request that will back up a batch of room keys to the server
/// ([specification]).
///
/// [specification]: https://spec.matrix.org/unstable/client-server-api/#put_matrixclientv3room_keyskeys
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KeysBackupRequest {
    #[serde(skip)]
    pub(crate) version: String,
    pub(crate) rooms: BTreeMap<OwnedRoomId, RoomKeyBackup>,
}

impl KeysBackupRequest {
    pub(crate) fn new(
        version: impl Into<String>,
        rooms: BTreeMap<OwnedRoomId, RoomKeyBackup>,
    ) -> Result<Self, ValidationError> {
        let version = version.into();

        if version.is_empty() {
            return Err(ValidationError::EmptyBackupVersion);
        }

        if rooms.is_empty() {
            return Err(ValidationError::NoRoomKeys);
        }

        if let Some((room_id, _)) = rooms.iter().find(|(_, r)| r.sessions.is_empty()) {
            return Err(ValidationError::EmptyRoomEntry(room_id.clone()));
        }

        Ok(Self { version, rooms })
    }

    /// The backup version these room keys belong to.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The encrypted room keys, keyed by room ID.
    pub fn rooms(&self) -> &BTreeMap<OwnedRoomId, RoomKeyBackup> {
        &self.rooms
    }

    /// The number of room keys this request backs up.
    pub fn key_count(&self) -> usize {
        self.rooms.values().map(|r| r.sessions.len()).sum()
    }
}

/// The response of a `/room_keys/keys` request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysBackupResponse {
    /// The new etag value representing the stored keys in the backup.
    pub etag: String,

    /// The number of keys stored in the backup.
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ruma::owned_room_id;
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::{KeysBackupRequest, RoomKeyBackup};
    use crate::error::ValidationError;

    #[test]
    fn test_backup_validation() {
        let rooms = BTreeMap::from([(owned_room_id!("!test:localhost"), RoomKeyBackup::default())]);

        assert_eq!(
            KeysBackupRequest::new("", BTreeMap::new()),
            Err(ValidationError::EmptyBackupVersion)
        );
        assert_eq!(KeysBackupRequest::new("1", BTreeMap::new()), Err(ValidationError::NoRoomKeys));
        assert_eq!(
            KeysBackupRequest::new("1", rooms),
            Err(ValidationError::EmptyRoomEntry(owned_room_id!("!test:localhost")))
        );
    }

    #[test]
    fn test_backup_body() {
        let rooms = BTreeMap::from([(
            owned_room_id!("!test:localhost"),
            RoomKeyBackup {
                sessions: BTreeMap::from([("SESSIONID".to_owned(), json!({ "first_message_index": 0 }))]),
            },
        )]);

        let request = KeysBackupRequest::new("1", rooms).unwrap();

        assert_eq!(request.version(), "1");
        assert_eq!(request.key_count(), 1);
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "rooms": {
                    "!test:localhost": {
                        "sessions": { "SESSIONID": { "first_message_index": 0 } }
                    }
                }
            })
        );
    }
}
