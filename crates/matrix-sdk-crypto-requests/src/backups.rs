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

//! Server-side backup of room keys.
//!
//! Room keys are handed to the [`BackupMachine`] already encrypted for the
//! backup, it only decides which keys still need to be uploaded and batches
//! them into requests.

use std::collections::BTreeMap;

use ruma::{OwnedRoomId, RoomId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::types::requests::{KeysBackupRequest, RoomKeyBackup};

/// Struct holding the number of room keys we have.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomKeyCounts {
    /// The total number of room keys we have.
    pub total: usize,
    /// The number of backed up room keys we have.
    pub backed_up: usize,
}

#[derive(Debug)]
struct BackupEntry {
    data: Value,
    backed_up: bool,
}

#[derive(Debug, Default)]
pub(crate) struct BackupMachine {
    version: Option<String>,
    room_keys: BTreeMap<OwnedRoomId, BTreeMap<String, BackupEntry>>,
}

impl BackupMachine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enabled(&self) -> bool {
        self.version.is_some()
    }

    pub(crate) fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Start backing up room keys to the backup with the given version.
    ///
    /// Switching to a different backup version means that all the room keys
    /// need to be uploaded again.
    pub(crate) fn enable_backup(&mut self, version: String) {
        if self.version.as_ref() != Some(&version) {
            debug!(%version, "Enabling backups");

            self.reset_backup_state();
            self.version = Some(version);
        }
    }

    pub(crate) fn disable_backup(&mut self) {
        debug!("Disabling key backup and resetting backup state for room keys");

        self.version = None;
        self.reset_backup_state();
    }

    fn reset_backup_state(&mut self) {
        for entry in self.room_keys.values_mut().flat_map(|r| r.values_mut()) {
            entry.backed_up = false;
        }
    }

    /// Add a room key that needs to be backed up, replacing any previous data
    /// stored for the same session.
    pub(crate) fn add_room_key(&mut self, room_id: OwnedRoomId, session_id: String, data: Value) {
        self.room_keys
            .entry(room_id)
            .or_default()
            .insert(session_id, BackupEntry { data, backed_up: false });
    }

    pub(crate) fn room_key_counts(&self) -> RoomKeyCounts {
        let entries = || self.room_keys.values().flat_map(|r| r.values());

        RoomKeyCounts {
            total: entries().count(),
            backed_up: entries().filter(|e| e.backed_up).count(),
        }
    }

    pub(crate) fn is_backed_up(&self, room_id: &RoomId, session_id: &str) -> bool {
        self.room_keys
            .get(room_id)
            .and_then(|r| r.get(session_id))
            .is_some_and(|e| e.backed_up)
    }

    /// Get a request backing up a batch of room keys which aren't backed up
    /// yet.
    ///
    /// Returns `None` if backups aren't enabled or all the room keys are
    /// already backed up. A batch contains at least one room key.
    pub(crate) fn backup_request(&self, batch_size: usize) -> Option<KeysBackupRequest> {
        let version = self.version.as_ref()?;

        let mut rooms: BTreeMap<OwnedRoomId, RoomKeyBackup> = BTreeMap::new();
        let pending = self
            .room_keys
            .iter()
            .flat_map(|(room_id, sessions)| sessions.iter().map(move |(s, e)| (room_id, s, e)))
            .filter(|(_, _, e)| !e.backed_up)
            .take(batch_size.max(1));

        for (room_id, session_id, entry) in pending {
            rooms
                .entry(room_id.to_owned())
                .or_default()
                .sessions
                .insert(session_id.to_owned(), entry.data.clone());
        }

        let request = KeysBackupRequest::new(version.to_owned(), rooms).ok()?;

        trace!(%version, key_count = request.key_count(), "Created a room key backup request");

        Some(request)
    }

    /// Mark the room keys the request uploaded as backed up.
    ///
    /// Keys whose data changed while the request was in flight still need to
    /// be backed up.
    pub(crate) fn mark_request_as_sent(&mut self, request: &KeysBackupRequest) {
        if self.version() != Some(request.version()) {
            warn!(
                request_version = request.version(),
                current_version = ?self.version(),
                "A backup request for a different backup version was marked as sent, ignoring"
            );

            return;
        }

        for (room_id, backup) in request.rooms() {
            let Some(sessions) = self.room_keys.get_mut(room_id) else { continue };

            for (session_id, data) in &backup.sessions {
                if let Some(entry) = sessions.get_mut(session_id) {
                    if entry.data == *data {
                        entry.backed_up = true;
                    }
                }
            }
        }

        trace!(room_key_counts = ?self.room_key_counts(), "Marked room keys as backed up");
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{BackupMachine, RoomKeyCounts};
    use crate::testing::room_id;

    fn machine_with_keys(count: usize) -> BackupMachine {
        let mut machine = BackupMachine::new();

        for i in 0..count {
            machine.add_room_key(
                room_id().to_owned(),
                format!("SESSION{i:03}"),
                json!({ "first_message_index": 0, "session_data": { "ciphertext": i } }),
            );
        }

        machine
    }

    #[test]
    fn test_no_request_while_disabled() {
        let machine = machine_with_keys(2);

        assert!(!machine.enabled());
        assert!(machine.backup_request(100).is_none());
        assert_eq!(machine.room_key_counts(), RoomKeyCounts { total: 2, backed_up: 0 });
    }

    #[test]
    fn test_keys_are_backed_up_in_batches() {
        let mut machine = machine_with_keys(250);
        machine.enable_backup("1".to_owned());

        let request = machine.backup_request(100).unwrap();
        assert_eq!(request.key_count(), 100);
        assert_eq!(request.version(), "1");

        machine.mark_request_as_sent(&request);
        assert_eq!(machine.room_key_counts(), RoomKeyCounts { total: 250, backed_up: 100 });

        let request = machine.backup_request(100).unwrap();
        machine.mark_request_as_sent(&request);
        let request = machine.backup_request(100).unwrap();
        assert_eq!(request.key_count(), 50);
        machine.mark_request_as_sent(&request);

        assert!(machine.backup_request(100).is_none());
        assert_eq!(machine.room_key_counts(), RoomKeyCounts { total: 250, backed_up: 250 });
    }

    #[test]
    fn test_empty_batch_size_still_backs_up_keys() {
        let mut machine = machine_with_keys(2);
        machine.enable_backup("1".to_owned());

        let request = machine.backup_request(0).unwrap();
        assert_eq!(request.key_count(), 1);

        machine.mark_request_as_sent(&request);
        assert_eq!(machine.room_key_counts(), RoomKeyCounts { total: 2, backed_up: 1 });
    }

    #[test]
    fn test_disabling_resets_the_backup_state() {
        let mut machine = machine_with_keys(1);
        machine.enable_backup("1".to_owned());

        let request = machine.backup_request(100).unwrap();
        machine.mark_request_as_sent(&request);
        assert!(machine.is_backed_up(room_id(), "SESSION000"));

        machine.disable_backup();
        assert!(!machine.is_backed_up(room_id(), "SESSION000"));
        assert!(machine.backup_request(100).is_none());
    }

    #[test]
    fn test_response_for_an_old_version_is_ignored() {
        let mut machine = machine_with_keys(1);
        machine.enable_backup("1".to_owned());
        let request = machine.backup_request(100).unwrap();

        machine.enable_backup("2".to_owned());
        machine.mark_request_as_sent(&request);

        assert_eq!(machine.room_key_counts().backed_up, 0);
        assert_eq!(machine.backup_request(100).unwrap().version(), "2");
    }

    #[test]
    fn test_changed_keys_need_another_backup() {
        let mut machine = machine_with_keys(1);
        machine.enable_backup("1".to_owned());
        let request = machine.backup_request(100).unwrap();

        machine.add_room_key(
            room_id().to_owned(),
            "SESSION000".to_owned(),
            json!({ "first_message_index": 5 }),
        );
        machine.mark_request_as_sent(&request);

        assert!(!machine.is_backed_up(room_id(), "SESSION000"));
        assert!(machine.backup_request(100).is_some());
    }
}
