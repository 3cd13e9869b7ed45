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

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::requests::DEFAULT_REMOTE_TIMEOUT;

/// The maximal number of users a single `/keys/query` request contains.
const MAX_KEY_QUERY_USERS: usize = 250;

/// The maximal number of room keys a single backup request contains.
const BACKUP_BATCH_SIZE: usize = 100;

/// Settings controlling how the [`CryptoMachine`](crate::CryptoMachine)
/// builds and queues outgoing requests.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutgoingRequestsSettings {
    /// The maximal number of requests that may be queued up, counting both
    /// requests waiting to be handed out and requests that were handed out
    /// but not yet marked as sent.
    ///
    /// `None`, the default, doesn't limit the queue. Requests that don't fit
    /// into the queue are built again on a later call to
    /// [`CryptoMachine::outgoing_requests`](crate::CryptoMachine::outgoing_requests).
    pub max_queued_requests: Option<usize>,

    /// How long the server should wait for remote servers when answering a
    /// `/keys/query` request.
    pub key_query_timeout: Duration,

    /// How long the server should wait for remote servers when answering a
    /// `/keys/claim` request.
    pub key_claim_timeout: Duration,

    /// The maximal number of users a single `/keys/query` request contains,
    /// bigger sets of users are split into multiple requests.
    pub key_query_batch_size: usize,

    /// The maximal number of room keys a single backup request contains.
    pub backup_batch_size: usize,
}

impl Default for OutgoingRequestsSettings {
    fn default() -> Self {
        Self {
            max_queued_requests: None,
            key_query_timeout: DEFAULT_REMOTE_TIMEOUT,
            key_claim_timeout: DEFAULT_REMOTE_TIMEOUT,
            key_query_batch_size: MAX_KEY_QUERY_USERS,
            backup_batch_size: BACKUP_BATCH_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::OutgoingRequestsSettings;

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: OutgoingRequestsSettings =
            serde_json::from_value(json!({ "max_queued_requests": 20 })).unwrap();

        assert_eq!(settings.max_queued_requests, Some(20));
        assert_eq!(settings.key_query_timeout, Duration::from_secs(10));
        assert_eq!(settings.key_query_batch_size, 250);
        assert_eq!(settings.backup_batch_size, 100);
    }
}
