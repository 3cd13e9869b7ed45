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

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use ruma::{
    OwnedDeviceId, OwnedServerName, OwnedTransactionId, OwnedUserId, ServerName, TransactionId,
    UserId,
};
use serde_json::Value;
use tracing::{debug, trace};

use crate::{
    error::ValidationError,
    settings::OutgoingRequestsSettings,
    types::requests::{KeysQueryRequest, KeysQueryResponse},
    utilities::FailuresCache,
};

/// A monotonically increasing number, bumped every time a tracked user is
/// marked as outdated.
pub(crate) type SequenceNumber = u64;

#[derive(Debug)]
struct TrackedUser {
    /// Do we need to query the keys of this user.
    dirty: bool,
    /// The sequence number at which the user was last marked as outdated.
    invalidated_at: SequenceNumber,
}

/// Details of an in-flight key query request.
#[derive(Debug)]
struct KeysQueryRequestDetails {
    /// The sequence number at the time the request was built. Users that were
    /// invalidated after this number stay outdated when the response arrives.
    sequence_number: SequenceNumber,
    users: BTreeSet<OwnedUserId>,
}

/// Keeps track of the users whose device lists we're interested in and
/// decides when their keys need to be queried.
#[derive(Debug)]
pub(crate) struct IdentityManager {
    own_user_id: OwnedUserId,
    tracked_users: BTreeMap<OwnedUserId, TrackedUser>,
    sequence_number: SequenceNumber,
    sync_token: Option<String>,
    devices: BTreeMap<OwnedUserId, BTreeMap<OwnedDeviceId, Value>>,
    keys_query_request_details: BTreeMap<OwnedTransactionId, KeysQueryRequestDetails>,
    /// Homeservers that recently failed to answer a key query. Their users
    /// aren't queried again until the backoff elapses.
    failures: FailuresCache<OwnedServerName>,
}

impl IdentityManager {
    /// Create a new identity manager, our own user is tracked from the start.
    pub(crate) fn new(own_user_id: &UserId) -> Self {
        let mut manager = Self {
            own_user_id: own_user_id.to_owned(),
            tracked_users: BTreeMap::new(),
            sequence_number: 0,
            sync_token: None,
            devices: BTreeMap::new(),
            keys_query_request_details: BTreeMap::new(),
            failures: FailuresCache::new(),
        };

        manager.update_tracked_users([own_user_id]);

        manager
    }

    /// Start tracking the given users, users we didn't track so far will have
    /// their keys queried.
    pub(crate) fn update_tracked_users<'a>(&mut self, users: impl IntoIterator<Item = &'a UserId>) {
        for user_id in users {
            if !self.tracked_users.contains_key(user_id) {
                self.sequence_number += 1;

                trace!(?user_id, "Started to track the devices of a user");

                self.tracked_users.insert(
                    user_id.to_owned(),
                    TrackedUser { dirty: true, invalidated_at: self.sequence_number },
                );
            }
        }
    }

    /// Mark the given users as outdated, users we don't track are ignored.
    pub(crate) fn receive_device_changes<'a>(
        &mut self,
        users: impl IntoIterator<Item = &'a UserId>,
        token: Option<String>,
    ) {
        for user_id in users {
            if let Some(user) = self.tracked_users.get_mut(user_id) {
                self.sequence_number += 1;
                user.dirty = true;
                user.invalidated_at = self.sequence_number;
            }
        }

        if token.is_some() {
            self.sync_token = token;
        }
    }

    pub(crate) fn tracked_users(&self) -> BTreeSet<OwnedUserId> {
        self.tracked_users.keys().cloned().collect()
    }

    /// The users whose keys are outdated, including users for which a key
    /// query is already in flight.
    pub(crate) fn outdated_users(&self) -> BTreeSet<OwnedUserId> {
        self.tracked_users.iter().filter(|(_, u)| u.dirty).map(|(u, _)| u.clone()).collect()
    }

    pub(crate) fn user_devices(&self, user_id: &UserId) -> Option<&BTreeMap<OwnedDeviceId, Value>> {
        self.devices.get(user_id)
    }

    /// Build the key query requests for all the outdated users that aren't
    /// already part of a key query request.
    ///
    /// Users whose homeserver recently failed to answer a key query are
    /// skipped until the backoff for the server elapses.
    ///
    /// The returned sequence number needs to be passed to
    /// [`IdentityManager::mark_request_in_flight()`] for every request that
    /// ends up being sent out.
    pub(crate) fn users_for_key_query(
        &self,
        settings: &OutgoingRequestsSettings,
    ) -> (Vec<KeysQueryRequest>, SequenceNumber) {
        let being_queried: BTreeSet<_> =
            self.keys_query_request_details.values().flat_map(|d| d.users.iter()).collect();

        let users = self
            .tracked_users
            .iter()
            .filter(|(user_id, user)| {
                user.dirty
                    && !being_queried.contains(user_id)
                    && !self.failures.contains(user_id.server_name())
            })
            .map(|(user_id, _)| user_id.clone());

        // We don't want to create a single `/keys/query` request with an unbounded
        // amount of users, servers might bail out and the responses get large.
        let requests = users
            .chunks(settings.key_query_batch_size.max(1))
            .into_iter()
            .filter_map(|chunk| {
                KeysQueryRequest::new(
                    chunk,
                    Some(settings.key_query_timeout),
                    self.sync_token.clone(),
                )
                .ok()
            })
            .collect();

        (requests, self.sequence_number)
    }

    /// Remember that a key query request, built by
    /// [`IdentityManager::users_for_key_query()`], was queued up.
    pub(crate) fn mark_request_in_flight(
        &mut self,
        request_id: &TransactionId,
        request: &KeysQueryRequest,
        sequence_number: SequenceNumber,
    ) {
        debug!(?request_id, users = ?request.users(), "Created a /keys/query request");

        self.keys_query_request_details.insert(
            request_id.to_owned(),
            KeysQueryRequestDetails { sequence_number, users: request.users().clone() },
        );
    }

    /// Build a key query request for the given users, outside of the usual
    /// tracking.
    ///
    /// The response is processed as usual, but the users won't be marked as
    /// up to date.
    pub(crate) fn build_key_query_for_users(
        &self,
        users: impl IntoIterator<Item = OwnedUserId>,
        settings: &OutgoingRequestsSettings,
    ) -> Result<KeysQueryRequest, ValidationError> {
        KeysQueryRequest::new(users, Some(settings.key_query_timeout), None)
    }

    /// Receive a successful keys query response.
    pub(crate) fn receive_keys_query_response(
        &mut self,
        request_id: &TransactionId,
        response: &KeysQueryResponse,
    ) {
        debug!(
            ?request_id,
            users = ?response.device_keys.keys().collect::<BTreeSet<_>>(),
            failures = ?response.failures,
            "Handling a keys query response"
        );

        // We never get failures from our own server, don't let a misbehaving
        // server stop us from querying our own keys.
        let failed_servers = response
            .failures
            .keys()
            .filter_map(|k| ServerName::parse(k).ok())
            .filter(|s| s != self.own_user_id.server_name());
        let successful_servers = response.device_keys.keys().map(|u| u.server_name());

        // Successful servers need to be removed explicitly, elapsed entries
        // stay in the cache so a repeated failure gets a longer backoff.
        self.failures.extend(failed_servers);
        self.failures.remove(successful_servers);

        for (user_id, devices) in &response.device_keys {
            self.devices.insert(user_id.clone(), devices.clone());
        }

        // Out-of-band requests don't have any details, their users aren't
        // marked as up to date.
        let Some(details) = self.keys_query_request_details.remove(request_id) else {
            return;
        };

        for user_id in &details.users {
            let failed = user_id.server_name() != self.own_user_id.server_name()
                && response.failures.contains_key(user_id.server_name().as_str());

            if failed || !response.device_keys.contains_key(user_id) {
                trace!(?user_id, "The keys of the user couldn't be fetched, keeping it outdated");
                continue;
            }

            if let Some(user) = self.tracked_users.get_mut(user_id) {
                if user.invalidated_at <= details.sequence_number {
                    user.dirty = false;
                } else {
                    debug!(
                        ?user_id,
                        "The user was marked as outdated while the keys query was in flight"
                    );
                }
            }
        }
    }

    /// Forget about a key query request that failed, its users will be
    /// queried again.
    pub(crate) fn forget_request(&mut self, request_id: &TransactionId) {
        self.keys_query_request_details.remove(request_id);
    }
}
