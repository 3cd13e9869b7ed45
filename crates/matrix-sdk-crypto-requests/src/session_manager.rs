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

use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};

use ruma::{DeviceId, OneTimeKeyAlgorithm, OwnedDeviceId, OwnedUserId, UserId};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    settings::OutgoingRequestsSettings,
    types::requests::{KeysClaimRequest, KeysClaimResponse},
};

type DeviceMap<T> = BTreeMap<OwnedUserId, T>;

/// Keeps track of the devices we need to establish an Olm session with.
#[derive(Debug, Default)]
pub(crate) struct SessionManager {
    /// Devices we need to claim a one-time key for.
    users_for_key_claim: DeviceMap<BTreeSet<OwnedDeviceId>>,
    /// The one-time keys we claimed, keyed by user and device.
    sessions: DeviceMap<BTreeMap<OwnedDeviceId, Value>>,
    /// Devices for which the server didn't return a one-time key.
    failed_devices: DeviceMap<BTreeSet<OwnedDeviceId>>,
}

fn insert_device(map: &mut DeviceMap<BTreeSet<OwnedDeviceId>>, user_id: &UserId, device_id: &DeviceId) {
    map.entry(user_id.to_owned()).or_default().insert(device_id.to_owned());
}

fn remove_device(map: &mut DeviceMap<BTreeSet<OwnedDeviceId>>, user_id: &UserId, device_id: &DeviceId) {
    if let Entry::Occupied(mut e) = map.entry(user_id.to_owned()) {
        e.get_mut().remove(device_id);

        if e.get().is_empty() {
            e.remove();
        }
    }
}

impl SessionManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Remember that we're missing an Olm session with the given devices.
    ///
    /// Devices that previously failed to get a one-time key are retried.
    pub(crate) fn mark_sessions_missing<'a>(
        &mut self,
        user_id: &UserId,
        devices: impl IntoIterator<Item = &'a DeviceId>,
    ) {
        for device_id in devices {
            remove_device(&mut self.failed_devices, user_id, device_id);
            insert_device(&mut self.users_for_key_claim, user_id, device_id);
        }
    }

    pub(crate) fn has_session(&self, user_id: &UserId, device_id: &DeviceId) -> bool {
        self.sessions.get(user_id).is_some_and(|d| d.contains_key(device_id))
    }

    pub(crate) fn is_failed(&self, user_id: &UserId, device_id: &DeviceId) -> bool {
        self.failed_devices.get(user_id).is_some_and(|d| d.contains(device_id))
    }

    pub(crate) fn missing_sessions(&self) -> &DeviceMap<BTreeSet<OwnedDeviceId>> {
        &self.users_for_key_claim
    }

    /// Get a key claiming request for all the devices we're missing an Olm
    /// session with.
    ///
    /// Returns `None` if no key claiming request needs to be sent out.
    pub(crate) fn get_missing_sessions(
        &self,
        settings: &OutgoingRequestsSettings,
    ) -> Option<KeysClaimRequest> {
        let one_time_keys: BTreeMap<_, _> = self
            .users_for_key_claim
            .iter()
            .map(|(user_id, devices)| {
                let device_map = devices
                    .iter()
                    .map(|d| (d.to_owned(), OneTimeKeyAlgorithm::SignedCurve25519))
                    .collect();

                (user_id.to_owned(), device_map)
            })
            .collect();

        KeysClaimRequest::new(one_time_keys, Some(settings.key_claim_timeout)).ok()
    }

    /// Receive a successful key claim response.
    ///
    /// Devices which didn't get a one-time key are marked as failed and won't
    /// be claimed again until they are marked as missing again.
    pub(crate) fn receive_keys_claim_response(
        &mut self,
        request: &KeysClaimRequest,
        response: &KeysClaimResponse,
    ) {
        if !response.failures.is_empty() {
            debug!(failures = ?response.failures, "Key claim response contains failures");
        }

        for (user_id, devices) in request.one_time_keys() {
            for device_id in devices.keys() {
                remove_device(&mut self.users_for_key_claim, user_id, device_id);

                let key = response
                    .one_time_keys
                    .get(user_id)
                    .and_then(|d| d.get(device_id))
                    .and_then(|keys| keys.values().next());

                match key {
                    Some(key) => {
                        debug!(?user_id, ?device_id, "Established a new Olm session");

                        self.sessions
                            .entry(user_id.to_owned())
                            .or_default()
                            .insert(device_id.to_owned(), key.clone());
                    }
                    None => {
                        warn!(?user_id, ?device_id, "The server didn't return a one-time key");
                        insert_device(&mut self.failed_devices, user_id, device_id);
                    }
                }
            }
        }
    }

    /// A key claim request failed and will never succeed, mark all of its
    /// devices as failed.
    pub(crate) fn mark_request_as_failed(&mut self, request: &KeysClaimRequest) {
        for (user_id, devices) in request.one_time_keys() {
            for device_id in devices.keys() {
                remove_device(&mut self.users_for_key_claim, user_id, device_id);
                insert_device(&mut self.failed_devices, user_id, device_id);
            }
        }
    }
}
