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

use std::{collections::BTreeMap, ops::Not};

use ruma::OneTimeKeyAlgorithm;
use serde_json::Value;
use tracing::debug;

use crate::types::requests::{KeysUploadRequest, KeysUploadResponse};

/// The upload state of our own device keys, one-time keys and fallback keys.
#[derive(Debug)]
pub(crate) struct Account {
    device_keys: Value,
    /// Were the device keys uploaded to the server.
    shared: bool,
    /// One-time keys that weren't published yet.
    one_time_keys: BTreeMap<String, Value>,
    /// Fallback keys that weren't published yet.
    fallback_keys: BTreeMap<String, Value>,
    one_time_key_counts: BTreeMap<OneTimeKeyAlgorithm, u64>,
}

impl Account {
    pub(crate) fn new(device_keys: Value) -> Self {
        Self {
            device_keys,
            shared: false,
            one_time_keys: BTreeMap::new(),
            fallback_keys: BTreeMap::new(),
            one_time_key_counts: BTreeMap::new(),
        }
    }

    /// Have the device keys been uploaded to the server.
    pub(crate) fn shared(&self) -> bool {
        self.shared
    }

    pub(crate) fn mark_as_shared(&mut self) {
        self.shared = true;
    }

    pub(crate) fn add_one_time_keys(&mut self, keys: BTreeMap<String, Value>) {
        self.one_time_keys.extend(keys);
    }

    pub(crate) fn add_fallback_keys(&mut self, keys: BTreeMap<String, Value>) {
        self.fallback_keys.extend(keys);
    }

    /// Do we have any keys the server doesn't know about.
    pub(crate) fn needs_upload(&self) -> bool {
        !self.shared || !self.one_time_keys.is_empty() || !self.fallback_keys.is_empty()
    }

    /// The one-time key counts the server reported in its latest `/keys/upload`
    /// response.
    pub(crate) fn one_time_key_counts(&self) -> &BTreeMap<OneTimeKeyAlgorithm, u64> {
        &self.one_time_key_counts
    }

    /// Get a request uploading all the keys the server doesn't know about.
    ///
    /// Returns `None` if there's nothing to upload.
    pub(crate) fn keys_for_upload(&self) -> Option<KeysUploadRequest> {
        let device_keys = self.shared().not().then(|| self.device_keys.clone());

        KeysUploadRequest::new(device_keys, self.one_time_keys.clone(), self.fallback_keys.clone())
            .ok()
    }

    /// Handles a response to a `/keys/upload` request.
    ///
    /// Only the keys the request contained are marked as published, keys that
    /// were added while the request was in flight will be uploaded by the next
    /// request.
    pub(crate) fn receive_keys_upload_response(
        &mut self,
        request: &KeysUploadRequest,
        response: &KeysUploadResponse,
    ) {
        if request.device_keys().is_some() {
            if !self.shared() {
                debug!("Marking account as shared");
            }
            self.mark_as_shared();
        }

        debug!(
            one_time_keys = request.one_time_keys().len(),
            fallback_keys = request.fallback_keys().len(),
            "Marking keys as published"
        );

        remove_published(&mut self.one_time_keys, request.one_time_keys());
        remove_published(&mut self.fallback_keys, request.fallback_keys());

        if self.one_time_key_counts != response.one_time_key_counts {
            debug!(
                old = ?self.one_time_key_counts,
                new = ?response.one_time_key_counts,
                "Updated uploaded one-time key counts"
            );
        }

        self.one_time_key_counts = response.one_time_key_counts.clone();
    }
}

fn remove_published(unpublished: &mut BTreeMap<String, Value>, published: &BTreeMap<String, Value>) {
    // A key that was replaced while the request was in flight still needs to be
    // uploaded.
    unpublished.retain(|key_id, key| published.get(key_id) != Some(&*key));
}
