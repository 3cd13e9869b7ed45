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
    fmt,
    sync::Arc,
};

use ruma::{
    DeviceId, OneTimeKeyAlgorithm, OwnedDeviceId, OwnedTransactionId, OwnedUserId, RoomId,
    TransactionId, UserId,
};
use serde_json::Value;
use tracing::{debug, instrument, trace, warn};

use crate::{
    account::Account,
    backups::{BackupMachine, RoomKeyCounts},
    error::{MarkRequestResult, QueueFullError, RequestCreationError, ValidationError},
    identities::IdentityManager,
    locks::Mutex,
    outbound::OutboundMessages,
    queue::{OutgoingRequestQueue, RequestState},
    session_manager::SessionManager,
    settings::OutgoingRequestsSettings,
    tracker::{Completion, CompletionTracker},
    types::requests::{
        AnyIncomingResponse, AnyOutgoingRequest, OutgoingRequest, RequestFailure, RequestKind,
        RequestOutcome, SignedKeys, ToDeviceMessages,
    },
};

/// State machine deciding which requests need to be sent out to the server
/// to keep our end-to-end encryption state up to date.
///
/// The machine never sends anything out itself. The requests it decides on
/// are fetched using [`CryptoMachine::outgoing_requests()`], sent out by the
/// caller and the outcome is passed back using
/// [`CryptoMachine::mark_request_as_sent()`].
///
/// Cloning the machine is cheap, all the clones share the same state.
#[derive(Clone)]
pub struct CryptoMachine {
    inner: Arc<CryptoMachineInner>,
}

struct CryptoMachineInner {
    /// The unique user id that owns this machine.
    user_id: OwnedUserId,
    /// The unique device ID of the device that holds this machine.
    device_id: OwnedDeviceId,
    settings: OutgoingRequestsSettings,
    /// Decisions, hand-outs and completions all happen under this lock.
    state: Mutex<MachineState>,
}

#[derive(Debug)]
struct MachineState {
    account: Account,
    identities: IdentityManager,
    sessions: SessionManager,
    outbound: OutboundMessages,
    backups: BackupMachine,
    queue: OutgoingRequestQueue,
    tracker: CompletionTracker,
}

impl fmt::Debug for CryptoMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoMachine")
            .field("user_id", &self.user_id())
            .field("device_id", &self.device_id())
            .finish()
    }
}

impl CryptoMachine {
    /// Create a new state machine with the default settings.
    ///
    /// # Arguments
    ///
    /// * `user_id` - The unique id of the user that owns this machine.
    ///
    /// * `device_id` - The unique id of the device that owns this machine.
    ///
    /// * `device_keys` - The signed device keys of this device, they will be
    ///   uploaded by the first `/keys/upload` request.
    pub fn new(user_id: &UserId, device_id: &DeviceId, device_keys: Value) -> Self {
        Self::with_settings(user_id, device_id, device_keys, OutgoingRequestsSettings::default())
    }

    /// Create a new state machine using the given settings.
    pub fn with_settings(
        user_id: &UserId,
        device_id: &DeviceId,
        device_keys: Value,
        settings: OutgoingRequestsSettings,
    ) -> Self {
        let state = MachineState {
            account: Account::new(device_keys),
            identities: IdentityManager::new(user_id),
            sessions: SessionManager::new(),
            outbound: OutboundMessages::new(),
            backups: BackupMachine::new(),
            queue: OutgoingRequestQueue::new(settings.max_queued_requests),
            tracker: CompletionTracker::new(),
        };

        Self {
            inner: Arc::new(CryptoMachineInner {
                user_id: user_id.to_owned(),
                device_id: device_id.to_owned(),
                settings,
                state: Mutex::new(state),
            }),
        }
    }

    /// The unique user id that owns this machine.
    pub fn user_id(&self) -> &UserId {
        &self.inner.user_id
    }

    /// The unique device ID that identifies this machine.
    pub fn device_id(&self) -> &DeviceId {
        &self.inner.device_id
    }

    /// The settings this machine was created with.
    pub fn settings(&self) -> &OutgoingRequestsSettings {
        &self.inner.settings
    }

    /// Get the outgoing requests that need to be sent out.
    ///
    /// This returns a list of [`OutgoingRequest`]. Those requests need to be
    /// sent out to the server and the responses need to be passed back to
    /// the state machine using [`mark_request_as_sent`].
    ///
    /// Every request is returned only once, calling this method again before
    /// anything changed returns an empty list. The requests are returned in
    /// the order they were decided on.
    ///
    /// [`mark_request_as_sent`]: #method.mark_request_as_sent
    #[instrument(skip_all)]
    pub fn outgoing_requests(&self) -> Vec<OutgoingRequest> {
        let mut state = self.inner.state.lock();

        state.decide(&self.inner.settings);
        state.queue.drain_pending()
    }

    /// Mark the request with the given request id as sent.
    ///
    /// # Arguments
    ///
    /// * `request_id` - The unique id of the request that was sent out. This is
    ///   needed to couple the outcome with the now sent out request.
    ///
    /// * `outcome` - The response that was received from the server after the
    ///   outgoing request was sent out, or the reason why the request failed.
    ///
    /// Returns an error if no request with the given ID is in flight, or if
    /// the response belongs to a different kind of request. In the latter case
    /// the request stays in flight.
    #[instrument(skip_all, fields(request_id = ?request_id))]
    pub fn mark_request_as_sent<'a>(
        &self,
        request_id: &TransactionId,
        outcome: impl Into<RequestOutcome<'a>>,
    ) -> MarkRequestResult<()> {
        let mut state = self.inner.state.lock();
        let state = &mut *state;

        let completion = state.tracker.resolve(&mut state.queue, request_id, outcome.into())?;

        state.receive_completion(completion);
        state.decide(&self.inner.settings);

        Ok(())
    }

    /// Generate an "out-of-band" key query request for the given set of users.
    ///
    /// The request is handed out right away, it won't be returned by
    /// [`CryptoMachine::outgoing_requests()`]. Once sent, the response should
    /// be passed back to the state machine using
    /// [`CryptoMachine::mark_request_as_sent()`]. The devices of the users are
    /// updated, but the users aren't considered to be up to date.
    #[instrument(skip_all)]
    pub fn query_keys_for_users<'a>(
        &self,
        users: impl IntoIterator<Item = &'a UserId>,
    ) -> Result<OutgoingRequest, RequestCreationError> {
        let mut state = self.inner.state.lock();

        let request = state
            .identities
            .build_key_query_for_users(users.into_iter().map(ToOwned::to_owned), &self.inner.settings)?;
        let request = OutgoingRequest::new(request);

        state.queue.enqueue_in_flight(request.clone())?;

        debug!(request_id = ?request.request_id(), "Created an out-of-band /keys/query request");

        Ok(request)
    }

    /// The requests that were decided on but weren't handed out yet.
    pub fn pending_requests(&self) -> Vec<OutgoingRequest> {
        self.inner.state.lock().queue.pending().cloned().collect()
    }

    /// The requests that were handed out but weren't marked as sent yet.
    pub fn in_flight_requests(&self) -> Vec<OutgoingRequest> {
        self.inner.state.lock().queue.in_flight().cloned().collect()
    }

    /// Get the state of the request with the given ID.
    ///
    /// Returns `None` if no such request is queued, either because it was never
    /// created or because it was already marked as sent.
    pub fn request_state(&self, request_id: &TransactionId) -> Option<RequestState> {
        self.inner.state.lock().queue.get(request_id).map(|(_, state)| state)
    }

    /// Add one-time keys which need to be uploaded to the server.
    pub fn add_one_time_keys(&self, keys: BTreeMap<String, Value>) {
        self.inner.state.lock().account.add_one_time_keys(keys);
    }

    /// Add fallback keys which need to be uploaded to the server.
    pub fn add_fallback_keys(&self, keys: BTreeMap<String, Value>) {
        self.inner.state.lock().account.add_fallback_keys(keys);
    }

    /// Do we have keys the server doesn't know about yet.
    pub fn needs_keys_upload(&self) -> bool {
        self.inner.state.lock().account.needs_upload()
    }

    /// The one-time key counts the server reported in its latest response to
    /// a `/keys/upload` request.
    pub fn one_time_key_counts(&self) -> BTreeMap<OneTimeKeyAlgorithm, u64> {
        self.inner.state.lock().account.one_time_key_counts().clone()
    }

    /// Update the list of tracked users.
    ///
    /// The machine maintains a list of users whose devices we are keeping
    /// track of: these are known as "tracked users". These must be users that
    /// we share a room with, so that the server sends us updates for their
    /// device lists.
    ///
    /// Users that weren't tracked so far will have their keys queried.
    #[instrument(skip_all)]
    pub fn update_tracked_users<'a>(&self, users: impl IntoIterator<Item = &'a UserId>) {
        self.inner.state.lock().identities.update_tracked_users(users);
    }

    /// Receive the list of users that contained changed devices from the
    /// `/sync` response.
    ///
    /// This will queue up the given users for a key query, users we don't
    /// track are ignored. The sync token, if given, is sent along with
    /// subsequent key queries.
    #[instrument(skip_all)]
    pub fn receive_device_changes<'a>(
        &self,
        users: impl IntoIterator<Item = &'a UserId>,
        token: Option<String>,
    ) {
        self.inner.state.lock().identities.receive_device_changes(users, token);
    }

    /// The users whose devices we're keeping track of.
    pub fn tracked_users(&self) -> BTreeSet<OwnedUserId> {
        self.inner.state.lock().identities.tracked_users()
    }

    /// The tracked users whose keys are outdated and need to be queried,
    /// including users for which a key query is already in flight.
    pub fn users_for_key_query(&self) -> BTreeSet<OwnedUserId> {
        self.inner.state.lock().identities.outdated_users()
    }

    /// Get the device keys of the given user, as the server returned them in
    /// the latest `/keys/query` response containing the user.
    pub fn get_user_devices(&self, user_id: &UserId) -> BTreeMap<OwnedDeviceId, Value> {
        self.inner.state.lock().identities.user_devices(user_id).cloned().unwrap_or_default()
    }

    /// Remember that we're missing an Olm session with the given devices of a
    /// user, a one-time key will be claimed for each of them.
    pub fn mark_sessions_missing<'a>(
        &self,
        user_id: &UserId,
        devices: impl IntoIterator<Item = &'a DeviceId>,
    ) {
        self.inner.state.lock().sessions.mark_sessions_missing(user_id, devices);
    }

    /// The devices, per user, we still need to claim a one-time key for.
    pub fn users_for_key_claim(&self) -> BTreeMap<OwnedUserId, BTreeSet<OwnedDeviceId>> {
        self.inner.state.lock().sessions.missing_sessions().clone()
    }

    /// Do we have an Olm session with the given device.
    pub fn has_session(&self, user_id: &UserId, device_id: &DeviceId) -> bool {
        self.inner.state.lock().sessions.has_session(user_id, device_id)
    }

    /// Did claiming a one-time key for the given device fail.
    ///
    /// Such devices aren't retried until they are passed to
    /// [`CryptoMachine::mark_sessions_missing()`] again.
    pub fn is_session_failed(&self, user_id: &UserId, device_id: &DeviceId) -> bool {
        self.inner.state.lock().sessions.is_failed(user_id, device_id)
    }

    /// Queue up a to-device message.
    ///
    /// Returns the transaction ID of the message, it stays the same no matter
    /// how often the message needs to be retried.
    #[instrument(skip(self, messages))]
    pub fn queue_to_device(
        &self,
        event_type: &str,
        messages: ToDeviceMessages,
    ) -> Result<OwnedTransactionId, ValidationError> {
        self.inner.state.lock().outbound.queue_to_device(event_type, messages)
    }

    /// Queue up cross-signing signatures that need to be uploaded.
    ///
    /// Signatures are only uploaded once our own device keys were uploaded.
    #[instrument(skip_all)]
    pub fn queue_signatures(&self, signed_keys: SignedKeys) -> Result<(), ValidationError> {
        self.inner.state.lock().outbound.queue_signatures(signed_keys)
    }

    /// Queue up an already encrypted room message.
    ///
    /// Returns the transaction ID of the message, it stays the same no matter
    /// how often the message needs to be retried.
    #[instrument(skip(self, content))]
    pub fn queue_room_message(
        &self,
        room_id: &RoomId,
        event_type: &str,
        content: Value,
    ) -> Result<OwnedTransactionId, ValidationError> {
        self.inner.state.lock().outbound.queue_room_message(room_id.to_owned(), event_type, content)
    }

    /// Start backing up room keys to the backup with the given version.
    ///
    /// If a different backup was active before, all the room keys will be
    /// backed up again.
    #[instrument(skip(self))]
    pub fn enable_backup(&self, version: &str) -> Result<(), ValidationError> {
        if version.is_empty() {
            return Err(ValidationError::EmptyBackupVersion);
        }

        let mut state = self.inner.state.lock();

        state.backups.enable_backup(version.to_owned());
        state.queue.retain_pending(|r| {
            r.request().keys_backup().is_none_or(|backup| backup.version() == version)
        });

        Ok(())
    }

    /// Stop backing up room keys.
    ///
    /// Backup requests that weren't handed out yet are dropped, responses to
    /// backup requests that are in flight are ignored.
    #[instrument(skip_all)]
    pub fn disable_backup(&self) {
        let mut state = self.inner.state.lock();

        state.backups.disable_backup();
        state.queue.retain_pending(|r| r.kind() != RequestKind::KeysBackup);
    }

    /// The version of the active backup, if backups are enabled.
    pub fn backup_version(&self) -> Option<String> {
        self.inner.state.lock().backups.version().map(ToOwned::to_owned)
    }

    /// Add a room key, already encrypted for the backup, that needs to be
    /// backed up.
    pub fn add_room_key_for_backup(&self, room_id: &RoomId, session_id: &str, data: Value) {
        self.inner.state.lock().backups.add_room_key(
            room_id.to_owned(),
            session_id.to_owned(),
            data,
        );
    }

    /// Was the room key with the given session ID backed up to the active
    /// backup.
    pub fn is_room_key_backed_up(&self, room_id: &RoomId, session_id: &str) -> bool {
        self.inner.state.lock().backups.is_backed_up(room_id, session_id)
    }

    /// Get the number of room keys we have, and how many of them are backed
    /// up.
    pub fn room_key_counts(&self) -> RoomKeyCounts {
        self.inner.state.lock().backups.room_key_counts()
    }

    #[cfg(test)]
    pub(crate) fn mark_device_keys_as_shared(&self) {
        self.inner.state.lock().account.mark_as_shared();
    }
}

impl MachineState {
    /// Decide which requests need to be sent out and queue them up.
    ///
    /// Requests that are already queued, pending or in flight, aren't queued
    /// up again.
    fn decide(&mut self, settings: &OutgoingRequestsSettings) {
        if self.queue.is_full() {
            trace!(
                queued = self.queue.len(),
                "The outgoing request queue is full, skipping decisions"
            );
            return;
        }

        if let Err(e) = self.queue_up_requests(settings) {
            warn!(
                capacity = e.capacity,
                queued = self.queue.len(),
                "The outgoing request queue is full, postponing the remaining requests"
            );
        }
    }

    fn enqueue(&mut self, request: impl Into<AnyOutgoingRequest>) -> Result<(), QueueFullError> {
        self.queue.enqueue(OutgoingRequest::new(request))
    }

    fn queue_up_requests(&mut self, settings: &OutgoingRequestsSettings) -> Result<(), QueueFullError> {
        if !self.queue.contains_kind(RequestKind::KeysUpload) {
            if let Some(request) = self.account.keys_for_upload() {
                trace!("Queueing up a /keys/upload request");
                self.enqueue(request)?;
            }
        }

        let (key_queries, sequence_number) = self.identities.users_for_key_query(settings);

        for request in key_queries {
            let request = OutgoingRequest::new(request);

            self.queue.enqueue(request.clone())?;

            if let Some(query) = request.request().keys_query() {
                self.identities.mark_request_in_flight(
                    request.request_id(),
                    query,
                    sequence_number,
                );
            }
        }

        // Only one key claim request at a time, otherwise we would claim keys for
        // the same devices twice.
        if !self.queue.contains_kind(RequestKind::KeysClaim) {
            if let Some(request) = self.sessions.get_missing_sessions(settings) {
                trace!("Queueing up a /keys/claim request");
                self.enqueue(request)?;
            }
        }

        let queued_to_device: BTreeSet<_> = self
            .queue
            .of_kind(RequestKind::ToDevice)
            .filter_map(|r| r.request().to_device())
            .map(|r| r.txn_id().to_owned())
            .collect();

        for request in self.outbound.to_device_messages() {
            if !queued_to_device.contains(request.txn_id()) {
                self.queue.enqueue(OutgoingRequest::new(request.clone()))?;
            }
        }

        // Other devices can't verify our signatures before they know about our
        // device keys.
        if !self.account.shared() {
            if self.outbound.has_signatures() {
                trace!("Withholding signature uploads until our device keys are uploaded");
            }
        } else if !self.queue.contains_kind(RequestKind::SignatureUpload) {
            if let Some(request) = self.outbound.signature_upload_request() {
                trace!("Queueing up a signature upload request");
                self.enqueue(request)?;
            }
        }

        let queued_room_messages: BTreeSet<_> = self
            .queue
            .of_kind(RequestKind::RoomMessage)
            .filter_map(|r| r.request().room_message())
            .map(|r| r.txn_id().to_owned())
            .collect();

        for request in self.outbound.room_messages() {
            if !queued_room_messages.contains(request.txn_id()) {
                self.queue.enqueue(OutgoingRequest::new(request.clone()))?;
            }
        }

        let backup_queued = self.queue.of_kind(RequestKind::KeysBackup).any(|r| {
            r.request().keys_backup().map(|b| b.version()) == self.backups.version()
        });

        if self.backups.enabled() && !backup_queued {
            if let Some(request) = self.backups.backup_request(settings.backup_batch_size) {
                self.enqueue(request)?;
            }
        }

        Ok(())
    }

    fn receive_completion(&mut self, completion: Completion<'_>) {
        let Completion { request, outcome } = completion;

        match outcome {
            RequestOutcome::Success(response) => {
                self.receive_response(request.request_id(), request.request(), response)
            }
            RequestOutcome::Failure(failure) => {
                self.receive_failure(request.request_id(), request.request(), &failure)
            }
        }
    }

    fn receive_response(
        &mut self,
        request_id: &TransactionId,
        request: &AnyOutgoingRequest,
        response: AnyIncomingResponse<'_>,
    ) {
        match (request, response) {
            (AnyOutgoingRequest::KeysUpload(request), AnyIncomingResponse::KeysUpload(response)) => {
                self.account.receive_keys_upload_response(request, response);
            }
            (AnyOutgoingRequest::KeysQuery(_), AnyIncomingResponse::KeysQuery(response)) => {
                self.identities.receive_keys_query_response(request_id, response);
            }
            (AnyOutgoingRequest::KeysClaim(request), AnyIncomingResponse::KeysClaim(response)) => {
                self.sessions.receive_keys_claim_response(request, response);
            }
            (AnyOutgoingRequest::ToDeviceRequest(request), AnyIncomingResponse::ToDevice(_)) => {
                self.outbound.remove_to_device(request.txn_id());
            }
            (
                AnyOutgoingRequest::SignatureUpload(request),
                AnyIncomingResponse::SignatureUpload(response),
            ) => {
                self.outbound.receive_signature_upload_response(request, response);
            }
            (
                AnyOutgoingRequest::RoomMessage(request),
                AnyIncomingResponse::RoomMessage(response),
            ) => {
                debug!(
                    txn_id = ?request.txn_id(),
                    event_id = ?response.event_id,
                    "A room message was sent out"
                );
                self.outbound.remove_room_message(request.txn_id());
            }
            (AnyOutgoingRequest::KeysBackup(request), AnyIncomingResponse::KeysBackup(response)) => {
                debug!(etag = %response.etag, count = response.count, "Room keys were backed up");
                self.backups.mark_request_as_sent(request);
            }
            (request, response) => {
                warn!(
                    ?request_id,
                    expected = %request.kind(),
                    got = %response.kind(),
                    "Ignoring a response of the wrong kind"
                );
            }
        }
    }

    fn receive_failure(
        &mut self,
        request_id: &TransactionId,
        request: &AnyOutgoingRequest,
        failure: &RequestFailure,
    ) {
        warn!(
            ?request_id,
            kind = %request.kind(),
            class = ?failure.class,
            reason = %failure.reason,
            "An outgoing request failed"
        );

        // Everything else keeps the state that produced the request, the next
        // decision pass produces an equivalent request.
        match request {
            AnyOutgoingRequest::KeysQuery(_) => self.identities.forget_request(request_id),
            AnyOutgoingRequest::KeysClaim(request) if failure.is_permanent() => {
                self.sessions.mark_request_as_failed(request)
            }
            AnyOutgoingRequest::ToDeviceRequest(request) if failure.is_permanent() => {
                self.outbound.remove_to_device(request.txn_id())
            }
            AnyOutgoingRequest::RoomMessage(request) if failure.is_permanent() => {
                self.outbound.remove_room_message(request.txn_id())
            }
            _ => {}
        }
    }
}
