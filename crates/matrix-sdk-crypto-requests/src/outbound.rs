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

//! Messages other parts of the engine want to send out: to-device messages,
//! cross-signing signatures and room messages.
//!
//! The payloads are built when a message is queued up, they keep their
//! transaction ID until the message was sent out, no matter how many times
//! the request carrying them needs to be retried.

use indexmap::IndexMap;
use ruma::{OwnedRoomId, OwnedTransactionId, TransactionId};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::ValidationError,
    types::requests::{
        RoomMessageRequest, SignatureUploadRequest, SignatureUploadResponse, SignedKeys,
        ToDeviceMessages, ToDeviceRequest,
    },
};

#[derive(Debug, Default)]
pub(crate) struct OutboundMessages {
    to_device: IndexMap<OwnedTransactionId, ToDeviceRequest>,
    room_messages: IndexMap<OwnedTransactionId, RoomMessageRequest>,
    signatures: SignedKeys,
}

impl OutboundMessages {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn queue_to_device(
        &mut self,
        event_type: &str,
        messages: ToDeviceMessages,
    ) -> Result<OwnedTransactionId, ValidationError> {
        let txn_id = TransactionId::new();
        let request = ToDeviceRequest::new(event_type, txn_id.clone(), messages)?;

        debug!(?txn_id, event_type, count = request.message_count(), "Queued up a to-device message");

        self.to_device.insert(txn_id.clone(), request);

        Ok(txn_id)
    }

    pub(crate) fn queue_room_message(
        &mut self,
        room_id: OwnedRoomId,
        event_type: &str,
        content: Value,
    ) -> Result<OwnedTransactionId, ValidationError> {
        let txn_id = TransactionId::new();
        let request = RoomMessageRequest::new(room_id, txn_id.clone(), event_type, content)?;

        debug!(?txn_id, room_id = ?request.room_id(), event_type, "Queued up a room message");

        self.room_messages.insert(txn_id.clone(), request);

        Ok(txn_id)
    }

    /// Add signatures that need to be uploaded, signatures for a key we
    /// already have one for replace the older one.
    pub(crate) fn queue_signatures(&mut self, signed_keys: SignedKeys) -> Result<(), ValidationError> {
        // Validate the new batch on its own, so a bad batch doesn't poison the
        // already queued signatures.
        let request = SignatureUploadRequest::new(signed_keys)?;

        for (user_id, keys) in request.signed_keys {
            self.signatures.entry(user_id).or_default().extend(keys);
        }

        Ok(())
    }

    pub(crate) fn to_device_messages(&self) -> impl Iterator<Item = &ToDeviceRequest> {
        self.to_device.values()
    }

    pub(crate) fn room_messages(&self) -> impl Iterator<Item = &RoomMessageRequest> {
        self.room_messages.values()
    }

    /// Get a request uploading all the queued up signatures.
    pub(crate) fn signature_upload_request(&self) -> Option<SignatureUploadRequest> {
        SignatureUploadRequest::new(self.signatures.clone()).ok()
    }

    pub(crate) fn has_signatures(&self) -> bool {
        !self.signatures.is_empty()
    }

    /// The to-device message was sent out, or will never be.
    pub(crate) fn remove_to_device(&mut self, txn_id: &TransactionId) {
        self.to_device.shift_remove(txn_id);
    }

    /// The room message was sent out, or will never be.
    pub(crate) fn remove_room_message(&mut self, txn_id: &TransactionId) {
        self.room_messages.shift_remove(txn_id);
    }

    /// Remove the signatures the request uploaded.
    ///
    /// Signatures that were replaced while the request was in flight stay
    /// queued. Signatures the server rejected are dropped, the server will
    /// reject them again.
    pub(crate) fn receive_signature_upload_response(
        &mut self,
        request: &SignatureUploadRequest,
        response: &SignatureUploadResponse,
    ) {
        if !response.failures.is_empty() {
            warn!(failures = ?response.failures, "The server rejected some of our signatures");
        }

        for (user_id, keys) in request.signed_keys() {
            if let Some(queued) = self.signatures.get_mut(user_id) {
                queued.retain(|key_id, signed| keys.get(key_id) != Some(&*signed));

                if queued.is_empty() {
                    self.signatures.remove(user_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ruma::{owned_room_id, to_device::DeviceIdOrAllDevices};
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::OutboundMessages;
    use crate::{
        error::ValidationError,
        testing::{alice_device_id, alice_id, bob_id, device_keys},
        types::requests::{RequestKind, SignatureUploadResponse},
    };

    #[test]
    fn test_to_device_messages_keep_their_transaction_id() {
        let mut outbound = OutboundMessages::new();
        let messages = BTreeMap::from([(
            bob_id().to_owned(),
            BTreeMap::from([(DeviceIdOrAllDevices::AllDevices, json!({ "body": "hi" }))]),
        )]);

        let txn_id = outbound.queue_to_device("m.dummy", messages).unwrap();

        let queued: Vec<_> = outbound.to_device_messages().collect();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].txn_id(), &*txn_id);

        outbound.remove_to_device(&txn_id);
        assert_eq!(outbound.to_device_messages().count(), 0);
    }

    #[test]
    fn test_invalid_messages_are_rejected() {
        let mut outbound = OutboundMessages::new();

        assert_eq!(
            outbound.queue_to_device("m.dummy", BTreeMap::new()),
            Err(ValidationError::NoTargetUsers(RequestKind::ToDevice))
        );
        assert_eq!(
            outbound.queue_room_message(owned_room_id!("!test:localhost"), "", json!({})),
            Err(ValidationError::EmptyEventType(RequestKind::RoomMessage))
        );
        assert_eq!(outbound.room_messages().count(), 0);
    }

    #[test]
    fn test_signatures_are_merged() {
        let mut outbound = OutboundMessages::new();
        let key_id = alice_device_id().to_string();

        outbound
            .queue_signatures(BTreeMap::from([(
                alice_id().to_owned(),
                BTreeMap::from([(key_id.clone(), device_keys())]),
            )]))
            .unwrap();
        outbound
            .queue_signatures(BTreeMap::from([(
                alice_id().to_owned(),
                BTreeMap::from([("MASTERKEY".to_owned(), json!({ "usage": ["master"] }))]),
            )]))
            .unwrap();

        let request = outbound.signature_upload_request().unwrap();
        assert_eq!(request.signed_keys()[alice_id()].len(), 2);

        outbound.receive_signature_upload_response(&request, &SignatureUploadResponse::default());

        assert!(!outbound.has_signatures());
        assert!(outbound.signature_upload_request().is_none());
    }

    #[test]
    fn test_replaced_signatures_stay_queued() {
        let mut outbound = OutboundMessages::new();
        let key_id = alice_device_id().to_string();

        outbound
            .queue_signatures(BTreeMap::from([(
                alice_id().to_owned(),
                BTreeMap::from([(key_id.clone(), json!({ "version": 1 }))]),
            )]))
            .unwrap();

        let request = outbound.signature_upload_request().unwrap();

        outbound
            .queue_signatures(BTreeMap::from([(
                alice_id().to_owned(),
                BTreeMap::from([(key_id.clone(), json!({ "version": 2 }))]),
            )]))
            .unwrap();

        outbound.receive_signature_upload_response(&request, &SignatureUploadResponse::default());

        let request = outbound.signature_upload_request().unwrap();
        assert_eq!(request.signed_keys()[alice_id()][&key_id], json!({ "version": 2 }));
    }
}
