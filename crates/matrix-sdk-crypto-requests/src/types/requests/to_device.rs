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

use ruma::{to_device::DeviceIdOrAllDevices, OwnedTransactionId, OwnedUserId, TransactionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::RequestKind;
use crate::error::ValidationError;

/// The messages of a to-device request, the content of the event for every
/// targeted device of every targeted user.
pub type ToDeviceMessages = BTreeMap<OwnedUserId, BTreeMap<DeviceIdOrAllDevices, Value>>;

/// Data for a request to the `/sendToDevice` API endpoint
/// ([specification]).
///
/// Send an event to a single device or to a group of devices.
///
/// ```compile_fail
/// use matrix_sdk_crypto_requests::types::requests::ToDeviceRequest;
/// use ruma::TransactionId;
///
/// let request = ToDeviceRequest::new("m.dummy", TransactionId::new(), Default::default());
/// ```
///
/// [specification]: https://spec.matrix.org/unstable/client-server-api/#put_matrixclientv3sendtodeviceeventtypetxnid
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToDeviceRequest {
    #[serde(skip)]
    pub(crate) event_type: String,
    #[serde(skip)]
    pub(crate) txn_id: OwnedTransactionId,
    pub(crate) messages: ToDeviceMessages,
}

impl ToDeviceRequest {
    pub(crate) fn new(
        event_type: impl Into<String>,
        txn_id: OwnedTransactionId,
        messages: ToDeviceMessages,
    ) -> Result<Self, ValidationError> {
        let event_type = event_type.into();

        if event_type.is_empty() {
            return Err(ValidationError::EmptyEventType(RequestKind::ToDevice));
        }

        if txn_id.as_str().is_empty() {
            return Err(ValidationError::EmptyTransactionId(RequestKind::ToDevice));
        }

        if messages.is_empty() {
            return Err(ValidationError::NoTargetUsers(RequestKind::ToDevice));
        }

        if let Some((user_id, _)) = messages.iter().find(|(_, devices)| devices.is_empty()) {
            return Err(ValidationError::EmptyUserEntry {
                kind: RequestKind::ToDevice,
                user_id: user_id.clone(),
            });
        }

        Ok(Self { event_type, txn_id, messages })
    }

    /// The type of the event that will be sent to every device.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The transaction ID of the request.
    ///
    /// The server uses this to deduplicate the request, a retried request
    /// keeps its transaction ID.
    pub fn txn_id(&self) -> &TransactionId {
        &self.txn_id
    }

    /// The event content for every targeted device.
    pub fn messages(&self) -> &ToDeviceMessages {
        &self.messages
    }

    /// Get the number of unique messages this request contains.
    ///
    /// *Note*: A single message may be sent to multiple devices, so this may
    /// be less than the number of devices the messages get delivered to.
    pub fn message_count(&self) -> usize {
        self.messages.values().map(|d| d.len()).sum()
    }
}

/// The response of a `/sendToDevice` request, it has an empty body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToDeviceResponse {}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use ruma::{owned_device_id, owned_user_id, to_device::DeviceIdOrAllDevices, TransactionId};
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::ToDeviceRequest;
    use crate::{error::ValidationError, types::requests::RequestKind};

    fn messages() -> super::ToDeviceMessages {
        BTreeMap::from([(
            owned_user_id!("@bob:example.org"),
            BTreeMap::from([
                (
                    DeviceIdOrAllDevices::DeviceId(owned_device_id!("BOBDEVICE")),
                    json!({ "algorithm": "m.olm.v1.curve25519-aes-sha2" }),
                ),
                (DeviceIdOrAllDevices::AllDevices, json!({ "algorithm": "m.olm.v1.curve25519-aes-sha2" })),
            ]),
        )])
    }

    #[test]
    fn test_to_device_validation() {
        assert_eq!(
            ToDeviceRequest::new("", TransactionId::new(), messages()),
            Err(ValidationError::EmptyEventType(RequestKind::ToDevice))
        );
        assert_eq!(
            ToDeviceRequest::new("m.room.encrypted", "".into(), messages()),
            Err(ValidationError::EmptyTransactionId(RequestKind::ToDevice))
        );
        assert_eq!(
            ToDeviceRequest::new("m.room.encrypted", TransactionId::new(), BTreeMap::new()),
            Err(ValidationError::NoTargetUsers(RequestKind::ToDevice))
        );
    }

    #[test]
    fn test_body_only_contains_messages() {
        let request =
            ToDeviceRequest::new("m.room.encrypted", "txn-1".into(), messages()).unwrap();

        assert_eq!(request.message_count(), 2);
        assert_eq!(request.txn_id().as_str(), "txn-1");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "messages": {
                    "@bob:example.org": {
                        "*": { "algorithm": "m.olm.v1.curve25519-aes-sha2" },
                        "BOBDEVICE": { "algorithm": "m.olm.v1.curve25519-aes-sha2" },
                    }
                }
            })
        );
    }
}
