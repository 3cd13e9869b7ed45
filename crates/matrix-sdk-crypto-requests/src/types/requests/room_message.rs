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

use ruma::{OwnedEventId, OwnedRoomId, OwnedTransactionId, RoomId, TransactionId};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use super::RequestKind;
use crate::error::ValidationError;

/// A customized owned request type for sending out room messages
/// ([specification]).
///
/// The content is already encrypted, the body of the request is the content
/// itself.
///
/// ```compile_fail
/// use matrix_sdk_crypto_requests::types::requests::RoomMessageRequest;
/// use ruma::{owned_room_id, TransactionId};
/// use serde_json::json;
///
/// let request = RoomMessageRequest {
///     room_id: owned_room_id!("!test:localhost"),
///     txn_id: TransactionId::new(),
///     event_type: "m.room.encrypted".to_owned(),
///     content: json!({}),
/// };
/// ```
///
/// [specification]: https://spec.matrix.org/unstable/client-server-api/#put_matrixclientv3roomsroomidsendeventtypetxnid
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomMessageRequest {
    pub(crate) room_id: OwnedRoomId,
    pub(crate) txn_id: OwnedTransactionId,
    pub(crate) event_type: String,
    pub(crate) content: Value,
}

impl RoomMessageRequest {
    pub(crate) fn new(
        room_id: OwnedRoomId,
        txn_id: OwnedTransactionId,
        event_type: impl Into<String>,
        content: Value,
    ) -> Result<Self, ValidationError> {
        let event_type = event_type.into();

        if event_type.is_empty() {
            Err(ValidationError::EmptyEventType(RequestKind::RoomMessage))
        } else if txn_id.as_str().is_empty() {
            Err(ValidationError::EmptyTransactionId(RequestKind::RoomMessage))
        } else if !content.is_object() {
            Err(ValidationError::ContentNotAnObject)
        } else {
            Ok(Self { room_id, txn_id, event_type, content })
        }
    }

    /// The room to send the event to.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// The transaction ID for this event.
    ///
    /// Clients should generate an ID unique across requests with the same
    /// access token; it will be used by the server to ensure idempotency of
    /// requests.
    pub fn txn_id(&self) -> &TransactionId {
        &self.txn_id
    }

    /// The type of the event to be sent.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// The event content to send.
    pub fn content(&self) -> &Value {
        &self.content
    }
}

impl Serialize for RoomMessageRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.content.serialize(serializer)
    }
}

/// The response of a room message request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMessageResponse {
    /// The ID the server gave to the sent event.
    pub event_id: OwnedEventId,
}

#[cfg(test)]
mod tests {
    use ruma::{owned_room_id, TransactionId};
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::RoomMessageRequest;
    use crate::{error::ValidationError, types::requests::RequestKind};

    #[test]
    fn test_room_message_validation() {
        let room_id = owned_room_id!("!test:localhost");

        assert_eq!(
            RoomMessageRequest::new(room_id.clone(), TransactionId::new(), "", json!({})),
            Err(ValidationError::EmptyEventType(RequestKind::RoomMessage))
        );
        assert_eq!(
            RoomMessageRequest::new(room_id, TransactionId::new(), "m.room.encrypted", json!([])),
            Err(ValidationError::ContentNotAnObject)
        );
    }

    #[test]
    fn test_room_message_body_is_the_content() {
        let content = json!({
            "algorithm": "m.megolm.v1.aes-sha2",
            "ciphertext": "AwgAEnACgAkLmt6qF84IK++J7UDH2Za1YVchHyprqTqsg",
            "session_id": "SESSIONID",
        });

        let request = RoomMessageRequest::new(
            owned_room_id!("!test:localhost"),
            TransactionId::new(),
            "m.room.encrypted",
            content.clone(),
        )
        .unwrap();

        assert_eq!(request.room_id().as_str(), "!test:localhost");
        assert_eq!(serde_json::to_value(&request).unwrap(), content);
    }
}
