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

//! Flat, string based, representation of the outgoing requests for hosts
//! written in other languages.
//!
//! Every request type carries the request ID, the parameters of the request
//! that aren't part of the HTTP body, and the JSON-encoded body. Hosts can
//! read the requests but never create them, every constructor fails with a
//! [`ConstructionForbiddenError`].

use ruma::TransactionId;

use crate::{
    error::{ConstructionForbiddenError, HostConversionError},
    types::requests::{
        AnyOutgoingRequest, IncomingResponse, KeysBackupRequest as OriginalKeysBackupRequest,
        KeysClaimRequest as OriginalKeysClaimRequest,
        KeysQueryRequest as OriginalKeysQueryRequest,
        KeysUploadRequest as OriginalKeysUploadRequest, OutgoingRequest, RequestKind,
        RoomMessageRequest as OriginalRoomMessageRequest,
        SignatureUploadRequest as OriginalSignatureUploadRequest,
        ToDeviceRequest as OriginalToDeviceRequest,
    },
};

macro_rules! request {
    (
        $(#[$meta:meta])*
        $destination_request:ident ($kind:ident) from $source_request:ident
        $( extracts [ $( $(#[$field_meta:meta])* $field_name:ident ),+ $(,)? ] )?
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct $destination_request {
            id: String,
            $( $( $field_name: String, )+ )?
            body: String,
        }

        impl $destination_request {
            /// The constructor exposed to the bindings.
            ///
            /// Requests are only ever created by the
            /// [`CryptoMachine`](crate::CryptoMachine), this always fails.
            #[allow(unused_variables)]
            pub fn new(
                id: String,
                $( $( $field_name: String, )+ )?
                body: String,
            ) -> Result<Self, ConstructionForbiddenError> {
                Err(ConstructionForbiddenError { type_name: stringify!($destination_request) })
            }

            fn from_request(
                request_id: &TransactionId,
                request: &$source_request,
            ) -> Result<Self, serde_json::Error> {
                Ok(Self {
                    id: request_id.to_string(),
                    $( $( $field_name: request.$field_name().to_string(), )+ )?
                    body: serde_json::to_string(request)?,
                })
            }

            /// The request ID.
            pub fn id(&self) -> &str {
                &self.id
            }

            $(
                $(
                    $(#[$field_meta])*
                    pub fn $field_name(&self) -> &str {
                        &self.$field_name
                    }
                )+
            )?

            /// A JSON-encoded string containing the body of the HTTP request.
            pub fn body(&self) -> &str {
                &self.body
            }

            /// Get its request type.
            pub fn request_type(&self) -> RequestKind {
                RequestKind::$kind
            }
        }
    };
}

request!(
    /// Data for a request to the `/keys/upload` API endpoint
    /// ([specification]).
    ///
    /// Publishes end-to-end encryption keys for the device.
    ///
    /// [specification]: https://spec.matrix.org/unstable/client-server-api/#post_matrixclientv3keysupload
    KeysUploadRequest(KeysUpload) from OriginalKeysUploadRequest
);

request!(
    /// Data for a request to the `/keys/query` API endpoint
    /// ([specification]).
    ///
    /// Returns the current devices and identity keys for the given users.
    ///
    /// [specification]: https://spec.matrix.org/unstable/client-server-api/#post_matrixclientv3keysquery
    KeysQueryRequest(KeysQuery) from OriginalKeysQueryRequest
);

request!(
    /// Data for a request to the `/keys/claim` API endpoint
    /// ([specification]).
    ///
    /// Claims one-time keys that can be used to establish 1-to-1 E2EE
    /// sessions.
    ///
    /// [specification]: https://spec.matrix.org/unstable/client-server-api/#post_matrixclientv3keysclaim
    KeysClaimRequest(KeysClaim) from OriginalKeysClaimRequest
);

request!(
    /// Data for a request to the `/sendToDevice` API endpoint
    /// ([specification]).
    ///
    /// Send an event to a single device or to a group of devices.
    ///
    /// [specification]: https://spec.matrix.org/unstable/client-server-api/#put_matrixclientv3sendtodeviceeventtypetxnid
    ToDeviceRequest(ToDevice) from OriginalToDeviceRequest
    extracts [
        /// A string representing the type of event being sent to each devices.
        event_type,
        /// A string representing a request identifier unique to the access
        /// token used to send the request.
        txn_id,
    ]
);

request!(
    /// Data for a request to the `/keys/signatures/upload` API endpoint
    /// ([specification]).
    ///
    /// Publishes cross-signing signatures for the user.
    ///
    /// [specification]: https://spec.matrix.org/unstable/client-server-api/#post_matrixclientv3keyssignaturesupload
    SignatureUploadRequest(SignatureUpload) from OriginalSignatureUploadRequest
);

request!(
    /// A customized owned request type for sending out room messages
    /// ([specification]).
    ///
    /// [specification]: https://spec.matrix.org/unstable/client-server-api/#put_matrixclientv3roomsroomidsendeventtypetxnid
    RoomMessageRequest(RoomMessage) from OriginalRoomMessageRequest
    extracts [
        /// A string representing the room to send the event to.
        room_id,
        /// A string representing the transaction ID for this event.
        txn_id,
        /// A string representing the type of event to be sent.
        event_type,
    ]
);

request!(
    /// A request that will back up a batch of room keys to the server
    /// ([specification]).
    ///
    /// [specification]: https://spec.matrix.org/unstable/client-server-api/#put_matrixclientv3room_keyskeys
    KeysBackupRequest(KeysBackup) from OriginalKeysBackupRequest
    extracts [
        /// The version of the backup the room keys belong to.
        version,
    ]
);

/// One of the flat request types.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostRequest {
    /// A `/keys/upload` request.
    KeysUpload(KeysUploadRequest),
    /// A `/keys/query` request.
    KeysQuery(KeysQueryRequest),
    /// A `/keys/claim` request.
    KeysClaim(KeysClaimRequest),
    /// A `/sendToDevice` request.
    ToDevice(ToDeviceRequest),
    /// A `/keys/signatures/upload` request.
    SignatureUpload(SignatureUploadRequest),
    /// A room message request.
    RoomMessage(RoomMessageRequest),
    /// A `/room_keys/keys` request.
    KeysBackup(KeysBackupRequest),
}

impl HostRequest {
    /// The request ID.
    pub fn id(&self) -> &str {
        match self {
            HostRequest::KeysUpload(r) => r.id(),
            HostRequest::KeysQuery(r) => r.id(),
            HostRequest::KeysClaim(r) => r.id(),
            HostRequest::ToDevice(r) => r.id(),
            HostRequest::SignatureUpload(r) => r.id(),
            HostRequest::RoomMessage(r) => r.id(),
            HostRequest::KeysBackup(r) => r.id(),
        }
    }

    /// A JSON-encoded string containing the body of the HTTP request.
    pub fn body(&self) -> &str {
        match self {
            HostRequest::KeysUpload(r) => r.body(),
            HostRequest::KeysQuery(r) => r.body(),
            HostRequest::KeysClaim(r) => r.body(),
            HostRequest::ToDevice(r) => r.body(),
            HostRequest::SignatureUpload(r) => r.body(),
            HostRequest::RoomMessage(r) => r.body(),
            HostRequest::KeysBackup(r) => r.body(),
        }
    }

    /// Get its request type.
    pub fn request_type(&self) -> RequestKind {
        match self {
            HostRequest::KeysUpload(r) => r.request_type(),
            HostRequest::KeysQuery(r) => r.request_type(),
            HostRequest::KeysClaim(r) => r.request_type(),
            HostRequest::ToDevice(r) => r.request_type(),
            HostRequest::SignatureUpload(r) => r.request_type(),
            HostRequest::RoomMessage(r) => r.request_type(),
            HostRequest::KeysBackup(r) => r.request_type(),
        }
    }
}

impl TryFrom<&OutgoingRequest> for HostRequest {
    type Error = HostConversionError;

    fn try_from(outgoing_request: &OutgoingRequest) -> Result<Self, Self::Error> {
        let request_id = outgoing_request.request_id();

        Ok(match outgoing_request.request() {
            AnyOutgoingRequest::KeysUpload(request) => {
                HostRequest::KeysUpload(KeysUploadRequest::from_request(request_id, request)?)
            }
            AnyOutgoingRequest::KeysQuery(request) => {
                HostRequest::KeysQuery(KeysQueryRequest::from_request(request_id, request)?)
            }
            AnyOutgoingRequest::KeysClaim(request) => {
                HostRequest::KeysClaim(KeysClaimRequest::from_request(request_id, request)?)
            }
            AnyOutgoingRequest::ToDeviceRequest(request) => {
                HostRequest::ToDevice(ToDeviceRequest::from_request(request_id, request)?)
            }
            AnyOutgoingRequest::SignatureUpload(request) => HostRequest::SignatureUpload(
                SignatureUploadRequest::from_request(request_id, request)?,
            ),
            AnyOutgoingRequest::RoomMessage(request) => {
                HostRequest::RoomMessage(RoomMessageRequest::from_request(request_id, request)?)
            }
            AnyOutgoingRequest::KeysBackup(request) => {
                HostRequest::KeysBackup(KeysBackupRequest::from_request(request_id, request)?)
            }
        })
    }
}

/// Parse the JSON-encoded body of a response the host received for a request
/// of the given type.
///
/// The parsed response can be passed to
/// [`CryptoMachine::mark_request_as_sent()`](crate::CryptoMachine::mark_request_as_sent).
pub fn parse_response(request_type: u8, body: &str) -> Result<IncomingResponse, HostConversionError> {
    let kind =
        RequestKind::try_from(request_type).map_err(HostConversionError::UnknownRequestType)?;

    Ok(match kind {
        RequestKind::KeysUpload => IncomingResponse::KeysUpload(serde_json::from_str(body)?),
        RequestKind::KeysQuery => IncomingResponse::KeysQuery(serde_json::from_str(body)?),
        RequestKind::KeysClaim => IncomingResponse::KeysClaim(serde_json::from_str(body)?),
        RequestKind::ToDevice => IncomingResponse::ToDevice(serde_json::from_str(body)?),
        RequestKind::SignatureUpload => {
            IncomingResponse::SignatureUpload(serde_json::from_str(body)?)
        }
        RequestKind::RoomMessage => IncomingResponse::RoomMessage(serde_json::from_str(body)?),
        RequestKind::KeysBackup => IncomingResponse::KeysBackup(serde_json::from_str(body)?),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches2::assert_matches;
    use serde_json::{json, Value};
    use similar_asserts::assert_eq;

    use super::{
        parse_response, HostRequest, KeysBackupRequest, KeysClaimRequest, KeysQueryRequest,
        KeysUploadRequest, RoomMessageRequest, SignatureUploadRequest, ToDeviceRequest,
    };
    use crate::{
        error::{ConstructionForbiddenError, HostConversionError},
        testing::{alice_device_id, alice_id, device_keys, one_request_of_each_kind},
        types::requests::{AnyOutgoingRequest, IncomingResponse, RequestKind},
        CryptoMachine,
    };

    fn forbidden(type_name: &'static str) -> ConstructionForbiddenError {
        ConstructionForbiddenError { type_name }
    }

    fn s(value: &str) -> String {
        value.to_owned()
    }

    #[test]
    fn test_hosts_cannot_construct_requests() {
        assert_eq!(
            KeysUploadRequest::new(s("id"), s("{}")),
            Err(forbidden("KeysUploadRequest"))
        );
        assert_eq!(KeysQueryRequest::new(s("id"), s("{}")), Err(forbidden("KeysQueryRequest")));
        assert_eq!(KeysClaimRequest::new(s("id"), s("{}")), Err(forbidden("KeysClaimRequest")));
        assert_eq!(
            ToDeviceRequest::new(s("id"), s("m.dummy"), s("txn"), s("{}")),
            Err(forbidden("ToDeviceRequest"))
        );
        assert_eq!(
            SignatureUploadRequest::new(s("id"), s("{}")),
            Err(forbidden("SignatureUploadRequest"))
        );
        assert_eq!(
            RoomMessageRequest::new(s("id"), s("!test:localhost"), s("txn"), s("m.dummy"), s("{}")),
            Err(forbidden("RoomMessageRequest"))
        );
        assert_eq!(
            KeysBackupRequest::new(s("id"), s("1"), s("{}")),
            Err(forbidden("KeysBackupRequest"))
        );
    }

    #[test]
    fn test_conversion_keeps_id_type_and_body() {
        for request in one_request_of_each_kind() {
            let host = HostRequest::try_from(&request).unwrap();

            assert_eq!(host.id(), request.request_id().as_str());
            assert_eq!(host.request_type(), request.kind());

            let body: Value = serde_json::from_str(host.body()).unwrap();
            let expected = match request.request() {
                AnyOutgoingRequest::KeysUpload(r) => serde_json::to_value(r),
                AnyOutgoingRequest::KeysQuery(r) => serde_json::to_value(r),
                AnyOutgoingRequest::KeysClaim(r) => serde_json::to_value(r),
                AnyOutgoingRequest::ToDeviceRequest(r) => serde_json::to_value(r),
                AnyOutgoingRequest::SignatureUpload(r) => serde_json::to_value(r),
                AnyOutgoingRequest::RoomMessage(r) => serde_json::to_value(r),
                AnyOutgoingRequest::KeysBackup(r) => serde_json::to_value(r),
            }
            .unwrap();

            assert_eq!(body, expected);
        }
    }

    #[test]
    fn test_path_parameters_are_extracted() {
        let requests = one_request_of_each_kind();

        assert_matches!(
            HostRequest::try_from(&requests[RequestKind::ToDevice.as_u8() as usize]),
            Ok(HostRequest::ToDevice(to_device))
        );
        assert_eq!(to_device.event_type(), "m.dummy");
        assert_eq!(to_device.txn_id(), "txn-to-device");
        assert!(!to_device.body().contains("txn-to-device"));

        assert_matches!(
            HostRequest::try_from(&requests[RequestKind::RoomMessage.as_u8() as usize]),
            Ok(HostRequest::RoomMessage(room_message))
        );
        assert_eq!(room_message.room_id(), "!test:localhost");
        assert_eq!(room_message.txn_id(), "txn-room-message");
        assert_eq!(room_message.event_type(), "m.room.encrypted");

        assert_matches!(
            HostRequest::try_from(&requests[RequestKind::KeysBackup.as_u8() as usize]),
            Ok(HostRequest::KeysBackup(backup))
        );
        assert_eq!(backup.version(), "1");
    }

    #[test]
    fn test_parse_response() {
        assert_matches!(
            parse_response(0, r#"{ "one_time_key_counts": { "signed_curve25519": 50 } }"#),
            Ok(IncomingResponse::KeysUpload(response))
        );
        assert_eq!(response.one_time_key_counts.len(), 1);

        assert_matches!(parse_response(3, "{}"), Ok(IncomingResponse::ToDevice(_)));
        assert_matches!(
            parse_response(5, r#"{ "event_id": "$event:localhost" }"#),
            Ok(IncomingResponse::RoomMessage(_))
        );
        assert_matches!(
            parse_response(6, r#"{ "etag": "1", "count": 10 }"#),
            Ok(IncomingResponse::KeysBackup(_))
        );

        assert_matches!(parse_response(7, "{}"), Err(HostConversionError::UnknownRequestType(7)));
        assert_matches!(parse_response(5, "{}"), Err(HostConversionError::Json(_)));
    }

    #[test]
    fn test_host_round_trip() {
        let machine = CryptoMachine::new(alice_id(), alice_device_id(), device_keys());

        let requests: Vec<_> = machine
            .outgoing_requests()
            .iter()
            .map(|r| HostRequest::try_from(r).unwrap())
            .collect();
        let upload = &requests[0];
        assert_eq!(upload.request_type(), RequestKind::KeysUpload);

        let body = json!({ "one_time_key_counts": {} }).to_string();
        let response = parse_response(upload.request_type().as_u8(), &body).unwrap();

        let request_id = machine
            .in_flight_requests()
            .into_iter()
            .find(|r| r.request_id().as_str() == upload.id())
            .map(|r| r.request_id().to_owned())
            .unwrap();

        machine.mark_request_as_sent(&request_id, &response).unwrap();

        assert!(!machine.needs_keys_upload());
    }
}
