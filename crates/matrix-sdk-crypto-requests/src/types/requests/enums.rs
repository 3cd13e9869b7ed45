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

use as_variant::as_variant;
use serde::{Deserialize, Serialize};

use super::{
    KeysBackupRequest, KeysBackupResponse, KeysClaimRequest, KeysClaimResponse, KeysQueryRequest,
    KeysQueryResponse, KeysUploadRequest, KeysUploadResponse, RequestKind, RoomMessageRequest,
    RoomMessageResponse, SignatureUploadRequest, SignatureUploadResponse, ToDeviceRequest,
    ToDeviceResponse,
};

/// Enum over the different outgoing requests we can have.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnyOutgoingRequest {
    /// The `/keys/upload` request, uploading device and one-time keys.
    KeysUpload(KeysUploadRequest),
    /// The `/keys/query` request, fetching the device and cross signing keys
    /// of other users.
    KeysQuery(KeysQueryRequest),
    /// The request to claim one-time keys for a user/device pair from the
    /// server, after the response is received an 1-to-1 Olm session will be
    /// established with the user/device pair.
    KeysClaim(KeysClaimRequest),
    /// The to-device requests, this request is used for a couple of different
    /// things, the main use is key requests/forwards and interactive device
    /// verification.
    ToDeviceRequest(ToDeviceRequest),
    /// Signature upload request, this request is used after a successful device
    /// or user verification is done.
    SignatureUpload(SignatureUploadRequest),
    /// A room message request, usually for sending in-room interactive
    /// verification events.
    RoomMessage(RoomMessageRequest),
    /// A request that will back up a batch of room keys to the server.
    KeysBackup(KeysBackupRequest),
}

impl AnyOutgoingRequest {
    /// Get the kind of this request.
    pub fn kind(&self) -> RequestKind {
        match self {
            AnyOutgoingRequest::KeysUpload(_) => RequestKind::KeysUpload,
            AnyOutgoingRequest::KeysQuery(_) => RequestKind::KeysQuery,
            AnyOutgoingRequest::KeysClaim(_) => RequestKind::KeysClaim,
            AnyOutgoingRequest::ToDeviceRequest(_) => RequestKind::ToDevice,
            AnyOutgoingRequest::SignatureUpload(_) => RequestKind::SignatureUpload,
            AnyOutgoingRequest::RoomMessage(_) => RequestKind::RoomMessage,
            AnyOutgoingRequest::KeysBackup(_) => RequestKind::KeysBackup,
        }
    }

    /// Get the `/keys/upload` request, if this is one.
    pub fn keys_upload(&self) -> Option<&KeysUploadRequest> {
        as_variant!(self, AnyOutgoingRequest::KeysUpload)
    }

    /// Get the `/keys/query` request, if this is one.
    pub fn keys_query(&self) -> Option<&KeysQueryRequest> {
        as_variant!(self, AnyOutgoingRequest::KeysQuery)
    }

    /// Get the `/keys/claim` request, if this is one.
    pub fn keys_claim(&self) -> Option<&KeysClaimRequest> {
        as_variant!(self, AnyOutgoingRequest::KeysClaim)
    }

    /// Get the to-device request, if this is one.
    pub fn to_device(&self) -> Option<&ToDeviceRequest> {
        as_variant!(self, AnyOutgoingRequest::ToDeviceRequest)
    }

    /// Get the signature upload request, if this is one.
    pub fn signature_upload(&self) -> Option<&SignatureUploadRequest> {
        as_variant!(self, AnyOutgoingRequest::SignatureUpload)
    }

    /// Get the room message request, if this is one.
    pub fn room_message(&self) -> Option<&RoomMessageRequest> {
        as_variant!(self, AnyOutgoingRequest::RoomMessage)
    }

    /// Get the keys backup request, if this is one.
    pub fn keys_backup(&self) -> Option<&KeysBackupRequest> {
        as_variant!(self, AnyOutgoingRequest::KeysBackup)
    }
}

impl From<KeysUploadRequest> for AnyOutgoingRequest {
    fn from(request: KeysUploadRequest) -> Self {
        AnyOutgoingRequest::KeysUpload(request)
    }
}

impl From<KeysQueryRequest> for AnyOutgoingRequest {
    fn from(request: KeysQueryRequest) -> Self {
        AnyOutgoingRequest::KeysQuery(request)
    }
}

impl From<KeysClaimRequest> for AnyOutgoingRequest {
    fn from(request: KeysClaimRequest) -> Self {
        AnyOutgoingRequest::KeysClaim(request)
    }
}

impl From<ToDeviceRequest> for AnyOutgoingRequest {
    fn from(request: ToDeviceRequest) -> Self {
        AnyOutgoingRequest::ToDeviceRequest(request)
    }
}

impl From<SignatureUploadRequest> for AnyOutgoingRequest {
    fn from(request: SignatureUploadRequest) -> Self {
        AnyOutgoingRequest::SignatureUpload(request)
    }
}

impl From<RoomMessageRequest> for AnyOutgoingRequest {
    fn from(request: RoomMessageRequest) -> Self {
        AnyOutgoingRequest::RoomMessage(request)
    }
}

impl From<KeysBackupRequest> for AnyOutgoingRequest {
    fn from(request: KeysBackupRequest) -> Self {
        AnyOutgoingRequest::KeysBackup(request)
    }
}

/// Enum over all the incoming responses we need to receive.
#[derive(Clone, Copy, Debug)]
pub enum AnyIncomingResponse<'a> {
    /// The `/keys/upload` response, notifying us about the amount of uploaded
    /// one-time keys.
    KeysUpload(&'a KeysUploadResponse),
    /// The `/keys/query` response, giving us the device and cross signing keys
    /// of other users.
    KeysQuery(&'a KeysQueryResponse),
    /// The key claiming requests, giving us new one-time keys of other users so
    /// new Olm sessions can be created.
    KeysClaim(&'a KeysClaimResponse),
    /// The to-device response, an empty response.
    ToDevice(&'a ToDeviceResponse),
    /// The cross signing signature upload response.
    SignatureUpload(&'a SignatureUploadResponse),
    /// A room message response, usually for interactive verifications.
    RoomMessage(&'a RoomMessageResponse),
    /// The response for a keys backup request.
    KeysBackup(&'a KeysBackupResponse),
}

impl AnyIncomingResponse<'_> {
    /// Get the kind of the request this response belongs to.
    pub fn kind(&self) -> RequestKind {
        match self {
            AnyIncomingResponse::KeysUpload(_) => RequestKind::KeysUpload,
            AnyIncomingResponse::KeysQuery(_) => RequestKind::KeysQuery,
            AnyIncomingResponse::KeysClaim(_) => RequestKind::KeysClaim,
            AnyIncomingResponse::ToDevice(_) => RequestKind::ToDevice,
            AnyIncomingResponse::SignatureUpload(_) => RequestKind::SignatureUpload,
            AnyIncomingResponse::RoomMessage(_) => RequestKind::RoomMessage,
            AnyIncomingResponse::KeysBackup(_) => RequestKind::KeysBackup,
        }
    }
}

impl<'a> From<&'a KeysUploadResponse> for AnyIncomingResponse<'a> {
    fn from(response: &'a KeysUploadResponse) -> Self {
        AnyIncomingResponse::KeysUpload(response)
    }
}

impl<'a> From<&'a KeysQueryResponse> for AnyIncomingResponse<'a> {
    fn from(response: &'a KeysQueryResponse) -> Self {
        AnyIncomingResponse::KeysQuery(response)
    }
}

impl<'a> From<&'a KeysClaimResponse> for AnyIncomingResponse<'a> {
    fn from(response: &'a KeysClaimResponse) -> Self {
        AnyIncomingResponse::KeysClaim(response)
    }
}

impl<'a> From<&'a ToDeviceResponse> for AnyIncomingResponse<'a> {
    fn from(response: &'a ToDeviceResponse) -> Self {
        AnyIncomingResponse::ToDevice(response)
    }
}

impl<'a> From<&'a SignatureUploadResponse> for AnyIncomingResponse<'a> {
    fn from(response: &'a SignatureUploadResponse) -> Self {
        AnyIncomingResponse::SignatureUpload(response)
    }
}

impl<'a> From<&'a RoomMessageResponse> for AnyIncomingResponse<'a> {
    fn from(response: &'a RoomMessageResponse) -> Self {
        AnyIncomingResponse::RoomMessage(response)
    }
}

impl<'a> From<&'a KeysBackupResponse> for AnyIncomingResponse<'a> {
    fn from(response: &'a KeysBackupResponse) -> Self {
        AnyIncomingResponse::KeysBackup(response)
    }
}

/// Owned version of [`AnyIncomingResponse`], used when a response is parsed
/// from data the host passed in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IncomingResponse {
    /// See [`AnyIncomingResponse::KeysUpload`].
    KeysUpload(KeysUploadResponse),
    /// See [`AnyIncomingResponse::KeysQuery`].
    KeysQuery(KeysQueryResponse),
    /// See [`AnyIncomingResponse::KeysClaim`].
    KeysClaim(KeysClaimResponse),
    /// See [`AnyIncomingResponse::ToDevice`].
    ToDevice(ToDeviceResponse),
    /// See [`AnyIncomingResponse::SignatureUpload`].
    SignatureUpload(SignatureUploadResponse),
    /// See [`AnyIncomingResponse::RoomMessage`].
    RoomMessage(RoomMessageResponse),
    /// See [`AnyIncomingResponse::KeysBackup`].
    KeysBackup(KeysBackupResponse),
}

impl IncomingResponse {
    /// Borrow this response.
    pub fn as_any(&self) -> AnyIncomingResponse<'_> {
        match self {
            IncomingResponse::KeysUpload(r) => r.into(),
            IncomingResponse::KeysQuery(r) => r.into(),
            IncomingResponse::KeysClaim(r) => r.into(),
            IncomingResponse::ToDevice(r) => r.into(),
            IncomingResponse::SignatureUpload(r) => r.into(),
            IncomingResponse::RoomMessage(r) => r.into(),
            IncomingResponse::KeysBackup(r) => r.into(),
        }
    }

    /// Get the kind of the request this response belongs to.
    pub fn kind(&self) -> RequestKind {
        self.as_any().kind()
    }
}

impl<'a> From<&'a IncomingResponse> for AnyIncomingResponse<'a> {
    fn from(response: &'a IncomingResponse) -> Self {
        response.as_any()
    }
}

/// How a failed request should be treated.
///
/// The classification is done by whoever sent the request out, the state
/// machine only uses it to decide what to do with the state that produced
/// the request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The request might succeed if it's retried, e.g. the server was
    /// unreachable or rate limited us.
    Transient,
    /// The request will never succeed, e.g. the server rejected it as
    /// malformed.
    Permanent,
}

/// A request couldn't be sent out successfully.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFailure {
    /// Whether the failure is transient or permanent.
    pub class: FailureClass,
    /// A human readable description of the failure, used for logging.
    pub reason: String,
}

impl RequestFailure {
    /// Create a new transient failure.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self { class: FailureClass::Transient, reason: reason.into() }
    }

    /// Create a new permanent failure.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self { class: FailureClass::Permanent, reason: reason.into() }
    }

    /// Is this a permanent failure.
    pub fn is_permanent(&self) -> bool {
        self.class == FailureClass::Permanent
    }
}

/// The outcome of an outgoing request, reported back to the state machine
/// once the request was sent out.
#[derive(Clone, Debug)]
pub enum RequestOutcome<'a> {
    /// The request was sent out and the server responded successfully.
    Success(AnyIncomingResponse<'a>),
    /// The request couldn't be sent out or the server rejected it.
    Failure(RequestFailure),
}

impl<'a> From<AnyIncomingResponse<'a>> for RequestOutcome<'a> {
    fn from(response: AnyIncomingResponse<'a>) -> Self {
        RequestOutcome::Success(response)
    }
}

macro_rules! outcome_from_response {
    ($($response:ident),+ $(,)?) => {
        $(
            impl<'a> From<&'a $response> for RequestOutcome<'a> {
                fn from(response: &'a $response) -> Self {
                    RequestOutcome::Success(response.into())
                }
            }
        )+
    };
}

outcome_from_response!(
    KeysUploadResponse,
    KeysQueryResponse,
    KeysClaimResponse,
    ToDeviceResponse,
    SignatureUploadResponse,
    RoomMessageResponse,
    KeysBackupResponse,
    IncomingResponse,
);

impl From<RequestFailure> for RequestOutcome<'_> {
    fn from(failure: RequestFailure) -> Self {
        RequestOutcome::Failure(failure)
    }
}
