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

//! Modules containing the request types the state machine hands out, and the
//! response types it expects back.
//!
//! Every request the state machine needs to send out is wrapped in an
//! [`OutgoingRequest`], which couples the request with a unique request ID.
//! Once the request has been sent out, the response needs to be passed back
//! to the state machine together with this request ID.
//!
//! None of the request types can be created outside of this crate, and none
//! of them can be modified once created.

use std::{fmt, time::Duration};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

mod enums;
mod keys_backup;
mod keys_claim;
mod keys_query;
mod keys_upload;
mod outgoing;
mod room_message;
mod signature_upload;
mod to_device;

pub use enums::*;
pub use keys_backup::*;
pub use keys_claim::*;
pub use keys_query::*;
pub use keys_upload::*;
pub use outgoing::*;
pub use room_message::*;
pub use signature_upload::*;
pub use to_device::*;

/// The kind of an outgoing request.
///
/// The numeric values are shared with hosts written in other languages and
/// are never reassigned. New kinds get a new, higher, value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum RequestKind {
    /// Represents a [`KeysUploadRequest`].
    KeysUpload = 0,

    /// Represents a [`KeysQueryRequest`].
    KeysQuery = 1,

    /// Represents a [`KeysClaimRequest`].
    KeysClaim = 2,

    /// Represents a [`ToDeviceRequest`].
    ToDevice = 3,

    /// Represents a [`SignatureUploadRequest`].
    SignatureUpload = 4,

    /// Represents a [`RoomMessageRequest`].
    RoomMessage = 5,

    /// Represents a [`KeysBackupRequest`].
    KeysBackup = 6,
}

impl RequestKind {
    /// All the request kinds, ordered by their numeric value.
    pub const ALL: [RequestKind; 7] = [
        RequestKind::KeysUpload,
        RequestKind::KeysQuery,
        RequestKind::KeysClaim,
        RequestKind::ToDevice,
        RequestKind::SignatureUpload,
        RequestKind::RoomMessage,
        RequestKind::KeysBackup,
    ];

    /// Get the numeric value of this kind.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get a human readable name for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            RequestKind::KeysUpload => "keys_upload",
            RequestKind::KeysQuery => "keys_query",
            RequestKind::KeysClaim => "keys_claim",
            RequestKind::ToDevice => "to_device",
            RequestKind::SignatureUpload => "signature_upload",
            RequestKind::RoomMessage => "room_message",
            RequestKind::KeysBackup => "keys_backup",
        }
    }
}

impl TryFrom<u8> for RequestKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        RequestKind::ALL.get(usize::from(value)).copied().ok_or(value)
    }
}

impl From<RequestKind> for u8 {
    fn from(kind: RequestKind) -> Self {
        kind.as_u8()
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RequestKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for RequestKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;

        RequestKind::try_from(value).map_err(|value| {
            de::Error::invalid_value(de::Unexpected::Unsigned(value.into()), &"a request kind")
        })
    }
}

/// The timeout that servers are asked to wait for when contacting remote
/// servers, unless configured otherwise.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Serialize an optional timeout as an integer amount of milliseconds, the
/// way the key endpoints expect it.
pub(crate) fn serialize_timeout<S: Serializer>(
    timeout: &Option<Duration>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match timeout {
        Some(timeout) => {
            let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            serializer.serialize_some(&millis)
        }
        None => serializer.serialize_none(),
    }
}
