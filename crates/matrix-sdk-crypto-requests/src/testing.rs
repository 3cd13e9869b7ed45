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

//! Helpers shared by the tests of this crate.

use std::collections::BTreeMap;

use ruma::{
    device_id, owned_room_id, room_id, to_device::DeviceIdOrAllDevices, user_id, DeviceId,
    OneTimeKeyAlgorithm, RoomId, UserId,
};
use serde_json::{json, Value};

use crate::{
    types::requests::{
        KeysBackupRequest, KeysClaimRequest, KeysQueryRequest, KeysUploadRequest, OutgoingRequest,
        RoomKeyBackup, RoomMessageRequest, SignatureUploadRequest, ToDeviceRequest,
    },
    CryptoMachine,
};

pub fn alice_id() -> &'static UserId {
    user_id!("@alice:example.org")
}

pub fn alice_device_id() -> &'static DeviceId {
    device_id!("JLAFKJWSCS")
}

pub fn bob_id() -> &'static UserId {
    user_id!("@bob:example.com")
}

pub fn bob_device_id() -> &'static DeviceId {
    device_id!("NTHHPZDPRN")
}

pub fn room_id() -> &'static RoomId {
    room_id!("!test:localhost")
}

pub fn device_keys() -> Value {
    json!({
        "algorithms": ["m.olm.v1.curve25519-aes-sha2", "m.megolm.v1.aes-sha2"],
        "device_id": "JLAFKJWSCS",
        "keys": {
            "curve25519:JLAFKJWSCS": "3C5BFWi2Y8MaVvjM8M22DBmh24PmgR0nPvJOIArzgyI",
            "ed25519:JLAFKJWSCS": "lEuiRJBit0IG6nUf5pUzWTUEsRVVe/HJkoKuEww9ULI"
        },
        "signatures": {
            "@alice:example.org": {
                "ed25519:JLAFKJWSCS": "dSO80A01XiigH3uBiDVx/EjzaoycHcjq9lfQX0uWsqxl2giMIiSPR8a4d291W1ihKJL/a+myXS367WT6NAIcBA"
            }
        },
        "user_id": "@alice:example.org"
    })
}

pub fn one_time_keys(count: usize) -> BTreeMap<String, Value> {
    (0..count)
        .map(|i| {
            (
                format!("signed_curve25519:AAAA{i:02}"),
                json!({ "key": format!("zKbLg+NrIjpnagy+pIY6uPL4ZwEG2v+8F9lmgsnl{i:04}") }),
            )
        })
        .collect()
}

/// A machine whose device keys were already uploaded.
pub fn shared_machine() -> CryptoMachine {
    let machine = CryptoMachine::new(alice_id(), alice_device_id(), device_keys());
    machine.mark_device_keys_as_shared();
    machine
}

/// One request of every kind, ordered by the numeric value of their kind.
pub fn one_request_of_each_kind() -> Vec<OutgoingRequest> {
    let room_id = owned_room_id!("!test:localhost");

    vec![
        OutgoingRequest::new(
            KeysUploadRequest::new(Some(device_keys()), BTreeMap::new(), BTreeMap::new())
                .expect("device keys are enough for an upload"),
        ),
        OutgoingRequest::new(
            KeysQueryRequest::new([bob_id().to_owned()], None, None)
                .expect("a single user is enough for a query"),
        ),
        OutgoingRequest::new(
            KeysClaimRequest::new(
                BTreeMap::from([(
                    bob_id().to_owned(),
                    BTreeMap::from([(bob_device_id().to_owned(), OneTimeKeyAlgorithm::SignedCurve25519)]),
                )]),
                None,
            )
            .expect("a single device is enough for a claim"),
        ),
        OutgoingRequest::new(
            ToDeviceRequest::new(
                "m.dummy",
                "txn-to-device".into(),
                BTreeMap::from([(
                    bob_id().to_owned(),
                    BTreeMap::from([(DeviceIdOrAllDevices::AllDevices, json!({}))]),
                )]),
            )
            .expect("a single message is enough for a to-device request"),
        ),
        OutgoingRequest::new(
            SignatureUploadRequest::new(BTreeMap::from([(
                alice_id().to_owned(),
                BTreeMap::from([(alice_device_id().to_string(), device_keys())]),
            )]))
            .expect("a single signed key is enough for an upload"),
        ),
        OutgoingRequest::new(
            RoomMessageRequest::new(
                room_id.clone(),
                "txn-room-message".into(),
                "m.room.encrypted",
                json!({ "algorithm": "m.megolm.v1.aes-sha2" }),
            )
            .expect("the content is an object"),
        ),
        OutgoingRequest::new(
            KeysBackupRequest::new(
                "1",
                BTreeMap::from([(
                    room_id,
                    RoomKeyBackup {
                        sessions: BTreeMap::from([(
                            "SESSIONID".to_owned(),
                            json!({ "first_message_index": 0 }),
                        )]),
                    },
                )]),
            )
            .expect("a single room key is enough for a backup"),
        ),
    ]
}
