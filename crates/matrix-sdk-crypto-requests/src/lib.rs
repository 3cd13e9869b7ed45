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

#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations)]

mod account;
mod backups;
pub mod error;
pub mod host;
mod identities;
mod locks;
mod machine;
mod outbound;
mod queue;
mod session_manager;
mod settings;
#[cfg(test)]
mod testing;
mod tracker;
pub mod types;
mod utilities;

pub use backups::RoomKeyCounts;
pub use error::{
    ConstructionForbiddenError, HostConversionError, MarkRequestError, MarkRequestResult,
    QueueFullError, RequestCreationError, UnknownRequestError, ValidationError,
};
pub use machine::CryptoMachine;
pub use queue::RequestState;
pub use settings::OutgoingRequestsSettings;
pub use types::requests::{
    IncomingResponse, OutgoingRequest, RequestFailure, RequestKind, RequestOutcome,
};

/// The version of the matrix-sdk-crypto-requests crate being used
pub static VERSION: &str = env!("CARGO_PKG_VERSION");

// Enable tracing for tests in this crate
#[cfg(test)]
#[ctor::ctor]
fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .init();
}
