// Copyright 2024 The amqp-courier Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types surfaced by the façade.
//!
//! Publish-path failures carry their cause; subscriber pipeline failures are
//! never surfaced here, they become reject decisions (see
//! [Scope::subscribe][crate::Scope::subscribe]).

use thiserror::Error;

use crate::codec::CodecError;
use crate::crypto::CryptoError;
use crate::store::StoreError;
use crate::transport::BrokerError;

/// A problem with the composed configuration, detected before any I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no endpoint named `{0}` is registered")]
    UnknownEndpoint(String),
    #[error("no default endpoint is registered")]
    NoDefaultEndpoint,
    #[error("a connector is required to build a courier")]
    MissingConnector,
    #[error("endpoint `{0}` offloads payloads but no blob store is configured")]
    MissingObjectStore(String),
    #[error("payload is not a portable encrypted hash")]
    InvalidEncryptedPayload,
}

/// An error returned from [Scope::publish][crate::Scope::publish].
#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// An error binding a subscriber to its endpoint.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
