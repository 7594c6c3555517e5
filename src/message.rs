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

//! In-flight and at-rest message shapes.
//!
//! [Message] is the in-memory representation of a user payload in transit.
//! On the wire it is rendered either with the payload inline, or as a
//! *reference envelope* (`Message<String>`) whose payload is the object-store
//! key of a [StoredMessage] holding the original payload.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::rejection::RejectionReason;

/// A user payload in transit between application code and the broker.
///
/// The identifier and creation timestamp are assigned at construction and
/// never change. The remaining timestamps are stamped by the publisher and
/// subscriber as the message moves through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message<T> {
    /// Unique message identifier, assigned at construction.
    pub id: Uuid,
    /// UTC timestamp of construction.
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    /// The user value, or the object key on the wire of an offloaded message.
    pub payload: T,
    /// Set once the broker accepted the frame.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published: Option<OffsetDateTime>,
    /// Set when the subscriber received the delivery.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub consumed: Option<OffsetDateTime>,
    /// Set when the delivery was rejected.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub rejected: Option<OffsetDateTime>,
    #[serde(skip)]
    pub(crate) stored_key: Option<String>,
}

impl<T> Message<T> {
    /// Wraps a payload into a fresh message with a new v4 id.
    pub fn new(payload: T) -> Message<T> {
        Message {
            id: Uuid::new_v4(),
            created: OffsetDateTime::now_utc(),
            payload,
            published: None,
            consumed: None,
            rejected: None,
            stored_key: None,
        }
    }

    /// The object-store key under which this message's payload was offloaded.
    ///
    /// Populated on the publishing side only, and only when the effective
    /// configuration carries an object store.
    pub fn stored_key(&self) -> Option<&str> {
        self.stored_key.as_deref()
    }

    /// Copies the message metadata around a different payload.
    pub(crate) fn with_payload<U>(&self, payload: U) -> Message<U> {
        Message {
            id: self.id,
            created: self.created,
            payload,
            published: self.published,
            consumed: self.consumed,
            rejected: self.rejected,
            stored_key: None,
        }
    }

    /// Builds the stored document for this message under `key`.
    ///
    /// The envelope is passed in separately so the caller can store either the
    /// payload itself or its encrypted hash.
    pub(crate) fn stored<E>(&self, key: String, envelope: E) -> StoredMessage<E> {
        StoredMessage {
            id: self.id,
            created: self.created,
            payload: key,
            envelope,
            published: self.published,
            consumed: self.consumed,
            rejected: self.rejected,
            acknowledged: None,
            rejected_reason: None,
        }
    }
}

/// The document persisted in the object store for an offloaded message.
///
/// Mirrors the reference envelope (`payload` is the object key the document
/// itself lives under) and preserves the original user payload in `envelope`.
/// `acknowledged` and `rejected` are mutually exclusive terminal states
/// written by the subscriber after consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage<E> {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    /// The object key this document is stored under.
    pub payload: String,
    /// The original user payload, or its encrypted hash when transport
    /// encryption is configured.
    pub envelope: E,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub published: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub consumed: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub rejected: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub acknowledged: Option<OffsetDateTime>,
    #[serde(default)]
    pub rejected_reason: Option<RejectionReason>,
}
