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

//! The publish pipeline.
//!
//! Order is fixed: construct the message, offload the payload when an object
//! store is in scope, encrypt the broker-bound payload when transport
//! encryption is in scope, serialize, publish, stamp `published`. The stored
//! document is written before anything reaches the broker, so a store failure
//! never leaves a dangling reference envelope on the queue.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use crate::client::Effective;
use crate::codec;
use crate::crypto;
use crate::error::{ConfigError, PublishError};
use crate::message::Message;
use crate::store::DocumentStore;
use crate::transport::{AmqpChannel, Publishing};

pub(crate) async fn publish<T: Serialize>(
    effective: &Effective,
    channel: &Arc<dyn AmqpChannel>,
    documents: Option<&DocumentStore>,
    payload: T,
) -> Result<Message<T>, PublishError> {
    let endpoint = effective.endpoint();
    let mut message = Message::new(payload);
    let mut stored_key = None;

    let body = if let Some(store) = &effective.store {
        let documents = documents
            .ok_or_else(|| ConfigError::MissingObjectStore(endpoint.name.clone()))?;
        let key = codec::object_key(
            &store.bucket_prefix,
            &endpoint.name,
            message.id,
            message.created,
            endpoint.format,
        );

        let reference = if let Some(config) = effective.transport_encryption() {
            let envelope = crypto::encrypt_value(endpoint.format, &message.payload, config)?;
            let document = message.stored(key.clone(), envelope);
            documents
                .put_document(endpoint.format, effective.at_rest_encryption(), &key, &document)
                .await?;
            message.with_payload(crypto::encrypt_str(&key, config)?)
        } else {
            let document = message.stored(key.clone(), &message.payload);
            documents
                .put_document(endpoint.format, effective.at_rest_encryption(), &key, &document)
                .await?;
            message.with_payload(key.clone())
        };

        stored_key = Some(key);
        endpoint.format.to_bytes(&reference)?
    } else if let Some(config) = effective.transport_encryption() {
        let hash = crypto::encrypt_value(endpoint.format, &message.payload, config)?;
        endpoint.format.to_bytes(&message.with_payload(hash))?
    } else {
        endpoint.format.to_bytes(&message)?
    };

    channel
        .publish(
            &endpoint.queue,
            Publishing::persistent(endpoint.format.content_type()),
            body,
        )
        .await?;

    message.published = Some(OffsetDateTime::now_utc());
    message.stored_key = stored_key;
    if !endpoint.quiet {
        debug!(
            id = %message.id,
            queue = %endpoint.queue,
            offloaded = message.stored_key.is_some(),
            "message published"
        );
    }
    Ok(message)
}

/// Publishes a payload the caller already encrypted.
///
/// The value must pass [crypto::is_portable_hash]; it is carried inline as an
/// encrypted envelope regardless of any object-store configuration in scope.
pub(crate) async fn publish_pre_encrypted(
    effective: &Effective,
    channel: &Arc<dyn AmqpChannel>,
    hash: String,
) -> Result<Message<String>, PublishError> {
    if !crypto::is_portable_hash(&hash) {
        return Err(ConfigError::InvalidEncryptedPayload.into());
    }

    let endpoint = effective.endpoint();
    let mut message = Message::new(hash);
    let body = endpoint.format.to_bytes(&message)?;
    channel
        .publish(
            &endpoint.queue,
            Publishing::persistent(endpoint.format.content_type()),
            body,
        )
        .await?;

    message.published = Some(OffsetDateTime::now_utc());
    if !endpoint.quiet {
        debug!(id = %message.id, queue = %endpoint.queue, "pre-encrypted message published");
    }
    Ok(message)
}
