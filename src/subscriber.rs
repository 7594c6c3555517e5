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

//! The consume pipeline.
//!
//! Every delivery walks `Received → Decoded → Resolved → Dispatching` and
//! terminates as `Acknowledged` or `Rejected`. Pipeline failures are never
//! surfaced to the host; they become broker rejects (`requeue = false`) and,
//! when the object key is known, a `Rejected` mark on the stored document.
//! The broker decision is always made before stored-document bookkeeping and
//! stays authoritative if that write-back fails.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, trace, warn};

use crate::client::Effective;
use crate::crypto::{self, CryptoError};
use crate::error::{ConfigError, SubscribeError};
use crate::message::{Message, StoredMessage};
use crate::rejection::RejectionReason;
use crate::store::{DocumentStore, StoreError};
use crate::transport::{AmqpChannel, Delivery};

/// Stages of the per-delivery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryState {
    Received,
    Decoded,
    Resolved,
    Dispatching,
    Acknowledged,
    Rejected,
}

enum Decoded<T> {
    Inline(Message<T>),
    Reference { message: Message<String>, key: String },
}

enum Disposition {
    Acknowledged,
    Rejected(RejectionReason),
}

/// A failure turning a reference envelope back into the user payload.
#[derive(Debug, Error)]
enum ResolveError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl ResolveError {
    // the reason records the inner failure's type, not this wrapper
    fn to_reason(&self) -> RejectionReason {
        match self {
            ResolveError::Config(err) => RejectionReason::from_failure(err),
            ResolveError::Store(err) => RejectionReason::from_failure(err),
            ResolveError::Crypto(err) => RejectionReason::from_failure(err),
        }
    }
}

/// Consumes deliveries until the shutdown signal flips or the consumer ends.
///
/// The signal is observed at the entry of each delivery; a delivery that
/// arrives after cancellation is left unacknowledged and will be redelivered
/// by the broker.
pub(crate) async fn subscribe<T, F, Fut>(
    effective: &Effective,
    channel: &Arc<dyn AmqpChannel>,
    documents: Option<&DocumentStore>,
    handler: F,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SubscribeError>
where
    T: Serialize + DeserializeOwned,
    F: Fn(Message<T>, watch::Receiver<bool>) -> Fut,
    Fut: Future<Output = Result<(), RejectionReason>>,
{
    let endpoint = effective.endpoint();
    if effective.store.is_some() && documents.is_none() {
        return Err(ConfigError::MissingObjectStore(endpoint.name.clone()).into());
    }

    let mut deliveries = channel.consume(&endpoint.queue).await?;
    if !endpoint.quiet {
        debug!(queue = %endpoint.queue, "consumer bound");
    }

    // clones of a watch receiver observe the same signal
    let entry_signal = shutdown.clone();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            maybe = deliveries.next() => {
                let Some(delivery) = maybe else { break };
                if *entry_signal.borrow() {
                    break;
                }
                process_delivery(effective, channel, documents, &handler, &entry_signal, delivery)
                    .await;
            }
        }
    }
    Ok(())
}

async fn process_delivery<T, F, Fut>(
    effective: &Effective,
    channel: &Arc<dyn AmqpChannel>,
    documents: Option<&DocumentStore>,
    handler: &F,
    shutdown: &watch::Receiver<bool>,
    delivery: Delivery,
) where
    T: Serialize + DeserializeOwned,
    F: Fn(Message<T>, watch::Receiver<bool>) -> Fut,
    Fut: Future<Output = Result<(), RejectionReason>>,
{
    let endpoint = effective.endpoint();
    let tag = delivery.delivery_tag;
    let mut state = DeliveryState::Received;

    trace!(tag, state = ?state, "delivery received");

    let decoded = match decode_delivery::<T>(effective, &delivery.body) {
        Ok(decoded) => {
            state = DeliveryState::Decoded;
            trace!(tag, state = ?state, "delivery decoded");
            decoded
        }
        Err(err) => {
            warn!(tag, queue = %endpoint.queue, error = %err, "undecodable delivery, rejecting");
            reject_broker(channel, tag, effective).await;
            return;
        }
    };

    let (mut message, stored_key) = match decoded {
        Decoded::Inline(message) => (message, None),
        Decoded::Reference { message, key } => {
            match resolve_reference::<T>(effective, documents, &message, &key).await {
                Ok(resolved) => {
                    state = DeliveryState::Resolved;
                    trace!(tag, state = ?state, "stored payload resolved");
                    (resolved, Some(key))
                }
                Err(err) => {
                    warn!(
                        tag,
                        queue = %endpoint.queue,
                        key = %key,
                        error = %err,
                        "failed to resolve stored payload, rejecting"
                    );
                    reject_broker(channel, tag, effective).await;
                    let reason = stage_frame(err.to_reason(), &endpoint.queue, "resolve");
                    finalize_stored::<T>(effective, documents, &key, Disposition::Rejected(reason))
                        .await;
                    return;
                }
            }
        }
    };

    message.consumed = Some(OffsetDateTime::now_utc());
    state = DeliveryState::Dispatching;
    trace!(tag, state = ?state, "dispatching to handler");
    let outcome = handler(message, shutdown.clone()).await;

    match outcome {
        Ok(()) => {
            // Broker first; the stored document follows the broker decision.
            if let Err(err) = channel.ack(tag).await {
                error!(tag, queue = %endpoint.queue, error = %err, "broker ack failed");
                return;
            }
            state = DeliveryState::Acknowledged;
            if let Some(key) = &stored_key {
                finalize_stored::<T>(effective, documents, key, Disposition::Acknowledged).await;
            }
        }
        Err(reason) => {
            let reason = stage_frame(reason, &endpoint.queue, "dispatch");
            if !endpoint.quiet {
                debug!(tag, queue = %endpoint.queue, reason = %reason, "handler rejected delivery");
            }
            if let Err(err) = channel.reject(tag, false).await {
                error!(tag, queue = %endpoint.queue, error = %err, "broker reject failed");
                return;
            }
            state = DeliveryState::Rejected;
            if let Some(key) = &stored_key {
                finalize_stored::<T>(effective, documents, key, Disposition::Rejected(reason))
                    .await;
            }
        }
    }

    if !endpoint.quiet {
        debug!(tag, queue = %endpoint.queue, state = ?state, "delivery settled");
    }
}

fn decode_delivery<T: DeserializeOwned>(
    effective: &Effective,
    body: &[u8],
) -> Result<Decoded<T>, crate::Error> {
    let format = effective.endpoint().format;
    match (effective.store.is_some(), effective.transport_encryption()) {
        (true, Some(config)) => {
            let wire: Message<String> = format.from_bytes(body)?;
            let key = crypto::decrypt_str(&wire.payload, config)?;
            Ok(Decoded::Reference { message: wire, key })
        }
        (true, None) => {
            let wire: Message<String> = format.from_bytes(body)?;
            let key = wire.payload.clone();
            Ok(Decoded::Reference { message: wire, key })
        }
        (false, Some(config)) => {
            let wire: Message<String> = format.from_bytes(body)?;
            let payload: T = crypto::decrypt_value(format, &wire.payload, config)?;
            Ok(Decoded::Inline(wire.with_payload(payload)))
        }
        (false, None) => Ok(Decoded::Inline(format.from_bytes(body)?)),
    }
}

async fn resolve_reference<T: DeserializeOwned>(
    effective: &Effective,
    documents: Option<&DocumentStore>,
    wire: &Message<String>,
    key: &str,
) -> Result<Message<T>, ResolveError> {
    let endpoint = effective.endpoint();
    let documents = documents
        .ok_or_else(|| ConfigError::MissingObjectStore(endpoint.name.clone()))?;

    let payload = if let Some(config) = effective.transport_encryption() {
        let document: StoredMessage<String> = documents
            .get_document(endpoint.format, effective.at_rest_encryption(), key)
            .await?;
        crypto::decrypt_value(endpoint.format, &document.envelope, config)?
    } else {
        let document: StoredMessage<T> = documents
            .get_document(endpoint.format, effective.at_rest_encryption(), key)
            .await?;
        document.envelope
    };
    Ok(wire.with_payload(payload))
}

/// Synthesizes a frame naming the failed pipeline stage when the reason
/// carries no trace of its own, so every persisted rejection has at least
/// one parsed frame.
fn stage_frame(reason: RejectionReason, queue: &str, stage: &str) -> RejectionReason {
    if !reason.trace.is_empty() {
        return reason;
    }
    reason.with_trace_text(&format!("at {queue}.{stage} in {}:line {}", file!(), line!()))
}

async fn reject_broker(channel: &Arc<dyn AmqpChannel>, tag: u64, effective: &Effective) {
    if let Err(err) = channel.reject(tag, false).await {
        error!(tag, queue = %effective.endpoint().queue, error = %err, "broker reject failed");
    }
}

/// Read-modify-write of the stored document after the broker decision.
///
/// Best effort: a failure here is logged and swallowed, the broker decision
/// stands either way.
async fn finalize_stored<T>(
    effective: &Effective,
    documents: Option<&DocumentStore>,
    key: &str,
    disposition: Disposition,
) where
    T: Serialize + DeserializeOwned,
{
    let Some(documents) = documents else { return };
    let result = if effective.transport_encryption().is_some() {
        write_disposition::<String>(effective, documents, key, disposition).await
    } else {
        write_disposition::<T>(effective, documents, key, disposition).await
    };
    if let Err(err) = result {
        error!(key, error = %err, "stored document write-back failed after broker decision");
    }
}

async fn write_disposition<E>(
    effective: &Effective,
    documents: &DocumentStore,
    key: &str,
    disposition: Disposition,
) -> Result<(), StoreError>
where
    E: Serialize + DeserializeOwned,
{
    let endpoint = effective.endpoint();
    let mut document: StoredMessage<E> = documents
        .get_document(endpoint.format, effective.at_rest_encryption(), key)
        .await?;

    let now = OffsetDateTime::now_utc();
    match disposition {
        Disposition::Acknowledged => {
            document.acknowledged = Some(now);
            document.consumed = Some(now);
        }
        Disposition::Rejected(reason) => {
            document.rejected = Some(now);
            document.rejected_reason = Some(reason);
        }
    }
    documents
        .put_document(endpoint.format, effective.at_rest_encryption(), key, &document)
        .await
}
