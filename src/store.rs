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

//! Object-store port and the typed document adapter on top of it.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::codec::{CodecError, WireFormat};
use crate::crypto::{self, CryptoError, EncryptionConfig};
use crate::message::StoredMessage;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object store backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Content-typed GET/PUT of raw bytes by full key.
///
/// Implemented by the application over its object-store client (S3, Azure
/// Blob, a filesystem, ...). PUT overwrites.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Bytes, StoreError>;

    async fn put(&self, key: &str, content_type: &str, body: Bytes) -> Result<(), StoreError>;
}

/// Serializes stored documents in the endpoint format, transparently
/// encrypting them at rest when asked to.
///
/// With an `at_rest` configuration the object under the key is the portable
/// hash of the serialized document; without one it is the plain document,
/// even if transport encryption is otherwise enabled.
pub(crate) struct DocumentStore {
    blobs: Arc<dyn BlobStore>,
}

impl DocumentStore {
    pub(crate) fn new(blobs: Arc<dyn BlobStore>) -> DocumentStore {
        DocumentStore { blobs }
    }

    pub(crate) async fn put_document<E: Serialize>(
        &self,
        format: WireFormat,
        at_rest: Option<&EncryptionConfig>,
        key: &str,
        document: &StoredMessage<E>,
    ) -> Result<(), StoreError> {
        let body = format.to_bytes(document)?;
        let body = match at_rest {
            Some(config) => Bytes::from(crypto::encrypt_bytes(&body, config)?),
            None => body,
        };
        self.blobs.put(key, format.content_type(), body).await
    }

    pub(crate) async fn get_document<E: DeserializeOwned>(
        &self,
        format: WireFormat,
        at_rest: Option<&EncryptionConfig>,
        key: &str,
    ) -> Result<StoredMessage<E>, StoreError> {
        let body = self.blobs.get(key).await?;
        let body = match at_rest {
            Some(config) => {
                let hash =
                    std::str::from_utf8(&body).map_err(|_| CryptoError::InvalidHash)?;
                Bytes::from(crypto::decrypt_bytes(hash, config)?)
            }
            None => body,
        };
        Ok(format.from_bytes(&body)?)
    }
}
