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

//! Wire formats and object-key derivation.
//!
//! Both formats render the same logical envelope fields; which one an
//! endpoint speaks is part of its configuration and also decides the
//! `content-type` property on published frames and the suffix of derived
//! object keys.

use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

static SLASH_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new("/{2,}").unwrap());

/// Serialization format of an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WireFormat {
    #[default]
    Json,
    Xml,
}

impl WireFormat {
    /// The AMQP `content-type` property for frames in this format.
    pub fn content_type(&self) -> &'static str {
        match self {
            WireFormat::Json => "application/json",
            WireFormat::Xml => "application/xml",
        }
    }

    /// File suffix appended to derived object keys.
    pub fn extension(&self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::Xml => "xml",
        }
    }

    pub(crate) fn to_bytes<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError> {
        match self {
            WireFormat::Json => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|err| CodecError::Serialize(err.to_string())),
            WireFormat::Xml => quick_xml::se::to_string(value)
                .map(|text| Bytes::from(text.into_bytes()))
                .map_err(|err| CodecError::Serialize(err.to_string())),
        }
    }

    pub(crate) fn from_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            WireFormat::Json => serde_json::from_slice(bytes)
                .map_err(|err| CodecError::Deserialize(err.to_string())),
            WireFormat::Xml => {
                let text = std::str::from_utf8(bytes).map_err(|_| CodecError::NotUtf8)?;
                quick_xml::de::from_str(text)
                    .map_err(|err| CodecError::Deserialize(err.to_string()))
            }
        }
    }
}

/// Derives the object-store key for a message.
///
/// Layout is `{prefix}/{endpoint}/{YYYY}/{MM}/{DD}/{id}.{ext}` with the date
/// taken from the message's creation timestamp and runs of `/` collapsed, so
/// the same (endpoint, id, date) always maps to the same key.
pub(crate) fn object_key(
    prefix: &str,
    endpoint: &str,
    id: Uuid,
    created: OffsetDateTime,
    format: WireFormat,
) -> String {
    let path = format!(
        "{}/{}/{:04}/{:02}/{:02}/{}.{}",
        prefix,
        endpoint,
        created.year(),
        u8::from(created.month()),
        created.day(),
        id,
        format.extension(),
    );
    SLASH_RUNS.replace_all(&path, "/").into_owned()
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to serialize message: {0}")]
    Serialize(String),
    #[error("failed to deserialize message: {0}")]
    Deserialize(String),
    #[error("message body is not valid UTF-8")]
    NotUtf8,
}
