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

//! Named endpoint configuration.

use std::fmt;

use crate::codec::WireFormat;
use crate::crypto::EncryptionConfig;

/// A named configuration targeting one broker queue.
///
/// Encryption and object-store settings are optional and can also be supplied
/// process-wide or per call; see [Courier][crate::Courier] for how the three
/// levels compose.
///
/// # Examples
///
/// ```
/// use amqp_courier::{Endpoint, EncryptionConfig, StoreConfig, WireFormat};
///
/// let endpoint = Endpoint::new("invoices", "billing.invoices")
///     .host("broker.internal")
///     .credentials("billing", "s3cr3t")
///     .tls(true)
///     .format(WireFormat::Xml)
///     .encryption(EncryptionConfig::new("sw0rdf1sh"))
///     .store(StoreConfig::new("billing-payloads"));
/// assert_eq!(endpoint.queue, "billing.invoices");
/// ```
#[derive(Clone)]
pub struct Endpoint {
    /// Registry name; endpoints are deduplicated on it case-insensitively.
    pub name: String,
    pub host: String,
    pub port: u16,
    pub virtual_host: String,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    /// The queue this endpoint targets, also used as the routing key.
    /// Deduplicated case-insensitively like `name`.
    pub queue: String,
    pub format: WireFormat,
    /// Suppresses non-error log records for traffic on this endpoint.
    pub quiet: bool,
    pub encryption: Option<EncryptionConfig>,
    pub store: Option<StoreConfig>,
}

impl Endpoint {
    /// An endpoint with the conventional AMQP defaults: `localhost:5672`,
    /// virtual host `/`, `guest`/`guest`, no TLS, JSON wire format.
    pub fn new(name: impl Into<String>, queue: impl Into<String>) -> Endpoint {
        Endpoint {
            name: name.into(),
            host: "localhost".to_string(),
            port: 5672,
            virtual_host: "/".to_string(),
            username: "guest".to_string(),
            password: "guest".to_string(),
            use_tls: false,
            queue: queue.into(),
            format: WireFormat::default(),
            quiet: false,
            encryption: None,
            store: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Endpoint {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Endpoint {
        self.port = port;
        self
    }

    pub fn virtual_host(mut self, virtual_host: impl Into<String>) -> Endpoint {
        self.virtual_host = virtual_host.into();
        self
    }

    pub fn credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Endpoint {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn tls(mut self, use_tls: bool) -> Endpoint {
        self.use_tls = use_tls;
        self
    }

    pub fn format(mut self, format: WireFormat) -> Endpoint {
        self.format = format;
        self
    }

    pub fn quiet(mut self, quiet: bool) -> Endpoint {
        self.quiet = quiet;
        self
    }

    pub fn encryption(mut self, config: EncryptionConfig) -> Endpoint {
        self.encryption = Some(config);
        self
    }

    pub fn store(mut self, config: StoreConfig) -> Endpoint {
        self.store = Some(config);
        self
    }

    /// `host:port` as rendered in connection errors.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("virtual_host", &self.virtual_host)
            .field("username", &self.username)
            .field("password", &"XXXXXXXX")
            .field("use_tls", &self.use_tls)
            .field("queue", &self.queue)
            .field("format", &self.format)
            .field("quiet", &self.quiet)
            .field("encryption", &self.encryption)
            .field("store", &self.store)
            .finish()
    }
}

/// Object-store settings for offloaded payloads.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Leading path segment of derived object keys.
    pub bucket_prefix: String,
    /// Encrypt whole documents at rest. Takes effect only when an encryption
    /// configuration is also in scope.
    pub encrypt_stored_objects: bool,
}

impl StoreConfig {
    pub fn new(bucket_prefix: impl Into<String>) -> StoreConfig {
        StoreConfig {
            bucket_prefix: bucket_prefix.into(),
            encrypt_stored_objects: false,
        }
    }

    pub fn encrypt_stored_objects(mut self, encrypt: bool) -> StoreConfig {
        self.encrypt_stored_objects = encrypt;
        self
    }
}
