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

//! The courier façade: endpoint registry, defaults, connection cache, and the
//! fluent per-call surface.

use std::future::Future;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::crypto::EncryptionConfig;
use crate::endpoint::{Endpoint, StoreConfig};
use crate::error::{ConfigError, PublishError, SubscribeError};
use crate::message::Message;
use crate::rejection::RejectionReason;
use crate::store::{BlobStore, DocumentStore};
use crate::transport::{AmqpChannel, AmqpConnection, AmqpConnector, BrokerError};
use crate::{publisher, subscriber};

/// A registered endpoint and its memoized broker handles.
pub(crate) struct EndpointState {
    pub(crate) endpoint: Endpoint,
    channel: tokio::sync::Mutex<Option<ChannelHandle>>,
}

struct ChannelHandle {
    // keeps the connection alive for as long as the channel is cached
    _connection: Arc<dyn AmqpConnection>,
    channel: Arc<dyn AmqpChannel>,
}

impl EndpointState {
    fn new(endpoint: Endpoint) -> EndpointState {
        EndpointState {
            endpoint,
            channel: tokio::sync::Mutex::new(None),
        }
    }

    /// Returns the cached channel, connecting on first use.
    ///
    /// First use opens the connection and channel, passively declares the
    /// queue (exists-or-fail) and sets prefetch to one. The lock spans the
    /// whole initialization so concurrent first users share one connection.
    pub(crate) async fn channel(
        &self,
        connector: &dyn AmqpConnector,
    ) -> Result<Arc<dyn AmqpChannel>, BrokerError> {
        let mut slot = self.channel.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(handle.channel.clone());
        }

        let connection = connector.connect(&self.endpoint).await?;
        let channel = connection.open_channel().await?;
        channel.queue_declare_passive(&self.endpoint.queue).await?;
        channel.qos(1, false).await?;
        if !self.endpoint.quiet {
            debug!(
                endpoint = %self.endpoint.name,
                queue = %self.endpoint.queue,
                "channel opened"
            );
        }

        let shared = channel.clone();
        *slot = Some(ChannelHandle {
            _connection: connection,
            channel,
        });
        Ok(shared)
    }

    async fn disconnect(&self) {
        self.channel.lock().await.take();
    }
}

#[derive(Default)]
struct Registry {
    endpoints: Vec<Arc<EndpointState>>,
    default_endpoint: Option<Arc<EndpointState>>,
    default_encryption: Option<EncryptionConfig>,
    default_store: Option<StoreConfig>,
}

impl Registry {
    fn find(&self, key: &str) -> Option<Arc<EndpointState>> {
        self.endpoints
            .iter()
            .find(|state| {
                state.endpoint.name.eq_ignore_ascii_case(key)
                    || state.endpoint.queue.eq_ignore_ascii_case(key)
            })
            .cloned()
    }

    fn find_duplicate(&self, endpoint: &Endpoint) -> Option<Arc<EndpointState>> {
        self.endpoints
            .iter()
            .find(|state| {
                state.endpoint.name.eq_ignore_ascii_case(&endpoint.name)
                    || state.endpoint.queue.eq_ignore_ascii_case(&endpoint.queue)
            })
            .cloned()
    }
}

struct Inner {
    connector: Arc<dyn AmqpConnector>,
    documents: Option<DocumentStore>,
    registry: RwLock<Registry>,
}

impl Inner {
    fn registered(&self, endpoint: Endpoint) -> (Arc<EndpointState>, bool) {
        let mut registry = self.registry.write().expect("endpoint registry poisoned");
        if let Some(existing) = registry.find_duplicate(&endpoint) {
            return (existing, false);
        }
        let state = Arc::new(EndpointState::new(endpoint));
        registry.endpoints.push(state.clone());
        (state, true)
    }
}

/// Entry point of the crate: brokers typed messages between application code
/// and an AMQP broker, offloading and encrypting payloads per endpoint.
///
/// A courier hosts any number of named endpoints. Effective configuration for
/// a call composes three levels, most specific first: the per-call override
/// on a [Scope], the setting embedded in the endpoint, and the process-wide
/// default registered here.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use amqp_courier::store::BlobStore;
/// # use amqp_courier::transport::AmqpConnector;
/// # use amqp_courier::{Courier, Endpoint};
/// # async fn demo(
/// #     connector: Arc<dyn AmqpConnector>,
/// #     blobs: Arc<dyn BlobStore>,
/// # ) -> Result<(), amqp_courier::Error> {
/// let courier = Courier::builder()
///     .connector(connector)
///     .blob_store(blobs)
///     .build()?;
/// courier.register_default_endpoint(Endpoint::new("orders", "shop.orders"));
///
/// let published = courier.publish(serde_json::json!({"total": 10})).await?;
/// println!("published {} at {:?}", published.id, published.published);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Courier {
    inner: Arc<Inner>,
}

impl Courier {
    /// A courier over `connector` with no blob store; endpoints that offload
    /// payloads will fail until one is supplied through [Courier::builder].
    pub fn new(connector: Arc<dyn AmqpConnector>) -> Courier {
        Courier {
            inner: Arc::new(Inner {
                connector,
                documents: None,
                registry: RwLock::new(Registry::default()),
            }),
        }
    }

    pub fn builder() -> CourierBuilder {
        CourierBuilder::default()
    }

    /// Registers an endpoint, deduplicating case-insensitively on both name
    /// and queue. Returns whether the endpoint was newly added; a duplicate
    /// leaves the existing registration in place.
    pub fn register_endpoint(&self, endpoint: Endpoint) -> bool {
        self.inner.registered(endpoint).1
    }

    pub fn register_endpoints(&self, endpoints: impl IntoIterator<Item = Endpoint>) {
        for endpoint in endpoints {
            self.register_endpoint(endpoint);
        }
    }

    /// Registers an endpoint (deduplicated as usual) and makes it the default
    /// target for calls that do not name one.
    pub fn register_default_endpoint(&self, endpoint: Endpoint) {
        let (state, _) = self.inner.registered(endpoint);
        self.inner
            .registry
            .write()
            .expect("endpoint registry poisoned")
            .default_endpoint = Some(state);
    }

    /// Process-wide encryption fallback for endpoints without their own.
    pub fn register_default_encryption(&self, config: EncryptionConfig) {
        self.inner
            .registry
            .write()
            .expect("endpoint registry poisoned")
            .default_encryption = Some(config);
    }

    /// Process-wide object-store fallback for endpoints without their own.
    pub fn register_default_object_store(&self, config: StoreConfig) {
        self.inner
            .registry
            .write()
            .expect("endpoint registry poisoned")
            .default_store = Some(config);
    }

    /// Binds a call chain to an endpoint, by registered name (or queue) or by
    /// value. An endpoint passed by value is registered on first use.
    pub fn endpoint(&self, reference: impl Into<EndpointRef>) -> Scope {
        Scope {
            inner: self.inner.clone(),
            endpoint: Some(reference.into()),
            encryption: None,
            store: None,
        }
    }

    fn default_scope(&self) -> Scope {
        Scope {
            inner: self.inner.clone(),
            endpoint: None,
            encryption: None,
            store: None,
        }
    }

    /// Publishes on the default endpoint. See [Scope::publish].
    pub async fn publish<T: Serialize>(&self, payload: T) -> Result<Message<T>, PublishError> {
        self.default_scope().publish(payload).await
    }

    /// Subscribes on the default endpoint. See [Scope::subscribe].
    pub async fn subscribe<T, F, Fut>(
        &self,
        handler: F,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), SubscribeError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(Message<T>, watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = Result<(), RejectionReason>>,
    {
        self.default_scope().subscribe(handler, shutdown).await
    }

    /// Broker-reported depth of the named (or default) endpoint's queue.
    pub async fn message_count(&self, name: Option<&str>) -> Result<u32, crate::Error> {
        let scope = match name {
            Some(name) => self.endpoint(name),
            None => self.default_scope(),
        };
        let effective = scope.resolve()?;
        let channel = effective
            .state
            .channel(self.inner.connector.as_ref())
            .await?;
        let info = channel
            .queue_declare_passive(&effective.endpoint().queue)
            .await?;
        Ok(info.message_count)
    }

    /// Drops the cached connection of the named endpoint, or of every
    /// endpoint when no name is given. The next use reconnects.
    pub async fn disconnect(&self, name: Option<&str>) -> Result<(), crate::Error> {
        match name {
            Some(name) => {
                let state = self
                    .inner
                    .registry
                    .read()
                    .expect("endpoint registry poisoned")
                    .find(name)
                    .ok_or_else(|| ConfigError::UnknownEndpoint(name.to_string()))?;
                state.disconnect().await;
            }
            None => {
                let states = self
                    .inner
                    .registry
                    .read()
                    .expect("endpoint registry poisoned")
                    .endpoints
                    .clone();
                for state in states {
                    state.disconnect().await;
                }
            }
        }
        Ok(())
    }
}

/// Builds a [Courier] from its collaborators.
#[derive(Default)]
pub struct CourierBuilder {
    connector: Option<Arc<dyn AmqpConnector>>,
    blobs: Option<Arc<dyn BlobStore>>,
}

impl CourierBuilder {
    pub fn connector(mut self, connector: Arc<dyn AmqpConnector>) -> CourierBuilder {
        self.connector = Some(connector);
        self
    }

    /// The blob store backing offloaded payloads. Optional; required only by
    /// endpoints with an object-store configuration.
    pub fn blob_store(mut self, blobs: Arc<dyn BlobStore>) -> CourierBuilder {
        self.blobs = Some(blobs);
        self
    }

    pub fn build(self) -> Result<Courier, ConfigError> {
        let connector = self.connector.ok_or(ConfigError::MissingConnector)?;
        Ok(Courier {
            inner: Arc::new(Inner {
                connector,
                documents: self.blobs.map(DocumentStore::new),
                registry: RwLock::new(Registry::default()),
            }),
        })
    }
}

/// Reference to an endpoint in a call chain.
#[derive(Clone)]
pub enum EndpointRef {
    /// A registered name (or queue identifier), matched case-insensitively.
    Name(String),
    /// An endpoint passed by value; registered on first use.
    Object(Box<Endpoint>),
}

impl From<&str> for EndpointRef {
    fn from(name: &str) -> EndpointRef {
        EndpointRef::Name(name.to_string())
    }
}

impl From<String> for EndpointRef {
    fn from(name: String) -> EndpointRef {
        EndpointRef::Name(name)
    }
}

impl From<Endpoint> for EndpointRef {
    fn from(endpoint: Endpoint) -> EndpointRef {
        EndpointRef::Object(Box::new(endpoint))
    }
}

/// Composed configuration for one publish or subscribe call.
pub(crate) struct Effective {
    pub(crate) state: Arc<EndpointState>,
    pub(crate) encryption: Option<EncryptionConfig>,
    pub(crate) store: Option<StoreConfig>,
}

impl Effective {
    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.state.endpoint
    }

    /// The encryption applied to broker-bound payloads, if any.
    pub(crate) fn transport_encryption(&self) -> Option<&EncryptionConfig> {
        self.encryption
            .as_ref()
            .filter(|config| config.applies_to_transport())
    }

    /// The encryption applied to whole stored documents at rest, if any.
    pub(crate) fn at_rest_encryption(&self) -> Option<&EncryptionConfig> {
        match &self.store {
            Some(store) if store.encrypt_stored_objects => self.encryption.as_ref(),
            _ => None,
        }
    }
}

/// One fluent call chain: an endpoint reference plus optional per-call
/// overrides for encryption and object store.
///
/// # Examples
///
/// ```no_run
/// # async fn demo(courier: amqp_courier::Courier) -> Result<(), amqp_courier::Error> {
/// use amqp_courier::{EncryptionConfig, Message};
///
/// let (_stop, shutdown) = tokio::sync::watch::channel(false);
/// courier
///     .endpoint("orders")
///     .encryption(EncryptionConfig::new("sw0rdf1sh").passes(2))
///     .subscribe(
///         |message: Message<serde_json::Value>, _shutdown| async move {
///             println!("got {}", message.payload);
///             Ok(())
///         },
///         shutdown,
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Scope {
    inner: Arc<Inner>,
    endpoint: Option<EndpointRef>,
    encryption: Option<EncryptionConfig>,
    store: Option<StoreConfig>,
}

impl Scope {
    /// Overrides the encryption configuration for this call chain only.
    pub fn encryption(mut self, config: EncryptionConfig) -> Scope {
        self.encryption = Some(config);
        self
    }

    /// Overrides the object-store configuration for this call chain only.
    pub fn object_store(mut self, config: StoreConfig) -> Scope {
        self.store = Some(config);
        self
    }

    fn resolve(&self) -> Result<Effective, ConfigError> {
        let state = match &self.endpoint {
            Some(EndpointRef::Name(name)) => self
                .inner
                .registry
                .read()
                .expect("endpoint registry poisoned")
                .find(name)
                .ok_or_else(|| ConfigError::UnknownEndpoint(name.clone()))?,
            Some(EndpointRef::Object(endpoint)) => {
                self.inner.registered(endpoint.as_ref().clone()).0
            }
            None => self
                .inner
                .registry
                .read()
                .expect("endpoint registry poisoned")
                .default_endpoint
                .clone()
                .ok_or(ConfigError::NoDefaultEndpoint)?,
        };

        let registry = self.inner.registry.read().expect("endpoint registry poisoned");
        let encryption = self
            .encryption
            .clone()
            .or_else(|| state.endpoint.encryption.clone())
            .or_else(|| registry.default_encryption.clone());
        let store = self
            .store
            .clone()
            .or_else(|| state.endpoint.store.clone())
            .or_else(|| registry.default_store.clone());
        drop(registry);

        Ok(Effective {
            state,
            encryption,
            store,
        })
    }

    /// Publishes a payload through the composed configuration and returns the
    /// caller-visible message, stamped with its publish time and, when the
    /// payload was offloaded, the object key it was stored under.
    pub async fn publish<T: Serialize>(&self, payload: T) -> Result<Message<T>, PublishError> {
        let effective = self.resolve()?;
        let channel = effective
            .state
            .channel(self.inner.connector.as_ref())
            .await?;
        publisher::publish(&effective, &channel, self.inner.documents.as_ref(), payload).await
    }

    /// Publishes a payload the caller already encrypted with a matching
    /// configuration. Fails with
    /// [ConfigError::InvalidEncryptedPayload][crate::ConfigError::InvalidEncryptedPayload]
    /// when the value is not a portable hash.
    pub async fn publish_pre_encrypted(
        &self,
        hash: impl Into<String>,
    ) -> Result<Message<String>, PublishError> {
        let effective = self.resolve()?;
        let channel = effective
            .state
            .channel(self.inner.connector.as_ref())
            .await?;
        publisher::publish_pre_encrypted(&effective, &channel, hash.into()).await
    }

    /// Consumes the endpoint's queue, dispatching each delivery to `handler`,
    /// until the shutdown signal flips to `true` or the consumer ends.
    ///
    /// The handler receives the reconstituted message and a clone of the
    /// shutdown signal; returning `Err` rejects the delivery without requeue
    /// and, for offloaded messages, records the reason on the stored
    /// document. Pipeline failures are handled the same way and are not
    /// surfaced here.
    pub async fn subscribe<T, F, Fut>(
        &self,
        handler: F,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), SubscribeError>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(Message<T>, watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = Result<(), RejectionReason>>,
    {
        let effective = self.resolve()?;
        let channel = effective
            .state
            .channel(self.inner.connector.as_ref())
            .await?;
        subscriber::subscribe(
            &effective,
            &channel,
            self.inner.documents.as_ref(),
            handler,
            shutdown,
        )
        .await
    }
}
