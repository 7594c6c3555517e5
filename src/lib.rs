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

//! A typed message courier for AMQP 0-9-1 brokers.
//!
//! The courier turns application values into broker frames and back, layering
//! two orthogonal capabilities over the raw transport:
//!
//! - **object-store offload**: large or durability-critical payloads are
//!   persisted to an external object store and only a small *reference
//!   envelope* (the object key) travels through the broker;
//! - **envelope-preserving encryption**: payloads, and for offloaded
//!   messages the stored document as well, are encrypted with a symmetric
//!   scheme configurable per endpoint.
//!
//! The crate does not implement an AMQP client or an object-store backend;
//! applications plug their own through the [transport] and [store] ports.
//!
//! ## Publishing
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use amqp_courier::store::BlobStore;
//! # use amqp_courier::transport::AmqpConnector;
//! use amqp_courier::{Courier, Endpoint, EncryptionConfig, StoreConfig};
//!
//! # async fn demo(
//! #     connector: Arc<dyn AmqpConnector>,
//! #     blobs: Arc<dyn BlobStore>,
//! # ) -> Result<(), amqp_courier::Error> {
//! let courier = Courier::builder()
//!     .connector(connector)
//!     .blob_store(blobs)
//!     .build()?;
//!
//! courier.register_default_endpoint(
//!     Endpoint::new("invoices", "billing.invoices")
//!         .encryption(EncryptionConfig::new("sw0rdf1sh"))
//!         .store(StoreConfig::new("billing-payloads")),
//! );
//!
//! let message = courier.publish(serde_json::json!({"total": 10})).await?;
//! println!("stored under {:?}", message.stored_key());
//! # Ok(())
//! # }
//! ```
//!
//! ## Consuming
//!
//! Handlers receive the reconstituted payload no matter which of the four
//! wire variants the endpoint produces. Acknowledge and reject decisions are
//! correlated back to both the broker and, for offloaded messages, the
//! stored document.
//!
//! ```no_run
//! # async fn demo(courier: amqp_courier::Courier) -> Result<(), amqp_courier::Error> {
//! use amqp_courier::Message;
//!
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! courier
//!     .endpoint("invoices")
//!     .subscribe(
//!         |message: Message<serde_json::Value>, _shutdown| async move {
//!             println!("invoice {}: {}", message.id, message.payload);
//!             Ok(())
//!         },
//!         shutdown,
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

/// Boxed error alias used by loosely-typed façade operations.
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

mod client;
mod codec;
pub mod crypto;
mod endpoint;
mod error;
mod message;
mod publisher;
mod rejection;
mod runner;
pub mod store;
mod subscriber;
pub mod transport;

pub use client::{Courier, CourierBuilder, EndpointRef, Scope};
pub use codec::{CodecError, WireFormat};
pub use crypto::{CryptoError, EncryptionConfig};
pub use endpoint::{Endpoint, StoreConfig};
pub use error::{ConfigError, PublishError, SubscribeError};
pub use message::{Message, StoredMessage};
pub use rejection::{RejectionReason, TraceFrame};
pub use runner::spawn_subscriber;
pub use store::{BlobStore, StoreError};
