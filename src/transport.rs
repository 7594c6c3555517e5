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

//! The AMQP surface the courier requires from a client implementation.
//!
//! The crate does not speak the wire protocol itself; an application hands
//! the [Courier][crate::Courier] an [AmqpConnector] backed by whatever AMQP
//! client it already uses. Channels obtained through these traits are driven
//! with prefetch 1, so at most one delivery per subscriber is in flight at a
//! time.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::endpoint::Endpoint;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("failed to connect to {0}")]
    Connect(String),
    #[error("failed to open channel: {0}")]
    Channel(String),
    #[error("queue `{0}` does not exist")]
    MissingQueue(String),
    #[error("failed to configure prefetch: {0}")]
    Qos(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("consume failed: {0}")]
    Consume(String),
    #[error("acknowledge failed: {0}")]
    Ack(String),
    #[error("reject failed: {0}")]
    Reject(String),
}

/// Broker-reported queue counters from a passive declare.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueInfo {
    pub message_count: u32,
    pub consumer_count: u32,
}

/// Properties of an outgoing frame.
#[derive(Debug, Clone)]
pub struct Publishing {
    pub content_type: &'static str,
    /// AMQP delivery mode; 2 marks the message persistent.
    pub delivery_mode: u8,
    pub mandatory: bool,
}

impl Publishing {
    /// A persistent, mandatory publication, the only kind the courier emits.
    pub fn persistent(content_type: &'static str) -> Publishing {
        Publishing {
            content_type,
            delivery_mode: 2,
            mandatory: true,
        }
    }
}

/// One message handed to a consumer by the broker.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub body: Bytes,
}

/// A single AMQP channel.
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    /// Checks that `queue` exists without creating it, returning its counters.
    async fn queue_declare_passive(&self, queue: &str) -> Result<QueueInfo, BrokerError>;

    async fn qos(&self, prefetch_count: u16, global: bool) -> Result<(), BrokerError>;

    /// Publishes to the default exchange with `routing_key`.
    async fn publish(
        &self,
        routing_key: &str,
        publishing: Publishing,
        body: Bytes,
    ) -> Result<(), BrokerError>;

    /// Starts a consumer on `queue` and streams its deliveries.
    async fn consume(&self, queue: &str) -> Result<BoxStream<'static, Delivery>, BrokerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait AmqpConnection: Send + Sync {
    async fn open_channel(&self) -> Result<Arc<dyn AmqpChannel>, BrokerError>;
}

/// Opens connections for endpoints on demand.
#[async_trait]
pub trait AmqpConnector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn AmqpConnection>, BrokerError>;
}
