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

//! In-memory stand-ins for the transport and blob-store ports.
//!
//! Both fakes append to a shared event log so tests can assert cross-store
//! ordering (broker decision before stored-document write-back).

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use amqp_courier::store::{BlobStore, StoreError};
use amqp_courier::transport::{
    AmqpChannel, AmqpConnection, AmqpConnector, BrokerError, Delivery, Publishing, QueueInfo,
};
use amqp_courier::{Courier, Endpoint};

pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn new_event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

#[derive(Debug, Clone)]
pub struct PublishedFrame {
    pub routing_key: String,
    pub content_type: &'static str,
    pub delivery_mode: u8,
    pub mandatory: bool,
    pub body: Bytes,
}

pub struct BrokerState {
    queues: Mutex<HashMap<String, VecDeque<Delivery>>>,
    next_tag: AtomicU64,
    pub published: Mutex<Vec<PublishedFrame>>,
    pub acked: Mutex<Vec<u64>>,
    pub rejected: Mutex<Vec<(u64, bool)>>,
    pub qos_calls: Mutex<Vec<(u16, bool)>>,
    pub connects: AtomicU64,
    events: EventLog,
}

impl BrokerState {
    /// Creates an empty queue so passive declares succeed.
    pub fn create_queue(&self, name: &str) {
        self.queues
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
    }

    pub fn frames(&self) -> Vec<PublishedFrame> {
        self.published.lock().unwrap().clone()
    }

    pub fn ack_count(&self) -> usize {
        self.acked.lock().unwrap().len()
    }

    pub fn reject_count(&self) -> usize {
        self.rejected.lock().unwrap().len()
    }

    fn pop(&self, queue: &str) -> Option<Delivery> {
        self.queues.lock().unwrap().get_mut(queue)?.pop_front()
    }
}

/// An in-memory AMQP stand-in: one process-wide broker whose connections and
/// channels all share the same queue state.
pub struct MemoryBroker {
    pub state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new(events: EventLog) -> MemoryBroker {
        MemoryBroker {
            state: Arc::new(BrokerState {
                queues: Mutex::new(HashMap::new()),
                next_tag: AtomicU64::new(0),
                published: Mutex::new(Vec::new()),
                acked: Mutex::new(Vec::new()),
                rejected: Mutex::new(Vec::new()),
                qos_calls: Mutex::new(Vec::new()),
                connects: AtomicU64::new(0),
                events,
            }),
        }
    }
}

#[async_trait]
impl AmqpConnector for MemoryBroker {
    async fn connect(&self, _endpoint: &Endpoint) -> Result<Arc<dyn AmqpConnection>, BrokerError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryConnection {
            state: self.state.clone(),
        }))
    }
}

struct MemoryConnection {
    state: Arc<BrokerState>,
}

#[async_trait]
impl AmqpConnection for MemoryConnection {
    async fn open_channel(&self) -> Result<Arc<dyn AmqpChannel>, BrokerError> {
        Ok(Arc::new(MemoryChannel {
            state: self.state.clone(),
        }))
    }
}

struct MemoryChannel {
    state: Arc<BrokerState>,
}

#[async_trait]
impl AmqpChannel for MemoryChannel {
    async fn queue_declare_passive(&self, queue: &str) -> Result<QueueInfo, BrokerError> {
        let queues = self.state.queues.lock().unwrap();
        match queues.get(queue) {
            Some(entries) => Ok(QueueInfo {
                message_count: entries.len() as u32,
                consumer_count: 0,
            }),
            None => Err(BrokerError::MissingQueue(queue.to_string())),
        }
    }

    async fn qos(&self, prefetch_count: u16, global: bool) -> Result<(), BrokerError> {
        self.state
            .qos_calls
            .lock()
            .unwrap()
            .push((prefetch_count, global));
        Ok(())
    }

    async fn publish(
        &self,
        routing_key: &str,
        publishing: Publishing,
        body: Bytes,
    ) -> Result<(), BrokerError> {
        let tag = self.state.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut queues = self.state.queues.lock().unwrap();
            let queue = queues
                .get_mut(routing_key)
                .ok_or_else(|| BrokerError::Publish(format!("no route to `{routing_key}`")))?;
            queue.push_back(Delivery {
                delivery_tag: tag,
                redelivered: false,
                body: body.clone(),
            });
        }
        self.state.published.lock().unwrap().push(PublishedFrame {
            routing_key: routing_key.to_string(),
            content_type: publishing.content_type,
            delivery_mode: publishing.delivery_mode,
            mandatory: publishing.mandatory,
            body,
        });
        self.state
            .events
            .lock()
            .unwrap()
            .push(format!("publish:{routing_key}"));
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<BoxStream<'static, Delivery>, BrokerError> {
        if !self.state.queues.lock().unwrap().contains_key(queue) {
            return Err(BrokerError::Consume(format!("unknown queue `{queue}`")));
        }
        let state = self.state.clone();
        let queue = queue.to_string();
        Ok(Box::pin(futures::stream::unfold(
            (state, queue),
            |(state, queue)| async move {
                loop {
                    if let Some(delivery) = state.pop(&queue) {
                        return Some((delivery, (state, queue)));
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            },
        )))
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError> {
        self.state.acked.lock().unwrap().push(delivery_tag);
        self.state
            .events
            .lock()
            .unwrap()
            .push(format!("ack:{delivery_tag}"));
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError> {
        self.state
            .rejected
            .lock()
            .unwrap()
            .push((delivery_tag, requeue));
        self.state
            .events
            .lock()
            .unwrap()
            .push(format!("reject:{delivery_tag}"));
        Ok(())
    }
}

pub struct MemoryBlobStore {
    pub objects: Mutex<HashMap<String, (String, Bytes)>>,
    events: EventLog,
}

impl MemoryBlobStore {
    pub fn new(events: EventLog) -> MemoryBlobStore {
        MemoryBlobStore {
            objects: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).map(|(_, body)| body.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Bytes, StoreError> {
        self.events.lock().unwrap().push(format!("get:{key}"));
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, content_type: &str, body: Bytes) -> Result<(), StoreError> {
        self.events.lock().unwrap().push(format!("put:{key}"));
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (content_type.to_string(), body));
        Ok(())
    }
}

/// A courier wired to fresh in-memory fakes.
pub fn memory_courier(events: &EventLog) -> (Courier, Arc<BrokerState>, Arc<MemoryBlobStore>) {
    let broker = Arc::new(MemoryBroker::new(events.clone()));
    let blobs = Arc::new(MemoryBlobStore::new(events.clone()));
    let state = broker.state.clone();
    let courier = Courier::builder()
        .connector(broker)
        .blob_store(blobs.clone())
        .build()
        .unwrap();
    (courier, state, blobs)
}

/// Polls `check` until it holds or a generous timeout elapses.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for {what}");
}
