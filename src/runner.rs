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

//! Hosted subscriber: a long-lived task that keeps a subscriber bound.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::client::Scope;
use crate::message::Message;
use crate::rejection::RejectionReason;

const REBIND_DELAY: Duration = Duration::from_secs(5);

/// Spawns one task that keeps `scope` subscribed until the shutdown signal
/// flips to `true`.
///
/// The task itself does no message work; it re-invokes
/// [Scope::subscribe] whenever the binding is lost, backing off briefly after
/// a failed attempt.
///
/// # Examples
///
/// ```no_run
/// # async fn demo(courier: amqp_courier::Courier) {
/// use amqp_courier::Message;
///
/// let (stop, shutdown) = tokio::sync::watch::channel(false);
/// let task = amqp_courier::spawn_subscriber(
///     courier.endpoint("orders"),
///     |message: Message<serde_json::Value>, _shutdown| async move {
///         println!("got {}", message.payload);
///         Ok(())
///     },
///     shutdown,
/// );
///
/// // ... later, wind the subscriber down:
/// stop.send(true).ok();
/// task.await.ok();
/// # }
/// ```
pub fn spawn_subscriber<T, F, Fut>(
    scope: Scope,
    handler: F,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(Message<T>, watch::Receiver<bool>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RejectionReason>> + Send,
{
    tokio::spawn(async move {
        let mut shutdown = shutdown;
        while !*shutdown.borrow() {
            if let Err(err) = scope.subscribe(handler.clone(), shutdown.clone()).await {
                warn!(error = %err, "subscriber lost its binding, retrying");
            }
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(REBIND_DELAY) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    })
}
