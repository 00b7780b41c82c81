//! In-memory background message queue.
//!
//! One-way messages published through a gateway are queued and executed by
//! a fixed pool of worker tasks, each in a fresh context with message
//! provenance. Faults are reported by the host; the publisher never sees
//! them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace};

use sluice_core::{MessageProducer, QueuedMessage, TransportError, TransportResult};
use sluice_framework::ServiceHost;

use crate::config::MessagingConfig;

/// Statistics about the message queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MqStats {
    /// Messages accepted by the queue.
    pub published: u64,
    /// Messages whose execution finished, successfully or not.
    pub processed: u64,
    /// Messages whose execution failed.
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// A bounded in-memory queue drained by worker tasks.
///
/// The queue is a [`MessageProducer`] for the host and needs the host to
/// run its workers, so it is created first and started once the host is
/// built:
///
/// ```rust,ignore
/// let mq = Arc::new(BackgroundMq::new(&config.messaging));
/// let host = ServiceHost::builder()
///     .message_producer(mq.clone())
///     .build();
/// mq.start(&host);
/// ```
pub struct BackgroundMq {
    workers: usize,
    tx: mpsc::Sender<QueuedMessage>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedMessage>>>,
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl BackgroundMq {
    pub fn new(config: &MessagingConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.capacity.max(1));
        Self {
            workers: config.workers.max(1),
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            counters: Arc::default(),
        }
    }

    /// Spawns the workers. Does nothing if they are already running.
    pub fn start(&self, host: &Arc<ServiceHost>) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }

        for worker in 0..self.workers {
            let host = Arc::clone(host);
            let rx = Arc::clone(&self.rx);
            let token = self.token.clone();
            let counters = Arc::clone(&self.counters);
            let span = info_span!("mq_worker", worker);

            handles.push(tokio::spawn(
                async move {
                    trace!("Worker started");
                    loop {
                        let message = tokio::select! {
                            _ = token.cancelled() => break,
                            message = async { rx.lock().await.recv().await } => message,
                        };
                        let Some(message) = message else { break };

                        let operation = message.info.name();
                        if host.execute_message(message).await.is_err() {
                            counters.failed.fetch_add(1, Ordering::Relaxed);
                        }
                        counters.processed.fetch_add(1, Ordering::Relaxed);
                        trace!(operation, "Message processed");
                    }
                    trace!("Worker stopped");
                }
                .instrument(span),
            ));
        }

        info!(workers = self.workers, "Message queue started");
    }

    /// Stops the workers and waits for them. Messages still queued are
    /// dropped; a message being executed finishes first.
    pub async fn stop(&self) {
        self.token.cancel();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            let _ = handle.await;
        }
        debug!(stats = ?self.stats(), "Message queue stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty() && !self.token.is_cancelled()
    }

    pub fn stats(&self) -> MqStats {
        MqStats {
            published: self.counters.published.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for BackgroundMq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundMq")
            .field("workers", &self.workers)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageProducer for BackgroundMq {
    async fn publish(&self, message: QueuedMessage) -> TransportResult<()> {
        if self.token.is_cancelled() {
            return Err(TransportError::Io("message queue is stopped".to_string()));
        }
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::Io("message queue is closed".to_string()))?;
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde::{Deserialize, Serialize};
    use sluice_core::{Describe, Operation, ServiceError};
    use sluice_framework::Gateway;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Notify {
        fail: bool,
    }
    impl Describe for Notify {}
    impl Operation for Notify {
        const NAME: &'static str = "Notify";
        type Response = ();
    }

    static HANDLED: AtomicUsize = AtomicUsize::new(0);

    async fn notify(request: Notify) -> Result<(), ServiceError> {
        HANDLED.fetch_add(1, Ordering::SeqCst);
        if request.fail {
            Err(ServiceError::new(500, "Boom", "boom"))
        } else {
            Ok(())
        }
    }

    #[tokio::test]
    async fn workers_execute_published_messages() {
        let mq = Arc::new(BackgroundMq::new(&MessagingConfig {
            enabled: true,
            workers: 2,
            capacity: 8,
        }));
        let host = ServiceHost::builder()
            .handler(notify)
            .message_producer(mq.clone())
            .build();
        mq.start(&host);
        assert!(mq.is_running());

        let ctx = Arc::new(host.new_context(
            &sluice_core::OperationInfo::of::<Notify>(),
            sluice_core::Verb::Post,
        ));
        let gateway: Gateway = host.gateway(&ctx);
        gateway
            .publish_all(vec![
                Notify { fail: false },
                Notify { fail: true },
                Notify { fail: false },
            ])
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while mq.stats().processed < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(
            mq.stats(),
            MqStats {
                published: 3,
                processed: 3,
                failed: 1,
            }
        );
        assert_eq!(HANDLED.load(Ordering::SeqCst), 3);

        mq.stop().await;
        assert!(!mq.is_running());
        let err = mq
            .publish(QueuedMessage::new(
                sluice_core::OperationInfo::of::<Notify>(),
                Box::new(Notify { fail: false }),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }
}
