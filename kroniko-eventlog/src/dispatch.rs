//! Subscriber dispatch
//!
//! Every persisted event is handed to every subscriber once, in
//! registration order:
//! - synchronous subscribers run inline, before `write()` returns
//! - asynchronous subscribers are queued on an unbounded channel and served
//!   by a single background worker in FIFO order
//!
//! A failing handler is logged and skipped. The write it observes is
//! already durable and is never rolled back.

use async_trait::async_trait;
use kroniko_domain::StoredEvent;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handler invoked inline on the writer's task
pub type SyncHandler = Arc<dyn Fn(&StoredEvent) -> anyhow::Result<()> + Send + Sync>;

/// Handler served by the background worker
#[async_trait]
pub trait AsyncSubscriber: Send + Sync {
    async fn handle(&self, event: StoredEvent) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into an [`AsyncSubscriber`]
struct FnSubscriber<F>(F);

#[async_trait]
impl<F, Fut> AsyncSubscriber for FnSubscriber<F>
where
    F: Fn(StoredEvent) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: StoredEvent) -> anyhow::Result<()> {
        (self.0)(event).await
    }
}

#[derive(Clone)]
enum Subscriber {
    Sync(SyncHandler),
    Async(Arc<dyn AsyncSubscriber>),
}

struct Delivery {
    subscriber: Arc<dyn AsyncSubscriber>,
    slot: usize,
    event: StoredEvent,
}

/// Owns the subscriber list and the asynchronous worker
pub struct Dispatcher {
    subscribers: RwLock<Vec<Subscriber>>,
    queue: Mutex<Option<mpsc::UnboundedSender<Delivery>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Create a dispatcher and spawn its worker on the current runtime
    pub fn start() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(receiver));

        Self {
            subscribers: RwLock::new(Vec::new()),
            queue: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Register a synchronous subscriber
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&StoredEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(Subscriber::Sync(Arc::new(handler)));
    }

    /// Register an asynchronous closure subscriber
    pub fn subscribe_async<F, Fut>(&self, handler: F)
    where
        F: Fn(StoredEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(Subscriber::Async(Arc::new(FnSubscriber(handler))));
    }

    /// Register an asynchronous subscriber object
    pub fn subscribe_handler(&self, handler: Arc<dyn AsyncSubscriber>) {
        self.register(Subscriber::Async(handler));
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver one event to every subscriber.
    ///
    /// Returns once every synchronous subscriber has run; asynchronous
    /// deliveries are only enqueued.
    pub fn dispatch(&self, event: &StoredEvent) {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if subscribers.is_empty() {
            return;
        }

        let queue = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (slot, subscriber) in subscribers.into_iter().enumerate() {
            match subscriber {
                Subscriber::Sync(handler) => {
                    if let Err(e) = handler(event) {
                        warn!(
                            event_id = %event.id,
                            subscriber = slot,
                            error = %e,
                            "Synchronous subscriber failed"
                        );
                    }
                }
                Subscriber::Async(handler) => {
                    let delivery = Delivery {
                        subscriber: handler,
                        slot,
                        event: event.clone(),
                    };
                    let sent = queue.as_ref().map(|q| q.send(delivery).is_ok());
                    if sent != Some(true) {
                        warn!(
                            event_id = %event.id,
                            subscriber = slot,
                            "Dispatcher stopped, asynchronous delivery dropped"
                        );
                    }
                }
            }
        }
    }

    /// Close the queue and wait for the worker to drain it
    pub async fn shutdown(&self) {
        drop(
            self.queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Dispatcher worker terminated abnormally");
            }
        }
    }

    fn register(&self, subscriber: Subscriber) {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(subscriber);
    }
}

async fn run_worker(mut receiver: mpsc::UnboundedReceiver<Delivery>) {
    while let Some(delivery) = receiver.recv().await {
        let event_id = delivery.event.id.clone();
        if let Err(e) = delivery.subscriber.handle(delivery.event).await {
            warn!(
                event_id = %event_id,
                subscriber = delivery.slot,
                error = %e,
                "Asynchronous subscriber failed"
            );
        }
    }
    debug!("Dispatcher worker drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use kroniko_domain::{Event, EventId};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(id: &str) -> StoredEvent {
        Event::with_value("ItemAdded", json!({"cart_id": "42"}))
            .unwrap()
            .into_stored(EventId::from(id))
    }

    #[tokio::test]
    async fn test_sync_subscribers_run_inline() {
        let dispatcher = Dispatcher::start();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            dispatcher.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        dispatcher.dispatch(&event("e1"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_async_deliveries_are_fifo_in_registration_order() {
        let dispatcher = Dispatcher::start();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let seen = seen.clone();
            dispatcher.subscribe_async(move |event: StoredEvent| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(format!("{}:{}", name, event.id));
                    anyhow::Ok(())
                }
            });
        }

        dispatcher.dispatch(&event("e1"));
        dispatcher.dispatch(&event("e2"));
        dispatcher.shutdown().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["first:e1", "second:e1", "first:e2", "second:e2"]
        );
    }

    #[tokio::test]
    async fn test_failing_sync_subscriber_does_not_stop_others() {
        let dispatcher = Dispatcher::start();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe(|_| Err(anyhow::anyhow!("boom")));
        let counter = calls.clone();
        dispatcher.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.dispatch(&event("e1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_trait_subscriber() {
        struct Counter(AtomicUsize);

        #[async_trait]
        impl AsyncSubscriber for Counter {
            async fn handle(&self, _event: StoredEvent) -> anyhow::Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let dispatcher = Dispatcher::start();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        dispatcher.subscribe_handler(counter.clone());

        dispatcher.dispatch(&event("e1"));
        dispatcher.dispatch(&event("e2"));
        dispatcher.shutdown().await;

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_still_runs_sync() {
        let dispatcher = Dispatcher::start();
        dispatcher.shutdown().await;

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        dispatcher.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        dispatcher.subscribe_async(|_event: StoredEvent| async { anyhow::Ok(()) });

        dispatcher.dispatch(&event("e1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
