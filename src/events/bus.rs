//! Event Bus
//!
//! Name-keyed publish/subscribe with a bounded history.
//!
//! `emit` records the event, then hands it to every subscriber of that name
//! in a task of its own. Deliveries are supervised: a handler that returns
//! an error or panics is logged and affects neither the emitter nor the
//! other subscribers. The emitter never waits for delivery; tests and
//! shutdown code call [`EventBus::wait_idle`] to drain in-flight handlers.
//!
//! Live consumers that want every event (progress printers, tracing) can
//! take a broadcast receiver with [`EventBus::tap`].

use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio_util::task::TaskTracker;

use super::event::Event;
use crate::config::DEFAULT_MAX_EVENT_HISTORY;

/// Error type returned by handlers.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Reacts to delivered events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event) -> Result<(), HandlerError>;
}

struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: Event) -> Result<(), HandlerError> {
        (self.func)(event).await
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscribers = HashMap<String, Vec<(SubscriptionId, Arc<dyn EventHandler>)>>;

/// In-process event bus.
pub struct EventBus {
    history: Mutex<VecDeque<Event>>,
    max_history: usize,
    subscribers: RwLock<Subscribers>,
    next_id: AtomicU64,
    tracker: TaskTracker,
    idle: AsyncMutex<()>,
    live: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a bus keeping at most `max_history` events.
    ///
    /// A `max_history` of zero is raised to one: the most recent event is
    /// always kept.
    pub fn new(max_history: usize) -> Self {
        let max_history = max_history.max(1);
        let (live, _) = broadcast::channel(max_history.min(1024));

        Self {
            history: Mutex::new(VecDeque::with_capacity(max_history.min(1024))),
            max_history,
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            tracker: TaskTracker::new(),
            idle: AsyncMutex::new(()),
            live,
        }
    }

    fn lock_history(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes an event and schedules delivery to its subscribers.
    ///
    /// Returns the recorded event immediately. Outside a tokio runtime the
    /// event is still recorded but nobody is notified.
    pub fn emit(&self, name: &str, source: &str, data: Value) -> Event {
        let event = Event::new(name, source, data);

        {
            let mut history = self.lock_history();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        info!("Event emitted: {} from {}", name, source);
        let _ = self.live.send(event.clone());

        let handlers: Vec<(SubscriptionId, Arc<dyn EventHandler>)> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            return event;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(
                    "No async runtime; {} subscriber(s) of '{}' not notified",
                    handlers.len(),
                    name
                );
                return event;
            }
        };

        for (id, handler) in handlers {
            let delivered = event.clone();
            let event_name = event.name.clone();

            self.tracker.spawn_on(
                async move {
                    let task = tokio::spawn(async move { handler.handle(delivered).await });
                    match task.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            error!("Subscriber {:?} of '{}' failed: {}", id, event_name, e)
                        }
                        Err(e) if e.is_panic() => {
                            error!("Subscriber {:?} of '{}' panicked", id, event_name)
                        }
                        Err(e) => {
                            warn!("Subscriber {:?} of '{}' cancelled: {}", id, event_name, e)
                        }
                    }
                },
                &runtime,
            );
        }

        event
    }

    /// Registers a handler for events named `name`.
    pub fn subscribe(&self, name: &str, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .push((id, handler));

        debug!("Subscriber {:?} added for: {}", id, name);
        id
    }

    /// Registers an async closure.
    pub fn subscribe_fn<F, Fut>(&self, name: &str, func: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.subscribe(name, Arc::new(FnHandler { func }))
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, name: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(list) = subscribers.get_mut(name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;

        if list.is_empty() {
            subscribers.remove(name);
        }
        removed
    }

    /// Number of handlers subscribed to `name`.
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Receiver of every event emitted from now on.
    pub fn tap(&self) -> broadcast::Receiver<Event> {
        self.live.subscribe()
    }

    /// The last `count` events, oldest first.
    pub fn get_recent_events(&self, count: usize) -> Vec<Event> {
        let history = self.lock_history();
        let skip = history.len().saturating_sub(count);
        history.iter().skip(skip).cloned().collect()
    }

    /// All recorded events from `source`, oldest first.
    pub fn get_events_by_source(&self, source: &str) -> Vec<Event> {
        self.lock_history()
            .iter()
            .filter(|e| e.source == source)
            .cloned()
            .collect()
    }

    pub fn history_len(&self) -> usize {
        self.lock_history().len()
    }

    /// Waits until every delivery scheduled so far has finished.
    ///
    /// Concurrent callers take turns, so no caller can reopen the tracker
    /// while another is still draining it.
    pub async fn wait_idle(&self) {
        let _turn = self.idle.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENT_HISTORY)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("history", &self.history_len())
            .field("max_history", &self.max_history)
            .field("in_flight", &self.tracker.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counter(bus: &EventBus, name: &str) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        bus.subscribe_fn(name, move |_event| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        count
    }

    #[tokio::test]
    async fn test_delivery_by_name() {
        let bus = EventBus::new(10);
        let uploads = counter(&bus, "file.uploaded");
        let deletes = counter(&bus, "file.deleted");

        let event = bus.emit("file.uploaded", "onedrive", json!({"file_id": "f"}));
        bus.wait_idle().await;

        assert_eq!(event.name, "file.uploaded");
        assert_eq!(uploads.load(Ordering::SeqCst), 1);
        assert_eq!(deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failing_and_panicking_subscribers_are_isolated() {
        let bus = EventBus::new(10);

        bus.subscribe_fn("x", |_event| async move {
            Err::<(), HandlerError>("handler failed".into())
        });
        bus.subscribe_fn("x", |_event| async move {
            panic!("handler panicked");
            #[allow(unreachable_code)]
            Ok(())
        });
        let healthy = counter(&bus, "x");

        bus.emit("x", "test", Value::Null);
        bus.emit("x", "test", Value::Null);
        bus.wait_idle().await;

        assert_eq!(healthy.load(Ordering::SeqCst), 2);
        assert_eq!(bus.history_len(), 2);
    }

    #[tokio::test]
    async fn test_history_is_bounded_fifo() {
        let bus = EventBus::new(3);
        for i in 0..5 {
            bus.emit("tick", "clock", json!(i));
        }

        let recent = bus.get_recent_events(10);
        let values: Vec<Value> = recent.iter().map(|e| e.data.clone()).collect();
        assert_eq!(values, vec![json!(2), json!(3), json!(4)]);

        let last_two = bus.get_recent_events(2);
        assert_eq!(last_two[0].data, json!(3));
        assert_eq!(last_two[1].data, json!(4));
    }

    #[tokio::test]
    async fn test_events_by_source() {
        let bus = EventBus::new(10);
        bus.emit("a", "wf-1", Value::Null);
        bus.emit("b", "wf-2", Value::Null);
        bus.emit("c", "wf-1", Value::Null);

        let names: Vec<String> = bus
            .get_events_by_source("wf-1")
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = EventBus::new(10);
        let id = bus.subscribe_fn("x", |_event| async move { Ok(()) });
        assert_eq!(bus.subscriber_count("x"), 1);

        assert!(bus.unsubscribe("x", id));
        assert!(!bus.unsubscribe("x", id));
        assert_eq!(bus.subscriber_count("x"), 0);
    }

    #[tokio::test]
    async fn test_tap_sees_every_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.tap();

        bus.emit("one", "s", Value::Null);
        bus.emit("two", "s", Value::Null);

        assert_eq!(rx.recv().await.unwrap().name, "one");
        assert_eq!(rx.recv().await.unwrap().name, "two");
    }

    #[test]
    fn test_emit_without_runtime_records_event() {
        let bus = EventBus::new(10);
        bus.subscribe_fn("x", |_event| async move { Ok(()) });

        bus.emit("x", "sync", Value::Null);
        assert_eq!(bus.history_len(), 1);
        assert!(format!("{bus:?}").contains("EventBus"));
    }

    #[tokio::test]
    async fn test_wait_idle_is_reusable() {
        let bus = EventBus::new(10);
        let count = counter(&bus, "x");

        bus.emit("x", "s", Value::Null);
        bus.wait_idle().await;
        bus.emit("x", "s", Value::Null);
        bus.wait_idle().await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_wait_idle_callers_all_return() {
        let bus = EventBus::new(10);
        let done = Arc::new(AtomicUsize::new(0));
        {
            let done = Arc::clone(&done);
            bus.subscribe_fn("slow", move |_event| {
                let done = Arc::clone(&done);
                async move {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        bus.emit("slow", "s", Value::Null);
        let drained = tokio::time::timeout(Duration::from_secs(2), async {
            tokio::join!(bus.wait_idle(), bus.wait_idle(), bus.wait_idle());
        })
        .await;

        assert!(drained.is_ok());
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_history_keeps_latest_event() {
        let bus = EventBus::new(0);
        bus.emit("a", "s", Value::Null);
        bus.emit("b", "s", Value::Null);

        assert_eq!(bus.history_len(), 1);
        assert_eq!(bus.get_recent_events(5)[0].name, "b");
    }
}
