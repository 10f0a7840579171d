//! Event fan-out: named handlers, one-shot waits and error reporting.
//!
//! `dispatch` never blocks on handlers. Each handler runs on its own task, so
//! a slow or failing handler cannot stall the gateway session or its
//! siblings. Failures (returned errors and panics alike) are routed to the
//! `on_error` handlers, or logged when there are none.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{BoxError, ClientError, HandlerError};

/// A named event and its payload, shared between every consumer.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub data: Arc<Value>,
}

impl Event {
    pub fn new(name: &str, data: Value) -> Self {
        Self {
            name: normalize(name),
            data: Arc::new(data),
        }
    }

    /// Decode the payload into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&*self.data)
    }
}

/// A handler invocation that did not complete successfully.
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    pub event: String,
    pub error: HandlerError,
}

type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
type ErrorHandler = Arc<dyn Fn(HandlerFailure) -> BoxFuture<'static, ()> + Send + Sync>;
type Predicate = Box<dyn Fn(&Event) -> bool + Send + Sync>;

struct PendingWait {
    id: u64,
    name: String,
    predicate: Predicate,
    slot: oneshot::Sender<Result<Event, ClientError>>,
}

/// `"on_guild_create"`, `"GUILD_CREATE"` and `"guild_create"` all name the
/// same event.
fn normalize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    match lower.strip_prefix("on_") {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
    error_handlers: Arc<RwLock<Vec<ErrorHandler>>>,
    waits: Mutex<Vec<PendingWait>>,
    next_wait: AtomicU64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("events", &self.handlers.read().keys().collect::<Vec<_>>())
            .field("pending_waits", &self.pending_waits())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `name`. Handlers for one event are started in
    /// registration order.
    pub fn on<F, Fut>(&self, name: &str, f: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |event: Event| f(event).boxed());
        self.handlers
            .write()
            .entry(normalize(name))
            .or_default()
            .push(handler);
    }

    pub fn on_error<F, Fut>(&self, f: F)
    where
        F: Fn(HandlerFailure) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: ErrorHandler = Arc::new(move |failure: HandlerFailure| f(failure).boxed());
        self.error_handlers.write().push(handler);
    }

    pub fn handler_count(&self, name: &str) -> usize {
        self.handlers
            .read()
            .get(&normalize(name))
            .map_or(0, Vec::len)
    }

    pub fn pending_waits(&self) -> usize {
        self.waits.lock().len()
    }

    /// Resolve matching waits, then start every handler for the event.
    pub fn dispatch(&self, name: &str, data: Value) {
        let event = Event::new(name, data);
        tracing::trace!(event = %event.name, "dispatch");

        self.resolve_waits(&event);

        let handlers = self
            .handlers
            .read()
            .get(&event.name)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(event = %event.name, "no async runtime; handlers skipped");
            return;
        };
        for handler in handlers {
            let error_handlers = Arc::clone(&self.error_handlers);
            let event = event.clone();
            runtime.spawn(run_handler(handler, event, error_handlers));
        }
    }

    /// Predicates run under the wait-list lock and must not call back into
    /// the dispatcher. A panicking predicate fails only its own wait.
    fn resolve_waits(&self, event: &Event) {
        let mut waits = self.waits.lock();
        let mut i = 0;
        while i < waits.len() {
            let wait = &waits[i];
            if wait.slot.is_closed() {
                waits.swap_remove(i);
                continue;
            }
            if wait.name != event.name {
                i += 1;
                continue;
            }
            match std::panic::catch_unwind(AssertUnwindSafe(|| (wait.predicate)(event))) {
                Ok(false) => i += 1,
                Ok(true) => {
                    let wait = waits.swap_remove(i);
                    let _ = wait.slot.send(Ok(event.clone()));
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::error!(event = %event.name, %message, "wait predicate panicked");
                    let wait = waits.swap_remove(i);
                    let _ = wait.slot.send(Err(ClientError::Predicate {
                        event: event.name.clone(),
                        message,
                    }));
                }
            }
        }
    }

    /// Suspend until an event named `name` satisfies `predicate`.
    ///
    /// Dropping the returned future withdraws the wait.
    pub async fn wait_for<P>(
        &self,
        name: &str,
        predicate: P,
        timeout: Duration,
    ) -> Result<Event, ClientError>
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let name = normalize(name);
        let id = self.next_wait.fetch_add(1, Ordering::Relaxed);
        let (slot, rx) = oneshot::channel();
        self.waits.lock().push(PendingWait {
            id,
            name: name.clone(),
            predicate: Box::new(predicate),
            slot,
        });
        let _guard = WaitGuard {
            waits: &self.waits,
            id,
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ClientError::Cancelled),
            Err(_) => Err(ClientError::WaitTimeout { event: name }),
        }
    }

    pub async fn wait_for_next(&self, name: &str, timeout: Duration) -> Result<Event, ClientError> {
        self.wait_for(name, |_| true, timeout).await
    }

    /// Fail every pending wait with [`ClientError::Cancelled`].
    pub fn cancel_all(&self) {
        let waits = std::mem::take(&mut *self.waits.lock());
        if !waits.is_empty() {
            tracing::debug!(count = waits.len(), "cancelling pending waits");
        }
        for wait in waits {
            let _ = wait.slot.send(Err(ClientError::Cancelled));
        }
    }
}

struct WaitGuard<'a> {
    waits: &'a Mutex<Vec<PendingWait>>,
    id: u64,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.waits.lock().retain(|w| w.id != self.id);
    }
}

async fn run_handler(
    handler: Handler,
    event: Event,
    error_handlers: Arc<RwLock<Vec<ErrorHandler>>>,
) {
    let name = event.name.clone();
    let outcome = AssertUnwindSafe(async move { handler(event).await })
        .catch_unwind()
        .await;

    let error = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(e)) => HandlerError::from(e),
        Err(panic) => HandlerError::Panicked(panic_message(panic.as_ref())),
    };
    let failure = HandlerFailure { event: name, error };

    let error_handlers = error_handlers.read().clone();
    if error_handlers.is_empty() {
        tracing::error!(event = %failure.event, error = %failure.error, "event handler failed");
        return;
    }
    for handler in error_handlers {
        let failure = failure.clone();
        let event = failure.event.clone();
        if AssertUnwindSafe(async move { handler(failure).await })
            .catch_unwind()
            .await
            .is_err()
        {
            tracing::error!(%event, "error handler panicked");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    async fn until_waits(dispatcher: &Dispatcher, n: usize) {
        while dispatcher.pending_waits() < n {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn names_are_normalized() {
        assert_eq!(normalize("on_guild_create"), "guild_create");
        assert_eq!(normalize("GUILD_CREATE"), "guild_create");
        assert_eq!(normalize("ready"), "ready");
    }

    #[tokio::test]
    async fn handlers_receive_events() {
        let dispatcher = Dispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatcher.on("on_message", move |event| {
            let tx = tx.clone();
            async move {
                tx.send(event.data["n"].as_u64())?;
                Ok::<(), BoxError>(())
            }
        });

        dispatcher.dispatch("MESSAGE", json!({ "n": 1 }));
        dispatcher.dispatch("message", json!({ "n": 2 }));
        dispatcher.dispatch("typing", json!({ "n": 3 }));

        assert_eq!(rx.recv().await, Some(Some(1)));
        assert_eq!(rx.recv().await, Some(Some(2)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wait_for_matches_predicate() {
        let dispatcher = Arc::new(Dispatcher::new());
        let waiter = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                d.wait_for(
                    "guild_create",
                    |e| e.data["id"] == "2",
                    Duration::from_secs(5),
                )
                .await
            })
        };
        until_waits(&dispatcher, 1).await;

        dispatcher.dispatch("GUILD_CREATE", json!({ "id": "1" }));
        assert_eq!(dispatcher.pending_waits(), 1);
        dispatcher.dispatch("GUILD_CREATE", json!({ "id": "2" }));

        let event = waiter.await.unwrap().unwrap();
        assert_eq!(event.name, "guild_create");
        assert_eq!(event.data["id"], "2");
        assert_eq!(dispatcher.pending_waits(), 0);
    }

    #[tokio::test]
    async fn concurrent_waits_resolve_independently() {
        let dispatcher = Arc::new(Dispatcher::new());
        let spawn_wait = |id: &'static str| {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                d.wait_for("member_add", move |e| e.data["id"] == id, Duration::from_secs(5))
                    .await
            })
        };
        let a = spawn_wait("a");
        let b = spawn_wait("b");
        let any = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move { d.wait_for_next("member_add", Duration::from_secs(5)).await })
        };
        until_waits(&dispatcher, 3).await;

        dispatcher.dispatch("member_add", json!({ "id": "b" }));
        assert_eq!(b.await.unwrap().unwrap().data["id"], "b");
        assert_eq!(any.await.unwrap().unwrap().data["id"], "b");
        assert_eq!(dispatcher.pending_waits(), 1);

        dispatcher.dispatch("member_add", json!({ "id": "a" }));
        assert_eq!(a.await.unwrap().unwrap().data["id"], "a");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_times_out() {
        let dispatcher = Dispatcher::new();
        let err = dispatcher
            .wait_for_next("ready", Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::WaitTimeout { ref event } if event == "ready"));
        assert_eq!(dispatcher.pending_waits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn event_after_deadline_misses_expired_wait() {
        let dispatcher = Arc::new(Dispatcher::new());
        let waiter = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move { d.wait_for_next("ready", Duration::from_secs(3)).await })
        };
        until_waits(&dispatcher, 1).await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(dispatcher.pending_waits(), 0);
        dispatcher.dispatch("ready", json!({ "late": true }));

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, ClientError::WaitTimeout { ref event } if event == "ready"));
    }

    #[tokio::test]
    async fn panicking_predicate_fails_only_its_wait() {
        let dispatcher = Arc::new(Dispatcher::new());
        let bad = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                d.wait_for(
                    "guild_create",
                    |_| panic!("predicate exploded"),
                    Duration::from_secs(5),
                )
                .await
            })
        };
        let good = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move { d.wait_for_next("guild_create", Duration::from_secs(5)).await })
        };
        until_waits(&dispatcher, 2).await;

        dispatcher.dispatch("GUILD_CREATE", json!({ "id": "1" }));

        let err = bad.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            ClientError::Predicate { ref event, ref message }
                if event == "guild_create" && message == "predicate exploded"
        ));
        assert_eq!(good.await.unwrap().unwrap().data["id"], "1");
        assert_eq!(dispatcher.pending_waits(), 0);
    }

    #[tokio::test]
    async fn dropped_wait_is_withdrawn() {
        let dispatcher = Arc::new(Dispatcher::new());
        let waiter = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move { d.wait_for_next("ready", Duration::from_secs(60)).await })
        };
        until_waits(&dispatcher, 1).await;
        waiter.abort();
        let _ = waiter.await;
        assert_eq!(dispatcher.pending_waits(), 0);
    }

    #[tokio::test]
    async fn cancel_all_fails_waits() {
        let dispatcher = Arc::new(Dispatcher::new());
        let waiter = {
            let d = Arc::clone(&dispatcher);
            tokio::spawn(async move { d.wait_for_next("ready", Duration::from_secs(60)).await })
        };
        until_waits(&dispatcher, 1).await;

        dispatcher.cancel_all();
        assert!(matches!(waiter.await.unwrap(), Err(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn failing_handler_is_isolated_and_reported() {
        let dispatcher = Dispatcher::new();
        let (ok_tx, mut ok_rx) = mpsc::unbounded_channel();
        let (err_tx, mut err_rx) = mpsc::unbounded_channel();

        async fn reject(_: Event) -> Result<(), BoxError> {
            Err("bad handler".into())
        }
        async fn explode(_: Event) -> Result<(), BoxError> {
            panic!("worse handler")
        }

        dispatcher.on("ready", reject);
        dispatcher.on("ready", explode);
        dispatcher.on("ready", move |_| {
            let tx = ok_tx.clone();
            async move {
                tx.send(())?;
                Ok::<(), BoxError>(())
            }
        });
        dispatcher.on_error(move |failure| {
            let tx = err_tx.clone();
            async move {
                let _ = tx.send(failure);
            }
        });

        dispatcher.dispatch("ready", Value::Null);

        assert_eq!(ok_rx.recv().await, Some(()));
        let mut messages = Vec::new();
        for _ in 0..2 {
            let failure = err_rx.recv().await.unwrap();
            assert_eq!(failure.event, "ready");
            messages.push(failure.error.to_string());
        }
        messages.sort();
        assert_eq!(messages, ["bad handler", "handler panicked: worse handler"]);
    }

    #[tokio::test]
    async fn panicking_error_handler_does_not_silence_the_rest() {
        let dispatcher = Dispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        async fn reject(_: Event) -> Result<(), BoxError> {
            Err("bad handler".into())
        }
        async fn explode(_: HandlerFailure) {
            panic!("sink exploded")
        }

        dispatcher.on("ready", reject);
        dispatcher.on_error(explode);
        dispatcher.on_error(move |failure| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(failure.event);
            }
        });

        dispatcher.dispatch("ready", Value::Null);
        assert_eq!(rx.recv().await.as_deref(), Some("ready"));
    }

    #[test]
    fn decode_typed_payload() {
        #[derive(serde::Deserialize)]
        struct Payload {
            id: String,
        }
        let event = Event::new("GUILD_CREATE", json!({ "id": "9" }));
        assert_eq!(event.decode::<Payload>().unwrap().id, "9");
    }
}
