//! In-process event bus.
//!
//! A [`Topic`] delivers every emitted value to the handlers registered at
//! that moment, synchronously and in registration order. A handler that
//! returns an error or panics is logged and skipped; the remaining handlers
//! and the publisher are unaffected. Nothing is queued: values emitted while
//! a topic has no subscribers are dropped.
//!
//! A [`RequestTopic`] is a trigger with no payload. Its single producer
//! recomputes the current value asynchronously and emits it on the
//! associated response topic.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dnp_common::events::{
    AutoUpdateData, ChainData, DiskUsage, PackageNotification, ProgressLog, UserActionLog,
};
use dnp_common::{DnpResult, PackageContainer};
use dnp_nat::ReconcileReport;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Error a handler may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type Handler<T> = Arc<dyn Fn(&T) -> Result<(), HandlerError> + Send + Sync>;

type Producer<T> = Arc<dyn Fn() -> BoxFuture<'static, DnpResult<T>> + Send + Sync>;

/// Identifies a handler registration, for [`Topic::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Broadcast channel for values of one type.
pub struct Topic<T> {
    name: &'static str,
    handlers: RwLock<Vec<(SubscriptionId, Handler<T>)>>,
    next_id: AtomicU64,
}

impl<T> Topic<T> {
    /// Create a topic without subscribers.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Topic name, used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Register a handler.
    ///
    /// Safe to call from inside another handler of the same topic; the new
    /// handler receives values from the next emit on.
    pub fn on<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        tracing::trace!(topic = self.name, "Subscribed");
        id
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        before != handlers.len()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Deliver `value` to every current handler.
    ///
    /// Returns the number of handlers that accepted the value.
    pub fn emit(&self, value: T) -> usize {
        let snapshot: Vec<Handler<T>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        let mut delivered = 0;
        for handler in snapshot {
            match std::panic::catch_unwind(AssertUnwindSafe(|| handler(&value))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::error!(topic = self.name, error = %e, "Subscriber failed");
                }
                Err(_) => {
                    tracing::error!(topic = self.name, "Subscriber panicked");
                }
            }
        }
        delivered
    }
}

impl<T> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[derive(Debug, Default)]
struct RequestState {
    running: bool,
    pending: bool,
}

/// Payload-less trigger answered on a response topic.
///
/// Triggers that arrive while a recomputation is running collapse into a
/// single follow-up recomputation.
pub struct RequestTopic<T> {
    name: &'static str,
    response: Arc<Topic<T>>,
    producer: RwLock<Option<Producer<T>>>,
    state: Arc<Mutex<RequestState>>,
}

impl<T: Send + 'static> RequestTopic<T> {
    /// Create a request topic answered on `response`.
    #[must_use]
    pub fn new(name: &'static str, response: Arc<Topic<T>>) -> Self {
        Self {
            name,
            response,
            producer: RwLock::new(None),
            state: Arc::new(Mutex::new(RequestState::default())),
        }
    }

    /// Topic the answers are emitted on.
    #[must_use]
    pub fn response(&self) -> &Arc<Topic<T>> {
        &self.response
    }

    /// Install the producer, replacing any previous one.
    pub fn respond_with<F, Fut>(&self, producer: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DnpResult<T>> + Send + 'static,
    {
        let producer: Producer<T> = Arc::new(move || producer().boxed());
        *self.producer.write() = Some(producer);
    }

    /// Request a recomputation.
    ///
    /// Must be called from within a tokio runtime. Returns the handle of the
    /// spawned recomputation, or `None` when the trigger was folded into one
    /// already running or no producer is installed.
    pub fn trigger(&self) -> Option<JoinHandle<()>> {
        let Some(producer) = self.producer.read().clone() else {
            tracing::warn!(topic = self.name, "Request without producer dropped");
            return None;
        };

        {
            let mut state = self.state.lock();
            if state.running {
                state.pending = true;
                tracing::trace!(topic = self.name, "Request coalesced");
                return None;
            }
            state.running = true;
        }

        let name = self.name;
        let response = Arc::clone(&self.response);
        let state = Arc::clone(&self.state);
        Some(tokio::spawn(async move {
            loop {
                match AssertUnwindSafe(producer()).catch_unwind().await {
                    Ok(Ok(value)) => {
                        response.emit(value);
                    }
                    Ok(Err(e)) => {
                        tracing::error!(topic = name, error = %e, "Request producer failed");
                    }
                    Err(_) => {
                        tracing::error!(topic = name, "Request producer panicked");
                    }
                }

                let again = {
                    let mut guard = state.lock();
                    guard.running = guard.pending;
                    std::mem::take(&mut guard.pending)
                };
                if !again {
                    break;
                }
            }
        }))
    }
}

impl<T> fmt::Debug for RequestTopic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTopic")
            .field("name", &self.name)
            .field("response", &self.response.name())
            .finish_non_exhaustive()
    }
}

/// Every topic of the daemon.
///
/// Built once at startup and handed to the components that publish or
/// subscribe.
#[derive(Debug)]
pub struct EventBus {
    /// Current package inventory.
    pub packages: Arc<Topic<Vec<PackageContainer>>>,
    /// Asks for a fresh inventory on `packages`.
    pub request_packages: RequestTopic<Vec<PackageContainer>>,
    /// Pending updates and settings.
    pub auto_update_data: Arc<Topic<AutoUpdateData>>,
    /// Asks for fresh data on `auto_update_data`.
    pub request_auto_update_data: RequestTopic<AutoUpdateData>,
    /// Sync status of every configured chain.
    pub chain_data: Topic<Vec<ChainData>>,
    /// Progress of long running operations.
    pub log_ui: Topic<ProgressLog>,
    /// Actions performed for the user.
    pub log_user_action: Topic<UserActionLog>,
    /// User notifications.
    pub notification: Topic<PackageNotification>,
    /// Outcome of each NAT reconciliation.
    pub port_mappings: Topic<ReconcileReport>,
    /// Filesystem usage samples.
    pub disk_usage: Topic<DiskUsage>,
}

impl EventBus {
    /// Create a bus with no subscribers and no producers.
    #[must_use]
    pub fn new() -> Self {
        let packages = Arc::new(Topic::new("packages"));
        let auto_update_data = Arc::new(Topic::new("auto_update_data"));
        Self {
            request_packages: RequestTopic::new("request_packages", Arc::clone(&packages)),
            packages,
            request_auto_update_data: RequestTopic::new(
                "request_auto_update_data",
                Arc::clone(&auto_update_data),
            ),
            auto_update_data,
            chain_data: Topic::new("chain_data"),
            log_ui: Topic::new("log_ui"),
            log_user_action: Topic::new("log_user_action"),
            notification: Topic::new("notification"),
            port_mappings: Topic::new("port_mappings"),
            disk_usage: Topic::new("disk_usage"),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
