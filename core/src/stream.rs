//! Long-poll stream dispatcher.
//!
//! One [`StreamDispatcher`] owns a backend session and a single poll loop.
//! Every batch the backend returns is regrouped by the [`dispatch`] module
//! and published to the [`SubscriberRegistry`].
//!
//! Failure policy:
//! - 404 on poll: the session is gone, a new one is requested silently
//! - 401 on poll: reported, the loop stops until `initialize` is called again
//! - anything else: reported, then a new session is requested
//!
//! [`dispatch`]: crate::dispatch

use crate::backend::StreamBackend;
use crate::channel::{ChannelKey, Scope};
use crate::config::KEEP_ALIVE_STATUS;
use crate::dispatch::{self, DispatchReport};
use crate::event::UpdateEvent;
use crate::keepalive::{AlwaysKeepAlive, KeepAlive};
use crate::notify::{Notifier, TracingNotifier};
use crate::registry::{SubscriberRegistry, Subscription};
use crate::stats::{Counters, DispatchStats};
use crate::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Source name used for notifications.
pub const NOTIFY_SOURCE: &str = "stream";

/// Why a poll call returned without issuing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoSession,
    InFlight,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The batch was dispatched; keep polling.
    Delivered { status: u16, report: DispatchReport },
    /// The session changed while the request was out; the answer was dropped.
    Superseded,
    /// The session must be replaced before polling again.
    Renew,
    /// Fatal for the loop (unauthorized).
    Stop,
    /// Guard tripped; nothing was sent.
    Skipped(SkipReason),
}

#[derive(Debug, Default)]
struct Session {
    id: Option<String>,
    /// Bumped whenever the session is reset; polls carry the value they
    /// started with and are discarded if it moved.
    generation: u64,
}

/// Clears the in-flight flag however the poll future ends.
struct FlightGuard<'a>(&'a StreamDispatcher);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
        self.0.idle.notify_waiters();
    }
}

/// Releases the keep-alive slot when the prompt task ends, even if aborted.
struct PromptGuard(Arc<AtomicBool>);

impl Drop for PromptGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct StreamDispatcher {
    backend: Arc<dyn StreamBackend>,
    registry: SubscriberRegistry,
    notifier: Arc<dyn Notifier>,
    keep_alive: Arc<dyn KeepAlive>,
    keep_alive_status: u16,

    session: Mutex<Session>,
    in_flight: AtomicBool,
    running: AtomicBool,
    /// Set while a keep-alive prompt is open; further 220s are ignored.
    prompting: Arc<AtomicBool>,
    idle: Notify,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,

    counters: Counters,
}

impl StreamDispatcher {
    pub fn new(backend: Arc<dyn StreamBackend>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            backend,
            registry: SubscriberRegistry::new(),
            notifier: Arc::new(TracingNotifier),
            keep_alive: Arc::new(AlwaysKeepAlive),
            keep_alive_status: KEEP_ALIVE_STATUS,
            session: Mutex::new(Session::default()),
            in_flight: AtomicBool::new(false),
            running: AtomicBool::new(false),
            prompting: Arc::new(AtomicBool::new(false)),
            idle: Notify::new(),
            shutdown,
            task: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    pub fn with_registry(mut self, registry: SubscriberRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Arc<dyn KeepAlive>) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_keep_alive_status(mut self, status: u16) -> Self {
        self.keep_alive_status = status;
        self
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session_id(&self) -> Option<String> {
        self.session().id.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Registers `callback` on `(root, object_type)`.
    pub fn add_subscriber<F>(&self, root: Scope, object_type: Scope, callback: F) -> Subscription
    where
        F: Fn(&[UpdateEvent]) + Send + Sync + 'static,
    {
        self.registry
            .subscribe(ChannelKey::new(root, object_type), callback)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session().generation == generation
    }

    fn reset_session(&self) {
        let mut session = self.session();
        session.id = None;
        session.generation = session.generation.wrapping_add(1);
    }

    /// Drops the current session, acquires a new one and makes sure the
    /// poll loop is running.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        self.reset_session();
        self.request_session().await?;
        self.ensure_running();
        Ok(())
    }

    /// Asks the backend for a session unless one is already held.
    ///
    /// Failures are reported and returned; there is no retry.
    pub async fn request_session(&self) -> Result<()> {
        let generation = {
            let session = self.session();
            if session.id.is_some() {
                return Ok(());
            }
            session.generation
        };

        match self.backend.create_session().await {
            Ok(id) => {
                let mut session = self.session();
                if session.generation != generation || session.id.is_some() {
                    debug!(target: "stream", "Discarding session created for a superseded request");
                    return Ok(());
                }
                info!(target: "stream", session = %id, "Stream session acquired");
                session.id = Some(id);
                Counters::incr(&self.counters.sessions_created);
                Ok(())
            }
            Err(e) => {
                warn!(target: "stream", error = %e, "Failed to acquire stream session");
                self.notifier.report(NOTIFY_SOURCE, &e.message(), e.status());
                Err(e)
            }
        }
    }

    /// Runs one poll cycle.
    ///
    /// Returns immediately when there is no session or another poll is
    /// already waiting on the backend.
    pub async fn poll(&self) -> PollOutcome {
        let (session_id, generation) = {
            let session = self.session();
            match &session.id {
                Some(id) => (id.clone(), session.generation),
                None => return PollOutcome::Skipped(SkipReason::NoSession),
            }
        };

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return PollOutcome::Skipped(SkipReason::InFlight);
        }
        let flight = FlightGuard(self);

        Counters::incr(&self.counters.polls);
        let result = self.backend.poll(&session_id).await;
        drop(flight);

        if !self.is_current(generation) {
            Counters::incr(&self.counters.superseded_responses);
            debug!(target: "stream", session = %session_id, "Dropping response of superseded session");
            return PollOutcome::Superseded;
        }

        match result {
            Ok(response) => {
                let report = self.dispatch(&response.events);
                if response.status == self.keep_alive_status {
                    self.spawn_keep_alive();
                }
                PollOutcome::Delivered {
                    status: response.status,
                    report,
                }
            }
            Err(e) => match e.status() {
                Some(404) => {
                    debug!(target: "stream", session = %session_id, "Stream session expired on server");
                    PollOutcome::Renew
                }
                Some(401) => {
                    warn!(target: "stream", "Unauthorized; stopping live updates");
                    {
                        let mut session = self.session();
                        if session.generation == generation {
                            session.id = None;
                        }
                    }
                    self.notifier.report(NOTIFY_SOURCE, &e.message(), e.status());
                    PollOutcome::Stop
                }
                _ => {
                    warn!(target: "stream", error = %e, "Poll failed");
                    self.notifier.report(NOTIFY_SOURCE, &e.message(), e.status());
                    PollOutcome::Renew
                }
            },
        }
    }

    /// Publishes `batch` on every derived channel.
    pub fn dispatch(&self, batch: &[UpdateEvent]) -> DispatchReport {
        if batch.is_empty() {
            Counters::incr(&self.counters.empty_batches);
            return DispatchReport::default();
        }
        Counters::incr(&self.counters.batches);
        Counters::add(&self.counters.events, batch.len() as u64);

        let report = dispatch::dispatch(&self.registry, batch);
        Counters::add(&self.counters.slices_published, report.published);
        Counters::add(&self.counters.deliveries, report.deliveries);
        Counters::add(&self.counters.callback_panics, report.panics);
        report
    }

    fn spawn_keep_alive(&self) {
        if self
            .prompting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(target: "stream", "Keep-alive prompt already open");
            return;
        }
        let slot = PromptGuard(Arc::clone(&self.prompting));
        Counters::incr(&self.counters.keep_alive_prompts);
        let keep_alive = Arc::clone(&self.keep_alive);
        let backend = Arc::clone(&self.backend);
        let notifier = Arc::clone(&self.notifier);
        info!(target: "stream", "Session is about to expire");

        tokio::spawn(async move {
            let _slot = slot;
            if !keep_alive.prompt().await {
                return;
            }
            if let Err(e) = backend.refresh_user().await {
                notifier.report(NOTIFY_SOURCE, &e.message(), e.status());
            }
        });
    }

    async fn renew(&self) -> Result<()> {
        Counters::incr(&self.counters.session_renewals);
        self.reset_session();
        self.request_session().await
    }

    fn ensure_running(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.shutdown.send_replace(false);
        let handle = tokio::spawn(Arc::clone(self).run());
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// The poll loop. Normally spawned by [`initialize`](Self::initialize).
    pub async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown.subscribe();
        info!(target: "stream", "Poll loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = tokio::select! {
                outcome = self.poll() => outcome,
                _ = shutdown.changed() => break,
            };

            match outcome {
                PollOutcome::Delivered { .. } | PollOutcome::Superseded => {}
                PollOutcome::Renew => {
                    let renewed = tokio::select! {
                        renewed = self.renew() => renewed,
                        _ = shutdown.changed() => break,
                    };
                    if renewed.is_err() {
                        break;
                    }
                }
                PollOutcome::Stop => break,
                PollOutcome::Skipped(SkipReason::InFlight) => {
                    let idle = self.idle.notified();
                    if self.is_polling() {
                        tokio::select! {
                            _ = idle => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                }
                PollOutcome::Skipped(SkipReason::NoSession) => break,
            }
        }

        self.running.store(false, Ordering::Release);
        info!(target: "stream", "Poll loop stopped");

        // An initialize that raced the exit saw `running` still set and did
        // not spawn; pick its session up here.
        if !*shutdown.borrow() && self.session().id.is_some() {
            debug!(target: "stream", "Session acquired while stopping; restarting poll loop");
            self.ensure_running();
        }
    }

    /// Stops the poll loop and waits for it to exit. A request still in
    /// flight is abandoned.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let handle = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(target: "stream", error = %e, "Poll loop task failed");
            }
        }
    }
}

impl std::fmt::Debug for StreamDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDispatcher")
            .field("session_id", &self.session_id())
            .field("polling", &self.is_polling())
            .field("running", &self.is_running())
            .field("registry", &self.registry)
            .finish()
    }
}
