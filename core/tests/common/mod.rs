#![allow(dead_code)]

use async_trait::async_trait;
use hive_stream::{Notifier, PollResponse, Result, StreamBackend, StreamError, UpdateEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// What the scripted backend does for one poll call.
pub enum Step {
    Respond(Result<PollResponse>),
    /// Waits for the gate before answering.
    Gated(Arc<Notify>, Result<PollResponse>),
}

/// In-memory backend answering from a script.
///
/// Sessions are named `s1`, `s2`, ... unless a scripted failure is queued.
/// Once the poll script runs out, polls never complete.
#[derive(Default)]
pub struct ScriptedBackend {
    sessions: Mutex<VecDeque<Result<String>>>,
    polls: Mutex<VecDeque<Step>>,
    pub create_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub polled_sessions: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_session(&self, result: Result<String>) {
        self.sessions.lock().unwrap().push_back(result);
    }

    pub fn push_poll(&self, step: Step) {
        self.polls.lock().unwrap().push_back(step);
    }

    pub fn respond(&self, events: Vec<UpdateEvent>) {
        self.push_poll(Step::Respond(Ok(PollResponse::ok(events))));
    }

    pub fn respond_status(&self, status: u16, events: Vec<UpdateEvent>) {
        self.push_poll(Step::Respond(Ok(PollResponse { status, events })));
    }

    pub fn fail(&self, status: u16) {
        self.push_poll(Step::Respond(Err(status_error(status))));
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamBackend for ScriptedBackend {
    async fn create_session(&self) -> Result<String> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.sessions.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(format!("s{}", n)),
        }
    }

    async fn poll(&self, session_id: &str) -> Result<PollResponse> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        self.polled_sessions
            .lock()
            .unwrap()
            .push(session_id.to_string());
        let step = self.polls.lock().unwrap().pop_front();
        match step {
            Some(Step::Respond(result)) => result,
            Some(Step::Gated(gate, result)) => {
                gate.notified().await;
                result
            }
            None => std::future::pending().await,
        }
    }

    async fn refresh_user(&self) -> Result<()> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn status_error(status: u16) -> StreamError {
    StreamError::Status {
        status,
        body: format!("status {}", status),
    }
}

/// Notifier remembering every report.
#[derive(Default)]
pub struct RecordingNotifier {
    pub reports: Mutex<Vec<(String, String, Option<u16>)>>,
}

impl RecordingNotifier {
    pub fn statuses(&self) -> Vec<Option<u16>> {
        self.reports.lock().unwrap().iter().map(|r| r.2).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn report(&self, source: &str, message: &str, status: Option<u16>) {
        self.reports
            .lock()
            .unwrap()
            .push((source.to_string(), message.to_string(), status));
    }
}

/// Collects every slice delivered to a subscriber.
#[derive(Clone, Default)]
pub struct Collector {
    pub slices: Arc<Mutex<Vec<Vec<UpdateEvent>>>>,
}

impl Collector {
    pub fn callback(&self) -> impl Fn(&[UpdateEvent]) + Send + Sync + 'static {
        let slices = Arc::clone(&self.slices);
        move |events: &[UpdateEvent]| slices.lock().unwrap().push(events.to_vec())
    }

    pub fn invocations(&self) -> usize {
        self.slices.lock().unwrap().len()
    }

    pub fn events(&self) -> Vec<UpdateEvent> {
        self.slices.lock().unwrap().iter().flatten().cloned().collect()
    }
}

/// Polls `cond` until it holds or two seconds pass.
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn event(id: &str, root: &str, object_type: &str) -> UpdateEvent {
    UpdateEvent::new(root, object_type).with_id(id)
}
