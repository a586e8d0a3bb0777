//! Recording fakes for the coordinator's collaborators

#![allow(dead_code)]

use console::channel::{CommandChannel, GoalBook, GoalHandle, ServiceChannel};
use console::config::CoordinatorConfig;
use console::coordinator::Coordinator;
use console::panel::{ControlId, UiSurface};
use console::retry::RetryPolicy;
use common::service::{Service, ServiceRequest, ServiceResponse};
use common::types::{ChannelError, ChannelKind, CommandCode, Goal, GoalState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Submit(Goal),
    Cancel(ChannelKind),
    Call(Service, ServiceRequest),
    Enabled(ControlId, bool),
}

/// Everything the coordinator did, in order, plus a check of mutual exclusion after every step
pub struct Journal {
    teleop: GoalBook,
    autonomy: GoalBook,
    entries: Mutex<Vec<Entry>>,
    overlaps: AtomicUsize,
}

impl Journal {
    fn new() -> Self {
        Self {
            teleop: GoalBook::new(ChannelKind::Teleop),
            autonomy: GoalBook::new(ChannelKind::Autonomy),
            entries: Mutex::default(),
            overlaps: AtomicUsize::new(0),
        }
    }

    fn book(&self, kind: ChannelKind) -> &GoalBook {
        match kind {
            ChannelKind::Teleop => &self.teleop,
            ChannelKind::Autonomy => &self.autonomy,
        }
    }

    fn record(&self, entry: Entry) {
        self.entries.lock().expect("Lock").push(entry);
        self.check();
    }

    fn check(&self) {
        if !self.teleop.is_idle() && !self.autonomy.is_idle() {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.entries.lock().expect("Lock").clone()
    }

    pub fn clear(&self) {
        self.entries.lock().expect("Lock").clear();
    }

    /// Number of observed instants where both channels had outstanding goals
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self, kind: ChannelKind) -> usize {
        self.book(kind).outstanding().len()
    }

    pub fn submitted(&self, goal: Goal) -> usize {
        self.entries()
            .iter()
            .filter(|entry| **entry == Entry::Submit(goal))
            .count()
    }

    pub fn stops(&self) -> usize {
        self.submitted(Goal::Teleop(CommandCode::StopDrivebase))
    }

    pub fn position(&self, entry: &Entry) -> Option<usize> {
        self.entries().iter().position(|it| it == entry)
    }
}

/// Stops finish (after `stop_delay`), everything else runs until cancelled
pub struct FakeChannel {
    kind: ChannelKind,
    journal: Arc<Journal>,
    pub stop_delay: Mutex<Duration>,
    /// Cancels that are ignored before one takes effect
    pub cancel_lag: AtomicU32,
    pub offline: AtomicBool,
}

impl FakeChannel {
    fn new(kind: ChannelKind, journal: Arc<Journal>) -> Self {
        Self {
            kind,
            journal,
            stop_delay: Mutex::new(Duration::ZERO),
            cancel_lag: AtomicU32::new(0),
            offline: AtomicBool::new(false),
        }
    }
}

impl CommandChannel for FakeChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn submit(&self, goal: Goal) -> Result<GoalHandle, ChannelError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ChannelError::Disconnected);
        }

        let handle = self.journal.book(self.kind).open(goal);
        self.journal.book(self.kind).update(handle.id(), GoalState::Active);
        self.journal.record(Entry::Submit(goal));

        if goal == Goal::Teleop(CommandCode::StopDrivebase) {
            let delay = *self.stop_delay.lock().expect("Lock");
            if delay.is_zero() {
                self.journal.book(self.kind).update(handle.id(), GoalState::Succeeded);
            } else {
                let journal = self.journal.clone();
                let (kind, id) = (self.kind, handle.id());
                thread::spawn(move || {
                    thread::sleep(delay);
                    journal.book(kind).update(id, GoalState::Succeeded);
                });
            }
        }

        Ok(handle)
    }

    fn cancel_all(&self) -> Result<(), ChannelError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ChannelError::Disconnected);
        }

        self.journal.record(Entry::Cancel(self.kind));

        let lagging = self
            .cancel_lag
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |lag| lag.checked_sub(1))
            .is_ok();
        if !lagging {
            self.journal.book(self.kind).finish_all(GoalState::Cancelled);
        }

        Ok(())
    }

    fn is_idle(&self) -> bool {
        self.journal.book(self.kind).is_idle()
    }
}

/// Acknowledges everything unless told to fail or refuse
pub struct FakeServices {
    journal: Arc<Journal>,
    failures: Mutex<HashMap<Service, u32>>,
    refusals: Mutex<HashMap<Service, u32>>,
    pub delay: Mutex<Duration>,
    pub remaining: Mutex<Duration>,
}

impl FakeServices {
    fn new(journal: Arc<Journal>) -> Self {
        Self {
            journal,
            failures: Mutex::default(),
            refusals: Mutex::default(),
            delay: Mutex::new(Duration::ZERO),
            remaining: Mutex::new(Duration::from_secs(600)),
        }
    }

    /// The next `times` calls fail in transport
    pub fn fail_next(&self, service: Service, times: u32) {
        *self.failures.lock().expect("Lock").entry(service).or_default() += times;
    }

    /// The next `times` `SetBool` calls answer with `success: false`
    pub fn refuse_next(&self, service: Service, times: u32) {
        *self.refusals.lock().expect("Lock").entry(service).or_default() += times;
    }

    fn take(map: &Mutex<HashMap<Service, u32>>, service: Service) -> bool {
        let mut map = map.lock().expect("Lock");
        match map.get_mut(&service) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }
}

impl ServiceChannel for FakeServices {
    fn call(
        &self,
        service: Service,
        request: ServiceRequest,
    ) -> Result<ServiceResponse, ChannelError> {
        let delay = *self.delay.lock().expect("Lock");
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        self.journal.record(Entry::Call(service, request.clone()));

        if Self::take(&self.failures, service) {
            return Err(ChannelError::Timeout(service.name()));
        }

        match (service, request) {
            (Service::ToggleControl | Service::ToggleMotors, ServiceRequest::SetBool(_)) => {
                Ok(ServiceResponse::SetBool {
                    success: !Self::take(&self.refusals, service),
                    message: String::new(),
                })
            }
            (Service::TimeRemaining, _) => Ok(ServiceResponse::Duration(
                *self.remaining.lock().expect("Lock"),
            )),
            _ => Ok(ServiceResponse::Empty),
        }
    }
}

pub struct RecordingUi {
    journal: Arc<Journal>,
    enabled: Mutex<HashMap<ControlId, bool>>,
    pub remaining: Mutex<Option<Duration>>,
}

impl RecordingUi {
    pub fn is_enabled(&self, control: ControlId) -> Option<bool> {
        self.enabled.lock().expect("Lock").get(&control).copied()
    }
}

impl UiSurface for RecordingUi {
    fn set_enabled(&self, control: ControlId, enabled: bool) {
        self.enabled.lock().expect("Lock").insert(control, enabled);
        self.journal.record(Entry::Enabled(control, enabled));
    }

    fn show_time_remaining(&self, remaining: Duration) {
        *self.remaining.lock().expect("Lock") = Some(remaining);
    }
}

pub struct Rig {
    pub journal: Arc<Journal>,
    pub teleop: Arc<FakeChannel>,
    pub autonomy: Arc<FakeChannel>,
    pub services: Arc<FakeServices>,
    pub ui: Arc<RecordingUi>,
}

impl Rig {
    pub fn new() -> Self {
        let journal = Arc::new(Journal::new());

        Self {
            teleop: Arc::new(FakeChannel::new(ChannelKind::Teleop, journal.clone())),
            autonomy: Arc::new(FakeChannel::new(ChannelKind::Autonomy, journal.clone())),
            services: Arc::new(FakeServices::new(journal.clone())),
            ui: Arc::new(RecordingUi {
                journal: journal.clone(),
                enabled: Mutex::default(),
                remaining: Mutex::new(None),
            }),
            journal,
        }
    }

    pub fn coordinator(&self, config: CoordinatorConfig) -> Coordinator {
        Coordinator::new(
            self.teleop.clone(),
            self.autonomy.clone(),
            self.services.clone(),
            self.ui.clone(),
            config,
        )
        .expect("Create coordinator")
    }
}

/// No sleeping between retries, short watchdog
pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        watchdog_interval: Duration::from_millis(100),
        clock_interval: Duration::from_millis(10),
        toggle_retry: RetryPolicy::unbounded(Duration::ZERO),
        zero_retry: RetryPolicy::unbounded(Duration::ZERO),
        drain: RetryPolicy::unbounded(Duration::ZERO),
        drain_warn_every: 1000,
    }
}
