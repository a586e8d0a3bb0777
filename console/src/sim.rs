//! In-process stand-in for the robot's command executor
//!
//! Each command channel runs a worker thread that executes one goal at a time, a newer goal
//! preempts the running one. Drive motions and the autonomous mission run until they are
//! replaced or cancelled, everything else finishes after a fixed delay.

use crate::channel::{CommandChannel, GoalBook, GoalHandle, ServiceChannel};
use common::service::{Service, ServiceRequest, ServiceResponse};
use common::status::{StatusCode, StatusEvent};
use common::types::{ChannelError, ChannelKind, CommandCode, Goal, GoalId, GoalState};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use fxhash::FxHashMap as HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, span, trace, Level};

pub type StatusSink = Arc<dyn Fn(StatusEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimTiming {
    /// How long one-shot actions like digging take
    pub action: Duration,
    /// Length of a mission once `start_mission` is called
    pub mission: Duration,
}

impl Default for SimTiming {
    fn default() -> Self {
        Self {
            action: Duration::from_secs(1),
            mission: Duration::from_secs(10 * 60),
        }
    }
}

impl SimTiming {
    /// `None` runs until preempted or cancelled
    fn run_time(&self, goal: Goal) -> Option<Duration> {
        match goal {
            Goal::Autonomous => None,
            Goal::Teleop(CommandCode::StopDrivebase) => Some(Duration::ZERO),
            Goal::Teleop(code) if code.is_drive() => None,
            Goal::Teleop(_) => Some(self.action),
        }
    }
}

pub struct SimExecutor {
    teleop: Arc<SimChannel>,
    autonomy: Arc<SimChannel>,
    services: Arc<SimServices>,
}

impl SimExecutor {
    pub fn start(
        timing: SimTiming,
        status: impl Fn(StatusEvent) + Send + Sync + 'static,
    ) -> io::Result<Self> {
        let status: StatusSink = Arc::new(status);

        Ok(Self {
            teleop: SimChannel::spawn(ChannelKind::Teleop, timing, status.clone())?,
            autonomy: SimChannel::spawn(ChannelKind::Autonomy, timing, status.clone())?,
            services: Arc::new(SimServices::new(timing.mission, status)),
        })
    }

    pub fn teleop(&self) -> Arc<SimChannel> {
        self.teleop.clone()
    }

    pub fn autonomy(&self) -> Arc<SimChannel> {
        self.autonomy.clone()
    }

    pub fn services(&self) -> Arc<SimServices> {
        self.services.clone()
    }
}

enum Work {
    Start(GoalId, Goal),
    CancelAll,
    Shutdown,
}

pub struct SimChannel {
    book: Arc<GoalBook>,
    work: Sender<Work>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimChannel {
    pub fn spawn(kind: ChannelKind, timing: SimTiming, status: StatusSink) -> io::Result<Arc<Self>> {
        let book = Arc::new(GoalBook::new(kind));
        let (work, queued) = channel::unbounded();

        let worker = {
            let book = book.clone();
            thread::Builder::new()
                .name(format!("sim-{kind:?}").to_lowercase())
                .spawn(move || run_channel(book, queued, timing, status))?
        };

        Ok(Arc::new(Self {
            book,
            work,
            worker: Mutex::new(Some(worker)),
        }))
    }

    /// Goals the executor has not finished yet
    pub fn outstanding(&self) -> Vec<GoalId> {
        self.book.outstanding()
    }

    fn queue(&self, work: Work) -> Result<(), ChannelError> {
        self.work.send(work).map_err(|_| ChannelError::Disconnected)
    }
}

impl CommandChannel for SimChannel {
    fn kind(&self) -> ChannelKind {
        self.book.kind()
    }

    fn submit(&self, goal: Goal) -> Result<GoalHandle, ChannelError> {
        let handle = self.book.open(goal);
        if let Err(err) = self.queue(Work::Start(handle.id(), goal)) {
            self.book.update(handle.id(), GoalState::Aborted);
            return Err(err);
        }

        Ok(handle)
    }

    fn cancel_all(&self) -> Result<(), ChannelError> {
        self.queue(Work::CancelAll)
    }

    fn is_idle(&self) -> bool {
        self.book.is_idle()
    }
}

impl Drop for SimChannel {
    fn drop(&mut self) {
        let _ = self.work.send(Work::Shutdown);
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(worker) = worker {
            let _ = worker.join();
        }
    }
}

struct Running {
    id: GoalId,
    goal: Goal,
    deadline: Option<Instant>,
}

fn run_channel(book: Arc<GoalBook>, queued: Receiver<Work>, timing: SimTiming, status: StatusSink) {
    let kind = book.kind();
    let _span = span!(Level::INFO, "Simulated channel", ?kind).entered();

    let mut running: Option<Running> = None;

    loop {
        let deadline = running.as_ref().and_then(|it| it.deadline);
        let work = match deadline {
            Some(deadline) => match queued.recv_deadline(deadline) {
                Ok(work) => work,
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(done) = running.take() {
                        finish(&book, &status, done, GoalState::Succeeded);
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match queued.recv() {
                Ok(work) => work,
                Err(_) => break,
            },
        };

        match work {
            Work::Start(id, goal) => {
                if let Some(previous) = running.take() {
                    finish(&book, &status, previous, GoalState::Preempted);
                }

                book.update(id, GoalState::Active);
                started(&status, goal);

                let next = Running {
                    id,
                    goal,
                    deadline: None,
                };
                match timing.run_time(goal) {
                    Some(run_time) if run_time.is_zero() => {
                        finish(&book, &status, next, GoalState::Succeeded);
                    }
                    Some(run_time) => {
                        running = Some(Running {
                            deadline: Some(Instant::now() + run_time),
                            ..next
                        });
                    }
                    None => running = Some(next),
                }
            }
            Work::CancelAll => {
                if let Some(cancelled) = running.take() {
                    finish(&book, &status, cancelled, GoalState::Cancelled);
                }
            }
            Work::Shutdown => break,
        }
    }

    let aborted = book.finish_all(GoalState::Aborted);
    debug!(aborted, "Simulated channel stopped");
}

fn started(status: &StatusSink, goal: Goal) {
    match goal {
        Goal::Autonomous => (status)(StatusEvent::new(StatusCode::NavigationStarted, Vec::new())),
        Goal::Teleop(CommandCode::Dig) => {
            (status)(StatusEvent::new(StatusCode::DiggingStarted, Vec::new()))
        }
        Goal::Teleop(CommandCode::Dump) => {
            (status)(StatusEvent::new(StatusCode::DumpingStarted, Vec::new()))
        }
        Goal::Teleop(code) => {
            (status)(StatusEvent::new(StatusCode::TeleopCommand, format!("{code:?}")))
        }
    }
}

fn finish(book: &GoalBook, status: &StatusSink, done: Running, state: GoalState) {
    trace!(id = %done.id, ?state, "Goal finished");
    book.update(done.id, state);

    if state != GoalState::Succeeded {
        return;
    }

    let code = match done.goal {
        Goal::Teleop(CommandCode::Dig) => StatusCode::DiggingFinished,
        Goal::Teleop(CommandCode::Dump) => StatusCode::DumpingFinished,
        Goal::Autonomous => StatusCode::MissionFinished,
        _ => return,
    };
    (status)(StatusEvent::new(code, Vec::new()));
}

/// The executor's service table
pub struct SimServices {
    mission: Duration,
    started: Mutex<Option<Instant>>,
    failures: Mutex<HashMap<Service, u32>>,
    calls: Mutex<Vec<(Service, ServiceRequest)>>,
    status: StatusSink,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimServices {
    pub fn new(mission: Duration, status: StatusSink) -> Self {
        Self {
            mission,
            started: Mutex::new(None),
            failures: Mutex::default(),
            calls: Mutex::default(),
            status,
        }
    }

    /// Makes the next `times` calls to `service` time out
    pub fn fail_next(&self, service: Service, times: u32) {
        *lock(&self.failures).entry(service).or_default() += times;
    }

    /// Every call received so far, failed ones included
    pub fn calls(&self) -> Vec<(Service, ServiceRequest)> {
        lock(&self.calls).clone()
    }

    pub fn time_remaining(&self) -> Duration {
        match *lock(&self.started) {
            Some(started) => self.mission.saturating_sub(started.elapsed()),
            None => self.mission,
        }
    }

    fn toggle(
        &self,
        code: StatusCode,
        request: &ServiceRequest,
    ) -> Result<ServiceResponse, ChannelError> {
        let ServiceRequest::SetBool(enabled) = request else {
            return Err(ChannelError::Rejected(format!(
                "Expected a SetBool request, got {request:?}"
            )));
        };

        let state = if *enabled { "on" } else { "off" };
        (self.status)(StatusEvent::new(code, state));

        Ok(ServiceResponse::SetBool {
            success: true,
            message: state.to_owned(),
        })
    }
}

impl ServiceChannel for SimServices {
    fn call(
        &self,
        service: Service,
        request: ServiceRequest,
    ) -> Result<ServiceResponse, ChannelError> {
        lock(&self.calls).push((service, request.clone()));

        if let Some(remaining) = lock(&self.failures).get_mut(&service) {
            if *remaining > 0 {
                *remaining -= 1;
                trace!(%service, "Injected failure");
                return Err(ChannelError::Timeout(service.name()));
            }
        }

        match service {
            Service::ToggleControl => self.toggle(StatusCode::ControlToggled, &request),
            Service::ToggleMotors => self.toggle(StatusCode::MotorsToggled, &request),
            Service::ZeroTurntable => Ok(ServiceResponse::Empty),
            Service::StartMission => {
                *lock(&self.started) = Some(Instant::now());
                (self.status)(StatusEvent::new(StatusCode::SystemStarted, Vec::new()));
                Ok(ServiceResponse::Empty)
            }
            Service::TimeRemaining => Ok(ServiceResponse::Duration(self.time_remaining())),
        }
    }
}
