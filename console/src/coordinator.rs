//! The mode coordinator, the single ordering authority between the operator and the robot
//!
//! Two locks are involved. The state lock guards `mode`, the toggles and the watchdog and is only
//! ever held for a few instructions by dispatch, watchdog expiry and the end of a transition. The
//! authority lock serializes transitions and toggles against each other and is held for their
//! whole (blocking) duration.

use crate::channel::{CommandChannel, GoalHandle, ServiceChannel};
use crate::clock::MissionClock;
use crate::config::CoordinatorConfig;
use crate::panel::{ControlId, UiSurface, AUTONOMY_CONTROLS, TELEOP_CONTROLS};
use crate::retry::Exhausted;
use crate::status_log::StatusLog;
use crate::watchdog::{Signal, Timer, Watchdog, WatchdogState};
use common::error::LogErrorExt;
use common::service::{Service, ServiceRequest};
use common::status::StatusEvent;
use common::types::{ChannelError, ChannelKind, CommandCode, Goal, GoalState, Mode};
use crossbeam::channel::Sender;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Command channel failed: {0}")]
    Channel(#[from] ChannelError),
    #[error("Gave up on {what} after {attempts} attempts")]
    RetriesExhausted { what: &'static str, attempts: u32 },
    #[error("Could not spawn the {0} thread")]
    Spawn(&'static str, #[source] io::Error),
}

/// Last acknowledged value of each toggle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToggleState {
    pub control_enabled: bool,
    pub motors_enabled: bool,
}

#[derive(Debug, Default)]
struct State {
    mode: Option<Mode>,
    toggles: ToggleState,
    watchdog: Watchdog,
    shut_down: bool,
}

struct Shared {
    teleop: Arc<dyn CommandChannel>,
    autonomy: Arc<dyn CommandChannel>,
    services: Arc<dyn ServiceChannel>,
    ui: Arc<dyn UiSurface>,
    config: CoordinatorConfig,

    state: Mutex<State>,
    authority: Mutex<()>,
    watchdog: Sender<Signal>,
}

pub struct Coordinator {
    shared: Arc<Shared>,
    clock: MissionClock,
    status: StatusLog,

    // Dropped after `shared` so the timer thread sees its sender disappear
    _timer: Timer,
}

impl Coordinator {
    pub fn new(
        teleop: Arc<dyn CommandChannel>,
        autonomy: Arc<dyn CommandChannel>,
        services: Arc<dyn ServiceChannel>,
        ui: Arc<dyn UiSurface>,
        config: CoordinatorConfig,
    ) -> Result<Self, CoordinatorError> {
        debug_assert_eq!(teleop.kind(), ChannelKind::Teleop);
        debug_assert_eq!(autonomy.kind(), ChannelKind::Autonomy);

        let target: Arc<OnceLock<Weak<Shared>>> = Arc::default();
        let (watchdog, timer) = Timer::spawn({
            let target = target.clone();
            move |generation| {
                if let Some(shared) = target.get().and_then(Weak::upgrade) {
                    shared.watchdog_expired(generation);
                }
            }
        })
        .map_err(|err| CoordinatorError::Spawn("motor watchdog", err))?;

        let shared = Arc::new(Shared {
            teleop,
            autonomy,
            services: services.clone(),
            ui: ui.clone(),
            config,
            state: Mutex::default(),
            authority: Mutex::new(()),
            watchdog,
        });
        let _ = target.set(Arc::downgrade(&shared));

        Ok(Self {
            shared,
            clock: MissionClock::new(services, ui, config.clock_interval),
            status: StatusLog::new(),
            _timer: timer,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.shared.config
    }

    /// `None` until a mission has been started
    pub fn mode(&self) -> Option<Mode> {
        self.shared.state().mode
    }

    pub fn toggles(&self) -> ToggleState {
        self.shared.state().toggles
    }

    pub fn watchdog(&self) -> WatchdogState {
        self.shared.state().watchdog.state()
    }

    pub fn status_log(&self) -> &StatusLog {
        &self.status
    }

    pub fn clock(&self) -> &MissionClock {
        &self.clock
    }

    /// Renders a status event into the log
    ///
    /// Never touches the coordinator's state so it can run next to a blocked transition
    pub fn on_status(&self, event: &StatusEvent) -> String {
        self.status.on_status(event)
    }

    /// Queues a teleop command, does not wait for it
    #[tracing::instrument(skip(self))]
    pub fn submit_teleop(&self, code: CommandCode) -> Result<GoalHandle, CoordinatorError> {
        let _state = self.shared.state();
        Ok(self.shared.teleop.submit(Goal::Teleop(code))?)
    }

    /// Queues the autonomous mission goal, does not wait for it
    #[tracing::instrument(skip(self))]
    pub fn submit_autonomous(&self) -> Result<GoalHandle, CoordinatorError> {
        Ok(self.shared.autonomy.submit(Goal::Autonomous)?)
    }

    /// A held drive key, submits the motion and (re)arms the watchdog
    #[tracing::instrument(skip(self))]
    pub fn drive(&self, code: CommandCode) -> Result<GoalHandle, CoordinatorError> {
        let mut state = self.shared.state();
        let handle = self.shared.teleop.submit(Goal::Teleop(code))?;

        let signal = state
            .watchdog
            .arm(Instant::now(), self.shared.config.watchdog_interval);
        self.shared.signal_watchdog(signal);

        Ok(handle)
    }

    /// A released drive control, stops the drivebase now instead of waiting for the watchdog
    #[tracing::instrument(skip(self))]
    pub fn release(&self) -> Result<GoalHandle, CoordinatorError> {
        let mut state = self.shared.state();
        if state.watchdog.disarm() {
            self.shared.signal_watchdog(Signal::Disarm);
        }

        Ok(self
            .shared
            .teleop
            .submit(Goal::Teleop(CommandCode::StopDrivebase))?)
    }

    /// Hands command authority to the autonomous executor
    #[tracing::instrument(skip(self))]
    pub fn enter_autonomous(&self) -> Result<(), CoordinatorError> {
        let _authority = self.shared.authority();
        self.shared.enter_autonomous()
    }

    /// Takes command authority back from the autonomous executor
    #[tracing::instrument(skip(self))]
    pub fn enter_teleop(&self) -> Result<(), CoordinatorError> {
        let _authority = self.shared.authority();
        self.shared.enter_teleop()
    }

    #[tracing::instrument(skip(self))]
    pub fn set_control(&self, enabled: bool) -> Result<(), CoordinatorError> {
        let _authority = self.shared.authority();
        self.shared.set_control(enabled)
    }

    #[tracing::instrument(skip(self))]
    pub fn set_motors(&self, enabled: bool) -> Result<(), CoordinatorError> {
        let _authority = self.shared.authority();
        self.shared.set_motors(enabled)
    }

    /// Starts the mission timer and clock, then enters `mode` with control and motors enabled
    #[tracing::instrument(skip(self))]
    pub fn start_mission(&self, mode: Mode) -> Result<(), CoordinatorError> {
        let _authority = self.shared.authority();
        info!("Starting mission");

        self.shared
            .services
            .call(Service::StartMission, ServiceRequest::Empty)
            .log_error("Could not start the mission timer");
        self.clock
            .start()
            .map_err(|err| CoordinatorError::Spawn("mission clock", err))?;

        self.shared.state().shut_down = false;

        match mode {
            Mode::Autonomous => self.shared.enter_autonomous()?,
            Mode::Teleop => self.shared.enter_teleop()?,
        }

        self.shared.set_control(true)?;
        self.shared.set_motors(true)?;

        info!(%mode, "Mission started");

        Ok(())
    }

    /// Stops the clock and the watchdog and cancels everything still running
    ///
    /// Does not wait for a transition in progress
    #[tracing::instrument(skip(self))]
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state();
            if state.shut_down {
                return;
            }
            state.shut_down = true;

            if state.watchdog.disarm() {
                self.shared.signal_watchdog(Signal::Disarm);
            }
        }

        info!("Shutting down coordinator");
        self.clock.stop();

        self.shared
            .autonomy
            .cancel_all()
            .log_warn("Could not cancel autonomy goals");
        self.shared
            .teleop
            .cancel_all()
            .log_warn("Could not cancel teleop goals");
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn authority(&self) -> MutexGuard<'_, ()> {
        self.authority
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Must be called with the state lock held so signals reach the timer in arm order
    fn signal_watchdog(&self, signal: Signal) {
        if self.watchdog.send(signal).is_err() {
            warn!("Motor watchdog thread is gone");
        }
    }

    fn watchdog_expired(&self, generation: u64) {
        let mut state = self.state();
        if !state.watchdog.expire(generation, Instant::now()) {
            trace!(generation, "Stale watchdog expiry");
            return;
        }

        debug!(generation, "Motor watchdog expired, stopping drivebase");
        self.teleop
            .submit(Goal::Teleop(CommandCode::StopDrivebase))
            .log_warn("Watchdog could not stop the drivebase");
    }

    fn enter_autonomous(&self) -> Result<(), CoordinatorError> {
        info!("Entering autonomous mode");

        if self.state().watchdog.disarm() {
            self.signal_watchdog(Signal::Disarm);
        }

        // A running mission is retired before any teleop goal goes out
        self.drain(&*self.autonomy)?;

        self.set_motors(false)?;
        self.zero_turntable()?;
        self.teleop
            .submit(Goal::Teleop(CommandCode::DrivingPosition))?;

        self.stop_and_wait()?;
        self.set_motors(true)?;

        self.set_surface(&AUTONOMY_CONTROLS, true);
        self.drain(&*self.teleop)?;
        self.autonomy.submit(Goal::Autonomous)?;
        self.set_surface(&TELEOP_CONTROLS, false);

        self.state().mode = Some(Mode::Autonomous);
        info!("Autonomous mode active");

        Ok(())
    }

    fn enter_teleop(&self) -> Result<(), CoordinatorError> {
        info!("Entering teleop mode");

        self.set_surface(&AUTONOMY_CONTROLS, false);
        if let Err(err) = self.drain(&*self.autonomy) {
            // Still autonomous, so the way back to teleop stays open
            if self.state().mode == Some(Mode::Autonomous) {
                self.set_surface(&AUTONOMY_CONTROLS, true);
            }
            return Err(err);
        }
        self.set_surface(&TELEOP_CONTROLS, true);
        self.stop_and_wait()?;

        self.state().mode = Some(Mode::Teleop);
        info!("Teleop mode active");

        Ok(())
    }

    fn set_control(&self, enabled: bool) -> Result<(), CoordinatorError> {
        self.toggle(Service::ToggleControl, enabled)?;
        self.state().toggles.control_enabled = enabled;

        self.ui.set_enabled(ControlId::ControlEnable, !enabled);
        self.ui.set_enabled(ControlId::ControlDisable, enabled);
        info!(enabled, "Control toggled");

        Ok(())
    }

    fn set_motors(&self, enabled: bool) -> Result<(), CoordinatorError> {
        self.toggle(Service::ToggleMotors, enabled)?;
        self.state().toggles.motors_enabled = enabled;

        self.ui.set_enabled(ControlId::MotorEnable, !enabled);
        self.ui.set_enabled(ControlId::MotorDisable, enabled);
        info!(enabled, "Motors toggled");

        Ok(())
    }

    /// Calls a `SetBool` service until the executor acknowledges it
    fn toggle(&self, service: Service, enabled: bool) -> Result<(), CoordinatorError> {
        self.config
            .toggle_retry
            .run(|attempt| {
                match self.services.call(service, ServiceRequest::SetBool(enabled)) {
                    Ok(response) if response.acknowledged() => Ok(()),
                    Ok(response) => {
                        debug!(attempt, ?response, "{service} not acknowledged");
                        Err(())
                    }
                    Err(err) => {
                        debug!(attempt, "{service} failed: {err}");
                        Err(())
                    }
                }
            })
            .map_err(|Exhausted { attempts, .. }| CoordinatorError::RetriesExhausted {
                what: service.name(),
                attempts,
            })
    }

    fn zero_turntable(&self) -> Result<(), CoordinatorError> {
        info!("Zeroing turntable");

        self.config
            .zero_retry
            .run(|attempt| {
                self.services
                    .call(Service::ZeroTurntable, ServiceRequest::Empty)
                    .map_err(|err| debug!(attempt, "Zeroing failed: {err}"))
            })
            .map(|_| ())
            .map_err(|Exhausted { attempts, .. }| CoordinatorError::RetriesExhausted {
                what: Service::ZeroTurntable.name(),
                attempts,
            })
    }

    /// Stops the drivebase and blocks until the executor is done with it
    fn stop_and_wait(&self) -> Result<GoalState, CoordinatorError> {
        let handle = {
            let _state = self.state();
            self.teleop
                .submit(Goal::Teleop(CommandCode::StopDrivebase))?
        };

        let state = handle.wait_until_done();
        debug!(id = %handle.id(), ?state, "Drivebase stopped");

        Ok(state)
    }

    /// Cancels and polls until nothing is pending or active on `channel`
    fn drain(&self, channel: &dyn CommandChannel) -> Result<(), CoordinatorError> {
        let warn_every = self.config.drain_warn_every.max(1);

        self.config
            .drain
            .run(|attempt| {
                if let Err(err) = channel.cancel_all() {
                    debug!(attempt, "Cancel failed: {err}");
                }

                if channel.is_idle() {
                    return Ok(());
                }

                if attempt % warn_every == 0 {
                    warn!(channel = ?channel.kind(), attempt, "Channel still has outstanding goals");
                }
                Err(())
            })
            .map_err(|Exhausted { attempts, .. }| CoordinatorError::RetriesExhausted {
                what: "draining goals",
                attempts,
            })?;

        trace!(channel = ?channel.kind(), "Channel drained");
        Ok(())
    }

    fn set_surface(&self, controls: &[ControlId], enabled: bool) {
        for control in controls {
            self.ui.set_enabled(*control, enabled);
        }
    }
}
