//! Mission clock, polls the executor for the remaining mission time

use crate::channel::ServiceChannel;
use crate::panel::UiSurface;
use common::service::{Service, ServiceRequest, ServiceResponse};
use common::types::ChannelError;
use crossbeam::channel::{self, select, Receiver, Sender};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, span, warn, Level};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

struct Ticker {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

pub struct MissionClock {
    services: Arc<dyn ServiceChannel>,
    ui: Arc<dyn UiSurface>,
    interval: Duration,
    ticker: Mutex<Option<Ticker>>,
}

impl MissionClock {
    pub fn new(
        services: Arc<dyn ServiceChannel>,
        ui: Arc<dyn UiSurface>,
        interval: Duration,
    ) -> Self {
        Self {
            services,
            ui,
            interval,
            ticker: Mutex::new(None),
        }
    }

    fn ticker(&self) -> MutexGuard<'_, Option<Ticker>> {
        self.ticker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts polling, a running clock is restarted
    pub fn start(&self) -> io::Result<()> {
        let mut ticker = self.ticker();
        if let Some(previous) = ticker.take() {
            stop_ticker(previous);
        }

        let (stop, stopped) = channel::bounded(0);
        let services = self.services.clone();
        let ui = self.ui.clone();
        let interval = self.interval;

        let thread = thread::Builder::new()
            .name("mission-clock".to_owned())
            .spawn(move || run_clock(services, ui, interval, stopped))?;

        info!(?interval, "Mission clock started");
        *ticker = Some(Ticker { stop, thread });

        Ok(())
    }

    pub fn stop(&self) {
        if let Some(ticker) = self.ticker().take() {
            stop_ticker(ticker);
            info!("Mission clock stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker().is_some()
    }
}

impl Drop for MissionClock {
    fn drop(&mut self) {
        self.stop();
    }
}

fn stop_ticker(ticker: Ticker) {
    let Ticker { stop, thread } = ticker;
    drop(stop);
    let _ = thread.join();
}

fn run_clock(
    services: Arc<dyn ServiceChannel>,
    ui: Arc<dyn UiSurface>,
    interval: Duration,
    stopped: Receiver<()>,
) {
    let _span = span!(Level::INFO, "Mission clock").entered();

    let ticks = channel::tick(interval);

    loop {
        select! {
            recv(stopped) -> _ => return,
            recv(ticks) -> _ => {
                if let Err(err) = poll_once(&*services, &*ui) {
                    warn!("Skipping clock tick: {err}");
                }
            }
        }
    }
}

/// One `time_remaining` query, the display is only updated on success
pub fn poll_once(services: &dyn ServiceChannel, ui: &dyn UiSurface) -> Result<Duration, ChannelError> {
    match services.call(Service::TimeRemaining, ServiceRequest::Empty)? {
        ServiceResponse::Duration(remaining) => {
            debug!(?remaining, "Time remaining");
            ui.show_time_remaining(remaining);
            Ok(remaining)
        }
        other => Err(ChannelError::Rejected(format!(
            "Unexpected {} response: {other:?}",
            Service::TimeRemaining
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::{ControlId, Panel};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Answers `time_remaining` with a countdown, fails every `fail_every`th call
    struct Countdown {
        calls: AtomicU32,
        fail_every: u32,
    }

    impl ServiceChannel for Countdown {
        fn call(
            &self,
            service: Service,
            _request: ServiceRequest,
        ) -> Result<ServiceResponse, ChannelError> {
            assert_eq!(service, Service::TimeRemaining);

            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every != 0 && call % self.fail_every == 0 {
                return Err(ChannelError::Timeout(service.name()));
            }

            Ok(ServiceResponse::Duration(Duration::from_secs(
                600 - call as u64,
            )))
        }
    }

    fn countdown(fail_every: u32) -> Arc<Countdown> {
        Arc::new(Countdown {
            calls: AtomicU32::new(0),
            fail_every,
        })
    }

    #[test]
    fn poll_updates_display() {
        let services = countdown(0);
        let panel = Panel::detached();

        let remaining = poll_once(&*services, &panel).expect("Poll");
        assert_eq!(remaining, Duration::from_secs(599));
        assert_eq!(panel.time_remaining(), Some(Duration::from_secs(599)));
        assert!(panel.is_enabled(ControlId::StartMission));
    }

    #[test]
    fn failed_poll_keeps_last_value() {
        let services = countdown(2);
        let panel = Panel::detached();

        poll_once(&*services, &panel).expect("Poll");
        assert!(poll_once(&*services, &panel).is_err());
        assert_eq!(panel.time_remaining(), Some(Duration::from_secs(599)));
    }

    #[test]
    fn clock_keeps_ticking_through_failures() {
        let services = countdown(2);
        let panel = Arc::new(Panel::detached());
        let clock = MissionClock::new(services.clone(), panel.clone(), Duration::from_millis(5));

        clock.start().expect("Start");
        assert!(clock.is_running());
        thread::sleep(Duration::from_millis(100));
        clock.stop();
        assert!(!clock.is_running());

        let calls = services.calls.load(Ordering::SeqCst);
        assert!(calls >= 4, "Only {calls} polls");
        assert!(panel.time_remaining().is_some());

        // Nothing polls once stopped
        thread::sleep(Duration::from_millis(30));
        assert_eq!(services.calls.load(Ordering::SeqCst), calls);
    }
}
