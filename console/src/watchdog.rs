//! Motor watchdog used to debounce held keys
//!
//! Holding a key produces a stream of repeated presses. Every press re-arms the watchdog, the
//! drivebase is stopped once the presses stop arriving for a full interval.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{span, trace, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Disarmed,
    Armed { deadline: Instant, generation: u64 },
}

/// The watchdog as seen by the coordinator, lives inside the coordinator's state lock
#[derive(Debug)]
pub struct Watchdog {
    state: WatchdogState,
    generation: u64,
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            state: WatchdogState::Disarmed,
            generation: 0,
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, WatchdogState::Armed { .. })
    }

    /// Arms or re-arms, any previous deadline is forgotten
    pub fn arm(&mut self, now: Instant, interval: Duration) -> Signal {
        self.generation += 1;
        let deadline = now + interval;
        self.state = WatchdogState::Armed {
            deadline,
            generation: self.generation,
        };

        Signal::Arm {
            deadline,
            generation: self.generation,
        }
    }

    /// Returns true if the watchdog was armed
    pub fn disarm(&mut self) -> bool {
        let was_armed = self.is_armed();
        self.state = WatchdogState::Disarmed;
        was_armed
    }

    /// Decides whether a timer firing for `generation` at `now` should stop the drivebase
    ///
    /// Only the latest arm can expire and only once its deadline passed. A successful expiry
    /// disarms.
    pub fn expire(&mut self, generation: u64, now: Instant) -> bool {
        match self.state {
            WatchdogState::Armed {
                deadline,
                generation: armed,
            } if armed == generation && now >= deadline => {
                self.state = WatchdogState::Disarmed;
                true
            }
            _ => false,
        }
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

/// Messages for the timer thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Arm { deadline: Instant, generation: u64 },
    Disarm,
}

/// Thread that waits for the armed deadline and reports expiries
///
/// The thread exits once every `Sender<Signal>` has been dropped, dropping the `Timer` joins it
pub struct Timer {
    thread: Option<JoinHandle<()>>,
}

impl Timer {
    pub fn spawn(
        on_expire: impl FnMut(u64) + Send + 'static,
    ) -> io::Result<(Sender<Signal>, Timer)> {
        let (tx, rx) = channel::unbounded();

        let thread = thread::Builder::new()
            .name("motor-watchdog".to_owned())
            .spawn(move || run_timer(rx, on_expire))?;

        Ok((
            tx,
            Timer {
                thread: Some(thread),
            },
        ))
    }

    /// Waits for the thread to exit, all senders must be gone first
    pub fn join(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.join_thread();
    }
}

fn run_timer(rx: Receiver<Signal>, mut on_expire: impl FnMut(u64)) {
    let _span = span!(Level::DEBUG, "Motor watchdog").entered();

    let mut armed: Option<(Instant, u64)> = None;

    loop {
        let signal = match armed {
            Some((deadline, generation)) => match rx.recv_deadline(deadline) {
                Ok(signal) => signal,
                Err(RecvTimeoutError::Timeout) => {
                    trace!(generation, "Watchdog expired");
                    armed = None;
                    on_expire(generation);
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match rx.recv() {
                Ok(signal) => signal,
                Err(_) => return,
            },
        };

        armed = match signal {
            Signal::Arm {
                deadline,
                generation,
            } => Some((deadline, generation)),
            Signal::Disarm => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INTERVAL: Duration = Duration::from_millis(300);

    #[test]
    fn expires_once_after_deadline() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new();

        let Signal::Arm { generation, .. } = watchdog.arm(start, INTERVAL) else {
            panic!("Arm did not produce an arm signal");
        };

        assert!(!watchdog.expire(generation, start + Duration::from_millis(299)));
        assert!(watchdog.is_armed());

        assert!(watchdog.expire(generation, start + INTERVAL));
        assert_eq!(watchdog.state(), WatchdogState::Disarmed);

        // A second firing of the same cycle does nothing
        assert!(!watchdog.expire(generation, start + INTERVAL * 2));
    }

    #[test]
    fn rearm_supersedes_old_deadline() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new();

        let Signal::Arm {
            generation: first, ..
        } = watchdog.arm(start, INTERVAL)
        else {
            panic!("Arm did not produce an arm signal");
        };
        let Signal::Arm {
            generation: second,
            deadline,
        } = watchdog.arm(start + Duration::from_millis(100), INTERVAL)
        else {
            panic!("Arm did not produce an arm signal");
        };

        assert_ne!(first, second);
        assert_eq!(deadline, start + Duration::from_millis(400));

        // The stale timer fires at the old deadline and must be ignored
        assert!(!watchdog.expire(first, start + INTERVAL));
        assert!(watchdog.is_armed());

        assert!(watchdog.expire(second, deadline));
    }

    #[test]
    fn disarm_prevents_expiry() {
        let start = Instant::now();
        let mut watchdog = Watchdog::new();

        let Signal::Arm { generation, .. } = watchdog.arm(start, INTERVAL) else {
            panic!("Arm did not produce an arm signal");
        };

        assert!(watchdog.disarm());
        assert!(!watchdog.disarm());
        assert!(!watchdog.expire(generation, start + INTERVAL));
    }

    #[test]
    fn timer_reports_latest_generation() {
        let (expired_tx, expired_rx) = channel::unbounded();
        let (tx, timer) = Timer::spawn(move |generation| {
            let _ = expired_tx.send((generation, Instant::now()));
        })
        .expect("Spawn timer");

        let start = Instant::now();
        tx.send(Signal::Arm {
            deadline: start + Duration::from_millis(30),
            generation: 1,
        })
        .expect("Send");
        tx.send(Signal::Arm {
            deadline: start + Duration::from_millis(60),
            generation: 2,
        })
        .expect("Send");

        let (generation, at) = expired_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("Timer never fired");
        assert_eq!(generation, 2);
        assert!(at >= start + Duration::from_millis(60));

        assert!(expired_rx.recv_timeout(Duration::from_millis(100)).is_err());

        drop(tx);
        timer.join();
    }

    #[test]
    fn timer_disarm() {
        let (expired_tx, expired_rx) = channel::unbounded();
        let (tx, timer) = Timer::spawn(move |generation| {
            let _ = expired_tx.send(generation);
        })
        .expect("Spawn timer");

        tx.send(Signal::Arm {
            deadline: Instant::now() + Duration::from_millis(30),
            generation: 1,
        })
        .expect("Send");
        tx.send(Signal::Disarm).expect("Send");

        assert!(expired_rx.recv_timeout(Duration::from_millis(100)).is_err());

        drop(tx);
        timer.join();
    }
}
