//! The console's view of the executor: command channels, services and goal tracking

use common::service::{Service, ServiceRequest, ServiceResponse};
use common::types::{ChannelError, ChannelKind, Goal, GoalId, GoalState};
use fxhash::FxHashMap as HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Asynchronous goal submission with lifecycle tracking and cancel-all
pub trait CommandChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    /// Queues a goal and returns without waiting for it to start
    fn submit(&self, goal: Goal) -> Result<GoalHandle, ChannelError>;

    /// Asks the executor to cancel every goal on this channel
    fn cancel_all(&self) -> Result<(), ChannelError>;

    /// No goal on this channel is pending or active
    fn is_idle(&self) -> bool;
}

/// Synchronous request/response calls
pub trait ServiceChannel: Send + Sync {
    fn call(&self, service: Service, request: ServiceRequest)
        -> Result<ServiceResponse, ChannelError>;
}

#[derive(Debug)]
struct Tracker {
    state: Mutex<GoalState>,
    changed: Condvar,
}

impl Tracker {
    fn lock(&self) -> MutexGuard<'_, GoalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Reference to a submitted goal
#[derive(Debug, Clone)]
pub struct GoalHandle {
    id: GoalId,
    goal: Goal,
    tracker: Arc<Tracker>,
}

impl GoalHandle {
    pub fn id(&self) -> GoalId {
        self.id
    }

    pub fn goal(&self) -> Goal {
        self.goal
    }

    pub fn state(&self) -> GoalState {
        *self.tracker.lock()
    }

    pub fn is_done(&self) -> bool {
        self.state().is_done()
    }

    /// Blocks until the executor reports the goal as done
    pub fn wait_until_done(&self) -> GoalState {
        let mut state = self.tracker.lock();
        while !state.is_done() {
            state = self
                .tracker
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }

        *state
    }

    /// Like `wait_until_done` but gives up after `timeout`, returns the last known state
    pub fn wait_timeout(&self, timeout: Duration) -> GoalState {
        let deadline = Instant::now() + timeout;
        let mut state = self.tracker.lock();
        while !state.is_done() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            state = self
                .tracker
                .changed
                .wait_timeout(state, remaining)
                .map(|(state, _)| state)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }

        *state
    }
}

/// Bookkeeping for the goals of one channel
///
/// Only goals that are not done yet are kept, handles keep their own copy of the state
#[derive(Debug)]
pub struct GoalBook {
    kind: ChannelKind,
    next_id: AtomicU64,
    goals: Mutex<HashMap<GoalId, Arc<Tracker>>>,
}

impl GoalBook {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            next_id: AtomicU64::new(1),
            goals: Mutex::default(),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn goals(&self) -> MutexGuard<'_, HashMap<GoalId, Arc<Tracker>>> {
        self.goals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a new pending goal
    pub fn open(&self, goal: Goal) -> GoalHandle {
        let id = GoalId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let tracker = Arc::new(Tracker {
            state: Mutex::new(GoalState::Pending),
            changed: Condvar::new(),
        });

        self.goals().insert(id, tracker.clone());
        trace!(channel = ?self.kind, %id, ?goal, "Goal opened");

        GoalHandle { id, goal, tracker }
    }

    /// Applies a lifecycle update, returns false if the goal is unknown or already done
    pub fn update(&self, id: GoalId, state: GoalState) -> bool {
        let mut goals = self.goals();
        let Some(tracker) = goals.get(&id).cloned() else {
            trace!(channel = ?self.kind, %id, ?state, "Update for untracked goal");
            return false;
        };

        if state.is_done() {
            goals.remove(&id);
        }
        drop(goals);

        let mut current = tracker.lock();
        if current.is_done() {
            warn!(channel = ?self.kind, %id, ?state, "Goal already finished");
            return false;
        }
        *current = state;
        tracker.changed.notify_all();

        true
    }

    /// Marks every goal that is still tracked with `state`
    pub fn finish_all(&self, state: GoalState) -> usize {
        let ids = self.outstanding();
        ids.into_iter().filter(|id| self.update(*id, state)).count()
    }

    /// Goals that are pending or active, oldest first
    pub fn outstanding(&self) -> Vec<GoalId> {
        let mut ids: Vec<_> = self.goals().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_idle(&self) -> bool {
        self.goals().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::CommandCode;
    use std::thread;

    #[test]
    fn lifecycle() {
        let book = GoalBook::new(ChannelKind::Teleop);
        let handle = book.open(Goal::Teleop(CommandCode::Dig));

        assert_eq!(handle.state(), GoalState::Pending);
        assert!(!book.is_idle());

        assert!(book.update(handle.id(), GoalState::Active));
        assert!(!handle.is_done());

        assert!(book.update(handle.id(), GoalState::Succeeded));
        assert!(handle.is_done());
        assert!(book.is_idle());

        // Late updates do not resurrect a finished goal
        assert!(!book.update(handle.id(), GoalState::Active));
        assert_eq!(handle.state(), GoalState::Succeeded);
    }

    #[test]
    fn wait_until_done_wakes_up() {
        let book = Arc::new(GoalBook::new(ChannelKind::Autonomy));
        let handle = book.open(Goal::Autonomous);

        let finisher = {
            let book = book.clone();
            let id = handle.id();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                book.update(id, GoalState::Cancelled);
            })
        };

        assert_eq!(handle.wait_until_done(), GoalState::Cancelled);
        finisher.join().expect("Join");
    }

    #[test]
    fn wait_timeout_gives_up() {
        let book = GoalBook::new(ChannelKind::Teleop);
        let handle = book.open(Goal::Teleop(CommandCode::Forward));

        let state = handle.wait_timeout(Duration::from_millis(10));
        assert_eq!(state, GoalState::Pending);
    }

    #[test]
    fn finish_all_only_touches_outstanding() {
        let book = GoalBook::new(ChannelKind::Teleop);
        let first = book.open(Goal::Teleop(CommandCode::Forward));
        let second = book.open(Goal::Teleop(CommandCode::Left));
        book.update(first.id(), GoalState::Succeeded);

        assert_eq!(book.outstanding(), vec![second.id()]);
        assert_eq!(book.finish_all(GoalState::Cancelled), 1);
        assert_eq!(first.state(), GoalState::Succeeded);
        assert_eq!(second.state(), GoalState::Cancelled);
    }
}
