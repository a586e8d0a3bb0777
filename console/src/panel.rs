//! Enablement state of the operator's controls
//!
//! The coordinator only ever writes here. The input layer reads it to decide which operator
//! actions are currently allowed to reach the coordinator.

use fxhash::FxHashSet as HashSet;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Every control the coordinator can grey out
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ControlId {
    StartMission,
    StartManual,
    /// Switches to autonomous mode
    Autonomy,
    /// Leaves autonomous mode for teleop
    Teleop,
    ControlEnable,
    ControlDisable,
    MotorEnable,
    MotorDisable,
    Forward,
    Backward,
    Left,
    Right,
    Dig,
    Dump,
    ResetStarting,
    ResetDumping,
    LowerArmExtend,
    LowerArmRetract,
    UpperArmExtend,
    UpperArmRetract,
    ScoopExtend,
    ScoopRetract,
    RaiseArm,
    Clockwise,
    Counterclockwise,
    /// Keyboard driving
    Keyboard,
}

/// Controls that follow teleop authority
pub const TELEOP_CONTROLS: [ControlId; 14] = [
    ControlId::Left,
    ControlId::Right,
    ControlId::Forward,
    ControlId::Backward,
    ControlId::Autonomy,
    ControlId::Dump,
    ControlId::Dig,
    ControlId::LowerArmExtend,
    ControlId::LowerArmRetract,
    ControlId::UpperArmExtend,
    ControlId::UpperArmRetract,
    ControlId::ScoopExtend,
    ControlId::ScoopRetract,
    ControlId::Keyboard,
];

/// Controls that follow autonomous authority
pub const AUTONOMY_CONTROLS: [ControlId; 1] = [ControlId::Teleop];

/// Enabled before any mission starts
const INITIAL_CONTROLS: [ControlId; 9] = [
    ControlId::StartMission,
    ControlId::StartManual,
    ControlId::ControlEnable,
    ControlId::MotorEnable,
    ControlId::ResetStarting,
    ControlId::ResetDumping,
    ControlId::RaiseArm,
    ControlId::Clockwise,
    ControlId::Counterclockwise,
];

/// Notifications emitted by the coordinator for whatever draws the controls
pub trait UiSurface: Send + Sync {
    fn set_enabled(&self, control: ControlId, enabled: bool);

    fn show_time_remaining(&self, remaining: Duration);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelUpdate {
    Enabled(ControlId, bool),
    TimeRemaining(Duration),
}

type Notify = Box<dyn FnMut(PanelUpdate) + Send>;

/// The console's `UiSurface`, keeps the enablement table and forwards changes
pub struct Panel {
    enabled: Mutex<HashSet<ControlId>>,
    remaining: Mutex<Option<Duration>>,
    notify: Mutex<Notify>,
}

impl Panel {
    pub fn new(notify: impl FnMut(PanelUpdate) + Send + 'static) -> Self {
        Self {
            enabled: Mutex::new(INITIAL_CONTROLS.into_iter().collect()),
            remaining: Mutex::new(None),
            notify: Mutex::new(Box::new(notify)),
        }
    }

    /// A panel nobody is watching
    pub fn detached() -> Self {
        Self::new(|_| {})
    }

    fn enabled(&self) -> MutexGuard<'_, HashSet<ControlId>> {
        self.enabled.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, update: PanelUpdate) {
        let mut notify = self
            .notify
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (notify)(update);
    }

    pub fn is_enabled(&self, control: ControlId) -> bool {
        self.enabled().contains(&control)
    }

    pub fn time_remaining(&self) -> Option<Duration> {
        *self
            .remaining
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl UiSurface for Panel {
    fn set_enabled(&self, control: ControlId, enabled: bool) {
        let changed = {
            let mut controls = self.enabled();
            if enabled {
                controls.insert(control)
            } else {
                controls.remove(&control)
            }
        };

        if changed {
            debug!(?control, enabled, "Control changed");
            self.notify(PanelUpdate::Enabled(control, enabled));
        }
    }

    fn show_time_remaining(&self, remaining: Duration) {
        *self
            .remaining
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(remaining);
        self.notify(PanelUpdate::TimeRemaining(remaining));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn teleop_controls_start_disabled() {
        let panel = Panel::detached();

        for control in TELEOP_CONTROLS {
            assert!(!panel.is_enabled(control), "{control:?}");
        }
        assert!(panel.is_enabled(ControlId::StartMission));
        assert!(!panel.is_enabled(ControlId::Teleop));
    }

    #[test]
    fn only_changes_are_forwarded() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let panel = {
            let seen = seen.clone();
            Panel::new(move |update| seen.lock().expect("Lock").push(update))
        };

        panel.set_enabled(ControlId::Dig, true);
        panel.set_enabled(ControlId::Dig, true);
        panel.set_enabled(ControlId::Dig, false);
        panel.show_time_remaining(Duration::from_secs(90));

        assert_eq!(
            *seen.lock().expect("Lock"),
            vec![
                PanelUpdate::Enabled(ControlId::Dig, true),
                PanelUpdate::Enabled(ControlId::Dig, false),
                PanelUpdate::TimeRemaining(Duration::from_secs(90)),
            ]
        );
        assert_eq!(panel.time_remaining(), Some(Duration::from_secs(90)));
    }
}
