//! Operator input bindings
//!
//! Raw events are only turned into coordinator calls while the matching control is enabled on
//! the panel. The coordinator itself never checks.

use crate::coordinator::{Coordinator, CoordinatorError};
use crate::panel::{ControlId, Panel};
use common::types::{CommandCode, Mode};
use std::sync::Arc;
use tracing::{debug, trace};

/// Keyboard keys used for driving
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    W,
    S,
    A,
    D,
    Space,
    U,
    J,
    I,
    K,
    O,
    L,
}

/// What a key does when pressed
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyAction {
    /// Motion guarded by the watchdog
    Drive(CommandCode),
    /// Immediate drivebase stop
    Stop,
    /// One-shot command
    Command(CommandCode),
}

impl Key {
    pub const ALL: [Key; 11] = [
        Key::W,
        Key::S,
        Key::A,
        Key::D,
        Key::Space,
        Key::U,
        Key::J,
        Key::I,
        Key::K,
        Key::O,
        Key::L,
    ];

    pub fn from_char(key: char) -> Option<Self> {
        let key = match key.to_ascii_lowercase() {
            'w' => Key::W,
            's' => Key::S,
            'a' => Key::A,
            'd' => Key::D,
            ' ' => Key::Space,
            'u' => Key::U,
            'j' => Key::J,
            'i' => Key::I,
            'k' => Key::K,
            'o' => Key::O,
            'l' => Key::L,
            _ => return None,
        };

        Some(key)
    }

    pub const fn action(self) -> KeyAction {
        match self {
            Key::W => KeyAction::Drive(CommandCode::Forward),
            Key::S => KeyAction::Drive(CommandCode::Backward),
            Key::A => KeyAction::Drive(CommandCode::Left),
            Key::D => KeyAction::Drive(CommandCode::Right),
            Key::Space => KeyAction::Stop,
            Key::U => KeyAction::Command(CommandCode::LowerArmExtend),
            Key::J => KeyAction::Command(CommandCode::LowerArmRetract),
            Key::I => KeyAction::Command(CommandCode::UpperArmExtend),
            // Same as `I`, there is no key bound to upper arm retract
            Key::K => KeyAction::Command(CommandCode::UpperArmExtend),
            Key::O => KeyAction::Command(CommandCode::ScoopExtend),
            Key::L => KeyAction::Command(CommandCode::ScoopRetract),
        }
    }
}

/// What a clicked button asks for
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ButtonAction {
    StartMission(Mode),
    EnterMode(Mode),
    SetControl(bool),
    SetMotors(bool),
    Command(CommandCode),
}

impl ControlId {
    /// Action of a click, directional buttons and the keyboard have none
    pub const fn click_action(self) -> Option<ButtonAction> {
        let action = match self {
            ControlId::StartMission => ButtonAction::StartMission(Mode::Autonomous),
            ControlId::StartManual => ButtonAction::StartMission(Mode::Teleop),
            ControlId::Autonomy => ButtonAction::EnterMode(Mode::Autonomous),
            ControlId::Teleop => ButtonAction::EnterMode(Mode::Teleop),
            ControlId::ControlEnable => ButtonAction::SetControl(true),
            ControlId::ControlDisable => ButtonAction::SetControl(false),
            ControlId::MotorEnable => ButtonAction::SetMotors(true),
            ControlId::MotorDisable => ButtonAction::SetMotors(false),
            ControlId::Dig => ButtonAction::Command(CommandCode::Dig),
            ControlId::Dump => ButtonAction::Command(CommandCode::Dump),
            ControlId::ResetStarting => ButtonAction::Command(CommandCode::ResetStarting),
            ControlId::ResetDumping => ButtonAction::Command(CommandCode::ResetDumping),
            ControlId::LowerArmExtend => ButtonAction::Command(CommandCode::LowerArmExtend),
            ControlId::LowerArmRetract => ButtonAction::Command(CommandCode::LowerArmRetract),
            ControlId::UpperArmExtend => ButtonAction::Command(CommandCode::UpperArmExtend),
            ControlId::UpperArmRetract => ButtonAction::Command(CommandCode::UpperArmRetract),
            ControlId::ScoopExtend => ButtonAction::Command(CommandCode::ScoopExtend),
            ControlId::ScoopRetract => ButtonAction::Command(CommandCode::ScoopRetract),
            ControlId::RaiseArm => ButtonAction::Command(CommandCode::RaiseArm),
            ControlId::Clockwise => ButtonAction::Command(CommandCode::Clockwise),
            ControlId::Counterclockwise => ButtonAction::Command(CommandCode::Counterclockwise),
            ControlId::Forward
            | ControlId::Backward
            | ControlId::Left
            | ControlId::Right
            | ControlId::Keyboard => return None,
        };

        Some(action)
    }

    /// Motion of a press-and-hold button
    pub const fn hold_motion(self) -> Option<CommandCode> {
        match self {
            ControlId::Forward => Some(CommandCode::Forward),
            ControlId::Backward => Some(CommandCode::Backward),
            ControlId::Left => Some(CommandCode::Left),
            ControlId::Right => Some(CommandCode::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A key press or auto-repeat
    Key(Key),
    ButtonClicked(ControlId),
    ButtonPressed(ControlId),
    ButtonReleased(ControlId),
}

/// Whether an event made it to the coordinator
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Routed {
    Dispatched,
    /// The control is disabled or the event has no binding
    Ignored,
}

/// Delivers operator input to the coordinator, one event at a time
pub struct InputRouter {
    coordinator: Arc<Coordinator>,
    panel: Arc<Panel>,
}

impl InputRouter {
    pub fn new(coordinator: Arc<Coordinator>, panel: Arc<Panel>) -> Self {
        Self { coordinator, panel }
    }

    /// Blocks for as long as the coordinator does, transitions included
    #[tracing::instrument(skip(self))]
    pub fn handle(&self, event: InputEvent) -> Result<Routed, CoordinatorError> {
        let control = match event {
            InputEvent::Key(_) => ControlId::Keyboard,
            InputEvent::ButtonClicked(control)
            | InputEvent::ButtonPressed(control)
            | InputEvent::ButtonReleased(control) => control,
        };

        if !self.panel.is_enabled(control) {
            debug!(?control, "Control is disabled");
            return Ok(Routed::Ignored);
        }

        let coordinator = &self.coordinator;
        match event {
            InputEvent::Key(key) => match key.action() {
                KeyAction::Drive(code) => {
                    coordinator.drive(code)?;
                }
                KeyAction::Stop => {
                    coordinator.release()?;
                }
                KeyAction::Command(code) => {
                    coordinator.submit_teleop(code)?;
                }
            },
            InputEvent::ButtonClicked(control) => match control.click_action() {
                Some(ButtonAction::StartMission(mode)) => coordinator.start_mission(mode)?,
                Some(ButtonAction::EnterMode(Mode::Autonomous)) => coordinator.enter_autonomous()?,
                Some(ButtonAction::EnterMode(Mode::Teleop)) => coordinator.enter_teleop()?,
                Some(ButtonAction::SetControl(enabled)) => coordinator.set_control(enabled)?,
                Some(ButtonAction::SetMotors(enabled)) => coordinator.set_motors(enabled)?,
                Some(ButtonAction::Command(code)) => {
                    coordinator.submit_teleop(code)?;
                }
                None => {
                    trace!(?control, "Click has no binding");
                    return Ok(Routed::Ignored);
                }
            },
            InputEvent::ButtonPressed(control) => match control.hold_motion() {
                Some(code) => {
                    coordinator.submit_teleop(code)?;
                }
                None => return Ok(Routed::Ignored),
            },
            InputEvent::ButtonReleased(control) => match control.hold_motion() {
                Some(_) => {
                    coordinator.release()?;
                }
                None => return Ok(Routed::Ignored),
            },
        }

        Ok(Routed::Dispatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::{AUTONOMY_CONTROLS, TELEOP_CONTROLS};

    #[test]
    fn only_wasd_arm_the_watchdog() {
        let driving: Vec<_> = Key::ALL
            .into_iter()
            .filter(|key| matches!(key.action(), KeyAction::Drive(_)))
            .collect();

        assert_eq!(driving, vec![Key::W, Key::S, Key::A, Key::D]);
        assert_eq!(Key::Space.action(), KeyAction::Stop);
    }

    #[test]
    fn upper_arm_extend_has_two_keys() {
        assert_eq!(Key::I.action(), Key::K.action());
        assert_eq!(
            Key::K.action(),
            KeyAction::Command(CommandCode::UpperArmExtend)
        );
    }

    #[test]
    fn keys_parse_case_insensitive() {
        assert_eq!(Key::from_char('W'), Some(Key::W));
        assert_eq!(Key::from_char('l'), Some(Key::L));
        assert_eq!(Key::from_char(' '), Some(Key::Space));
        assert_eq!(Key::from_char('x'), None);
    }

    #[test]
    fn every_teleop_button_has_a_binding() {
        for control in TELEOP_CONTROLS.into_iter().chain(AUTONOMY_CONTROLS) {
            let bound = control.click_action().is_some() || control.hold_motion().is_some();
            assert!(bound || control == ControlId::Keyboard, "{control:?}");
        }
    }

    #[test]
    fn directional_buttons_are_held() {
        assert_eq!(ControlId::Forward.click_action(), None);
        assert_eq!(ControlId::Forward.hold_motion(), Some(CommandCode::Forward));
        assert_eq!(ControlId::Dig.hold_motion(), None);
        assert_eq!(
            ControlId::StartManual.click_action(),
            Some(ButtonAction::StartMission(Mode::Teleop))
        );
    }
}
