//! Definitions of important types used throughout the project

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

/// Which half of the console currently has command authority over the robot
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Autonomous,
    Teleop,
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Autonomous => write!(f, "Autonomous"),
            Mode::Teleop => write!(f, "Teleop"),
        }
    }
}

/// Discrete actions the teleop executor understands
///
/// Sent over the wire as the `u8` tag
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum CommandCode {
    StopDrivebase = 0,
    Forward = 1,
    Backward = 2,
    Left = 3,
    Right = 4,
    Dig = 5,
    Dump = 6,
    ResetDumping = 7,
    ResetStarting = 8,
    LowerArmExtend = 9,
    LowerArmRetract = 10,
    UpperArmExtend = 11,
    UpperArmRetract = 12,
    ScoopExtend = 13,
    ScoopRetract = 14,
    Clockwise = 15,
    Counterclockwise = 16,
    RaiseArm = 17,
    DrivingPosition = 18,
}

impl CommandCode {
    pub const ALL: [CommandCode; 19] = [
        CommandCode::StopDrivebase,
        CommandCode::Forward,
        CommandCode::Backward,
        CommandCode::Left,
        CommandCode::Right,
        CommandCode::Dig,
        CommandCode::Dump,
        CommandCode::ResetDumping,
        CommandCode::ResetStarting,
        CommandCode::LowerArmExtend,
        CommandCode::LowerArmRetract,
        CommandCode::UpperArmExtend,
        CommandCode::UpperArmRetract,
        CommandCode::ScoopExtend,
        CommandCode::ScoopRetract,
        CommandCode::Clockwise,
        CommandCode::Counterclockwise,
        CommandCode::RaiseArm,
        CommandCode::DrivingPosition,
    ];

    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Drivebase motions, these are the commands guarded by the motor watchdog
    pub const fn is_drive(self) -> bool {
        matches!(
            self,
            CommandCode::Forward | CommandCode::Backward | CommandCode::Left | CommandCode::Right
        )
    }
}

impl From<CommandCode> for u8 {
    fn from(code: CommandCode) -> Self {
        code.tag()
    }
}

impl TryFrom<u8> for CommandCode {
    type Error = UnknownCommand;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        CommandCode::ALL
            .get(tag as usize)
            .copied()
            .ok_or(UnknownCommand(tag))
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Unknown command tag: {0}")]
pub struct UnknownCommand(pub u8);

/// The two independent command channels
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Teleop,
    Autonomy,
}

/// What gets submitted on a command channel
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Goal {
    /// A single teleop action
    Teleop(CommandCode),
    /// Run the autonomous mission, carries no parameters
    Autonomous,
}

impl Goal {
    pub const fn channel(&self) -> ChannelKind {
        match self {
            Goal::Teleop(_) => ChannelKind::Teleop,
            Goal::Autonomous => ChannelKind::Autonomy,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GoalId(pub u64);

impl Display for GoalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Goal lifecycle as reported by the executor
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GoalState {
    Pending,
    Active,
    Succeeded,
    /// Replaced by a newer goal on the same channel
    Preempted,
    Cancelled,
    Aborted,
}

impl GoalState {
    pub const fn is_done(self) -> bool {
        !matches!(self, GoalState::Pending | GoalState::Active)
    }
}

/// Failures of the command and service channels
///
/// All of these are treated as transient by the console
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Not connected to the executor")]
    Disconnected,
    #[error("Service `{0}` did not answer in time")]
    Timeout(&'static str),
    #[error("Executor rejected request: {0}")]
    Rejected(String),
    #[error("Could not encode request: {0}")]
    Encode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_tags_match_table() {
        for (idx, code) in CommandCode::ALL.iter().enumerate() {
            assert_eq!(code.tag() as usize, idx);
            assert_eq!(CommandCode::try_from(code.tag()), Ok(*code));
        }

        assert_eq!(CommandCode::try_from(19), Err(UnknownCommand(19)));
    }

    #[test]
    fn only_drivebase_motions_are_drive() {
        let drive = CommandCode::ALL
            .iter()
            .filter(|code| code.is_drive())
            .count();

        assert_eq!(drive, 4);
        assert!(!CommandCode::StopDrivebase.is_drive());
    }

    #[test]
    fn done_states() {
        assert!(!GoalState::Pending.is_done());
        assert!(!GoalState::Active.is_done());
        assert!(GoalState::Succeeded.is_done());
        assert!(GoalState::Preempted.is_done());
        assert!(GoalState::Cancelled.is_done());
        assert!(GoalState::Aborted.is_done());
    }
}
