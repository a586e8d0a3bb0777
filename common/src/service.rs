//! The one-shot services exposed by the executor
//!
//! The service names are the contract with the executor and must not change

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Service {
    /// Enables or disables control authority (software estop)
    ToggleControl,
    /// Enables or disables motor output
    ToggleMotors,
    /// Re-references the turntable actuator
    ZeroTurntable,
    /// Starts the mission timer on the executor
    StartMission,
    /// Queries how much of the mission timer is left
    TimeRemaining,
}

impl Service {
    pub const ALL: [Service; 5] = [
        Service::ToggleControl,
        Service::ToggleMotors,
        Service::ZeroTurntable,
        Service::StartMission,
        Service::TimeRemaining,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Service::ToggleControl => "toggle_control",
            Service::ToggleMotors => "toggle_motors",
            Service::ZeroTurntable => "zero_turntable",
            Service::StartMission => "start_mission",
            Service::TimeRemaining => "time_remaining",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Service::ALL.into_iter().find(|it| it.name() == name)
    }
}

impl Display for Service {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceRequest {
    Empty,
    SetBool(bool),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceResponse {
    Empty,
    SetBool { success: bool, message: String },
    Duration(Duration),
}

impl ServiceResponse {
    /// Whether the executor acknowledged the request
    ///
    /// Only `SetBool` carries an explicit flag, everything else is acknowledged by answering
    pub fn acknowledged(&self) -> bool {
        match self {
            ServiceResponse::SetBool { success, .. } => *success,
            ServiceResponse::Empty | ServiceResponse::Duration(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stable() {
        let names = Service::ALL.map(Service::name);

        assert_eq!(
            names,
            [
                "toggle_control",
                "toggle_motors",
                "zero_turntable",
                "start_mission",
                "time_remaining"
            ]
        );

        for service in Service::ALL {
            assert_eq!(Service::from_name(service.name()), Some(service));
        }
        assert_eq!(Service::from_name("/zero_turntable"), None);
    }

    #[test]
    fn set_bool_acknowledgement() {
        let nack = ServiceResponse::SetBool {
            success: false,
            message: "busy".to_owned(),
        };

        assert!(!nack.acknowledged());
        assert!(ServiceResponse::Empty.acknowledged());
    }
}
