//! Status messages pushed by the executor and their human readable form

use serde::{Deserialize, Serialize};
use std::fmt::Write;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum StatusCode {
    SystemStarted,
    LocalizationStarted,
    LocalizationFinished,
    NavigationStarted,
    NavigationFinished,
    DiggingStarted,
    DiggingFinished,
    DumpingStarted,
    DumpingFinished,
    MissionFinished,
    TeleopCommand,
    MotorsToggled,
    ControlToggled,
    TimeExpired,
    SensorFault,
    Unknown(UnknownCode),
}

/// A code outside the known table, only built by `StatusCode::from`
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct UnknownCode(u16);

impl UnknownCode {
    pub fn get(self) -> u16 {
        self.0
    }
}

impl StatusCode {
    const KNOWN: [StatusCode; 15] = [
        StatusCode::SystemStarted,
        StatusCode::LocalizationStarted,
        StatusCode::LocalizationFinished,
        StatusCode::NavigationStarted,
        StatusCode::NavigationFinished,
        StatusCode::DiggingStarted,
        StatusCode::DiggingFinished,
        StatusCode::DumpingStarted,
        StatusCode::DumpingFinished,
        StatusCode::MissionFinished,
        StatusCode::TeleopCommand,
        StatusCode::MotorsToggled,
        StatusCode::ControlToggled,
        StatusCode::TimeExpired,
        StatusCode::SensorFault,
    ];

    pub fn label(self) -> String {
        let label = match self {
            StatusCode::SystemStarted => "System started",
            StatusCode::LocalizationStarted => "Localization started",
            StatusCode::LocalizationFinished => "Localization finished",
            StatusCode::NavigationStarted => "Navigation started",
            StatusCode::NavigationFinished => "Navigation finished",
            StatusCode::DiggingStarted => "Digging started",
            StatusCode::DiggingFinished => "Digging finished",
            StatusCode::DumpingStarted => "Dumping started",
            StatusCode::DumpingFinished => "Dumping finished",
            StatusCode::MissionFinished => "Mission finished",
            StatusCode::TeleopCommand => "Teleop command",
            StatusCode::MotorsToggled => "Motors toggled",
            StatusCode::ControlToggled => "Control toggled",
            StatusCode::TimeExpired => "Mission time expired",
            StatusCode::SensorFault => "Sensor fault",
            StatusCode::Unknown(code) => return format!("Status {}", code.get()),
        };

        label.to_owned()
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode::KNOWN
            .get(code as usize)
            .copied()
            .unwrap_or(StatusCode::Unknown(UnknownCode(code)))
    }
}

impl From<StatusCode> for u16 {
    fn from(code: StatusCode) -> Self {
        match code {
            StatusCode::Unknown(code) => code.get(),
            known => StatusCode::KNOWN
                .iter()
                .position(|it| *it == known)
                .map(|idx| idx as u16)
                .unwrap_or(u16::MAX),
        }
    }
}

/// A status message from the robot, the payload is opaque to the console
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub code: StatusCode,
    pub payload: Vec<u8>,
}

impl StatusEvent {
    pub fn new(code: StatusCode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// Renders the event as a single log line
    pub fn render(&self) -> String {
        let mut line = self.code.label();

        if self.payload.is_empty() {
            return line;
        }

        line.push_str(": ");
        match std::str::from_utf8(&self.payload) {
            Ok(text) if !text.chars().any(char::is_control) => line.push_str(text),
            _ => {
                line.push('[');
                for (idx, byte) in self.payload.iter().enumerate() {
                    if idx != 0 {
                        line.push(' ');
                    }
                    let _ = write!(line, "{byte:02x}");
                }
                line.push(']');
            }
        }

        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_text_payload() {
        let event = StatusEvent::new(StatusCode::DiggingStarted, "bin 2");
        assert_eq!(event.render(), "Digging started: bin 2");
    }

    #[test]
    fn render_empty_payload() {
        let event = StatusEvent::new(StatusCode::MissionFinished, Vec::new());
        assert_eq!(event.render(), "Mission finished");
    }

    #[test]
    fn render_binary_payload() {
        let event = StatusEvent::new(StatusCode::SensorFault, vec![0x00, 0xff, 0x10]);
        assert_eq!(event.render(), "Sensor fault: [00 ff 10]");

        let event = StatusEvent::new(StatusCode::SensorFault, "line\nbreak");
        assert_eq!(event.render(), "Sensor fault: [6c 69 6e 65 0a 62 72 65 61 6b]");
    }

    #[test]
    fn unknown_codes_survive() {
        let code = StatusCode::from(700);
        assert_eq!(code, StatusCode::Unknown(UnknownCode(700)));
        assert_eq!(u16::from(code), 700);
        assert_eq!(code.label(), "Status 700");

        for (idx, code) in StatusCode::KNOWN.iter().enumerate() {
            assert_eq!(u16::from(*code) as usize, idx);
            assert_eq!(StatusCode::from(idx as u16), *code);
        }
    }

    #[test]
    fn known_codes_never_decode_as_unknown() {
        for idx in 0..StatusCode::KNOWN.len() as u16 {
            assert!(!matches!(StatusCode::from(idx), StatusCode::Unknown(_)));
        }
        assert_eq!(StatusCode::from(3), StatusCode::NavigationStarted);

        let event = StatusEvent::new(StatusCode::from(15), "late");
        let bytes = bincode::serialize(&event).expect("Encode");
        let decoded: StatusEvent = bincode::deserialize(&bytes).expect("Decode");
        assert_eq!(decoded, event);
        assert_eq!(u16::from(decoded.code), 15);
    }
}
