use std::{thread::Scope, time::Duration};

use anyhow::Context;
use crossterm::{
    event::{
        self, Event as TermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers,
        KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
    },
    execute, terminal,
};
use tracing::{span, trace, warn, Level};

use crate::{
    event::Event,
    events::EventHandle,
    input::{InputEvent, Key},
    panel::ControlId,
};

use super::{
    stop::{request_stop, stop_requested},
    Console, System,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reads the terminal keyboard and publishes operator input
pub struct InputSystem;

impl System for InputSystem {
    const NAME: &'static str = "Terminal input";

    fn start<'scope, 'env>(
        _console: &'env Console,
        mut events: EventHandle,
        spawner: &'scope Scope<'scope, 'env>,
    ) -> anyhow::Result<()> {
        let listner = events.take_listner().context("Listner taken")?;

        let sender = events.sender();
        let raw = RawTerminal::enter().context("Enter raw mode")?;

        spawner.spawn(move || {
            let _span = span!(Level::INFO, "Terminal input").entered();

            loop {
                if stop_requested() || listner.try_iter().any(|it| matches!(*it, Event::Exit)) {
                    break;
                }

                match read_key() {
                    Ok(Some(key)) => match translate(key) {
                        Some(TerminalInput::Operator(input)) => events.send(Event::Input(input)),
                        Some(TerminalInput::Exit) => {
                            request_stop(&sender, "quit key");
                            break;
                        }
                        None => trace!(?key, "Unbound key"),
                    },
                    Ok(None) => {}
                    Err(err) => {
                        events.send(Event::Error(err.context("Read terminal")));
                        request_stop(&sender, "terminal failed");
                        break;
                    }
                }
            }

            drop(raw);
        });

        Ok(())
    }
}

fn read_key() -> anyhow::Result<Option<KeyEvent>> {
    if !event::poll(POLL_INTERVAL).context("Poll terminal")? {
        return Ok(None);
    }

    match event::read().context("Read terminal event")? {
        TermEvent::Key(key) => Ok(Some(key)),
        _ => Ok(None),
    }
}

/// Restores the terminal when dropped
struct RawTerminal {
    enhanced: bool,
}

impl RawTerminal {
    fn enter() -> anyhow::Result<Self> {
        terminal::enable_raw_mode().context("Enable raw mode")?;

        // Key release events need the kitty keyboard protocol
        let enhanced = matches!(terminal::supports_keyboard_enhancement(), Ok(true));
        if enhanced {
            execute!(
                std::io::stdout(),
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
            )
            .context("Enable key release events")?;
        } else {
            warn!("Terminal does not report key releases, use space to stop held buttons");
        }

        Ok(Self { enhanced })
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        if self.enhanced {
            let _ = execute!(std::io::stdout(), PopKeyboardEnhancementFlags);
        }
        let _ = terminal::disable_raw_mode();
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TerminalInput {
    Operator(InputEvent),
    Exit,
}

/// Maps a terminal key to operator input
///
/// Letters are the driving keys. Function keys and digits click panel buttons, the arrow keys are
/// the press-and-hold drive buttons.
pub fn translate(key: KeyEvent) -> Option<TerminalInput> {
    let release = key.kind == KeyEventKind::Release;

    if key.code == KeyCode::Esc
        || key.code == KeyCode::Char('q')
        || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
    {
        return (!release).then_some(TerminalInput::Exit);
    }

    if let Some(control) = hold_button(key.code) {
        let input = match key.kind {
            KeyEventKind::Press => InputEvent::ButtonPressed(control),
            KeyEventKind::Release => InputEvent::ButtonReleased(control),
            KeyEventKind::Repeat => return None,
        };
        return Some(TerminalInput::Operator(input));
    }

    if release {
        return None;
    }

    if let Some(control) = click_button(key.code) {
        // Holding a button down does not click it again
        if key.kind == KeyEventKind::Repeat {
            return None;
        }
        return Some(TerminalInput::Operator(InputEvent::ButtonClicked(control)));
    }

    match key.code {
        KeyCode::Char(ch) => {
            Key::from_char(ch).map(|key| TerminalInput::Operator(InputEvent::Key(key)))
        }
        _ => None,
    }
}

fn hold_button(code: KeyCode) -> Option<ControlId> {
    match code {
        KeyCode::Up => Some(ControlId::Forward),
        KeyCode::Down => Some(ControlId::Backward),
        KeyCode::Left => Some(ControlId::Left),
        KeyCode::Right => Some(ControlId::Right),
        _ => None,
    }
}

fn click_button(code: KeyCode) -> Option<ControlId> {
    let control = match code {
        KeyCode::F(1) => ControlId::StartMission,
        KeyCode::F(2) => ControlId::StartManual,
        KeyCode::F(3) => ControlId::Autonomy,
        KeyCode::F(4) => ControlId::Teleop,
        KeyCode::F(5) => ControlId::ControlEnable,
        KeyCode::F(6) => ControlId::ControlDisable,
        KeyCode::F(7) => ControlId::MotorEnable,
        KeyCode::F(8) => ControlId::MotorDisable,
        KeyCode::Char('1') => ControlId::Dig,
        KeyCode::Char('2') => ControlId::Dump,
        KeyCode::Char('3') => ControlId::ResetStarting,
        KeyCode::Char('4') => ControlId::ResetDumping,
        KeyCode::Char('5') => ControlId::RaiseArm,
        KeyCode::Char('6') => ControlId::Clockwise,
        KeyCode::Char('7') => ControlId::Counterclockwise,
        KeyCode::Char('8') => ControlId::LowerArmExtend,
        KeyCode::Char('9') => ControlId::LowerArmRetract,
        KeyCode::Char('0') => ControlId::UpperArmExtend,
        KeyCode::Char('-') => ControlId::UpperArmRetract,
        KeyCode::Char('[') => ControlId::ScoopExtend,
        KeyCode::Char(']') => ControlId::ScoopRetract,
        _ => return None,
    };

    Some(control)
}

/// Help text printed when the console starts
pub const KEY_HELP: &[&str] = &[
    "F1 start mission   F2 start manual   F3 autonomy   F4 teleop",
    "F5/F6 control on/off   F7/F8 motors on/off",
    "W/A/S/D drive   space stop   arrows hold to drive",
    "U/J lower arm   I/K upper arm   O/L scoop",
    "1 dig  2 dump  3 reset start  4 reset dump  5 raise arm  6/7 turntable",
    "8/9 lower arm  0/- upper arm  [/] scoop   q quit",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::KeyEventState;

    fn key(code: KeyCode, kind: KeyEventKind) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind,
            state: KeyEventState::NONE,
        }
    }

    #[test]
    fn letters_repeat_as_key_presses() {
        for kind in [KeyEventKind::Press, KeyEventKind::Repeat] {
            assert_eq!(
                translate(key(KeyCode::Char('w'), kind)),
                Some(TerminalInput::Operator(InputEvent::Key(Key::W)))
            );
        }
        assert_eq!(translate(key(KeyCode::Char('w'), KeyEventKind::Release)), None);
    }

    #[test]
    fn arrows_press_and_release() {
        assert_eq!(
            translate(key(KeyCode::Up, KeyEventKind::Press)),
            Some(TerminalInput::Operator(InputEvent::ButtonPressed(
                ControlId::Forward
            )))
        );
        assert_eq!(translate(key(KeyCode::Up, KeyEventKind::Repeat)), None);
        assert_eq!(
            translate(key(KeyCode::Up, KeyEventKind::Release)),
            Some(TerminalInput::Operator(InputEvent::ButtonReleased(
                ControlId::Forward
            )))
        );
    }

    #[test]
    fn buttons_click_once() {
        assert_eq!(
            translate(key(KeyCode::F(3), KeyEventKind::Press)),
            Some(TerminalInput::Operator(InputEvent::ButtonClicked(
                ControlId::Autonomy
            )))
        );
        assert_eq!(translate(key(KeyCode::F(3), KeyEventKind::Repeat)), None);
        assert_eq!(
            translate(key(KeyCode::Char('1'), KeyEventKind::Press)),
            Some(TerminalInput::Operator(InputEvent::ButtonClicked(
                ControlId::Dig
            )))
        );
    }

    #[test]
    fn exit_keys() {
        assert_eq!(
            translate(key(KeyCode::Char('q'), KeyEventKind::Press)),
            Some(TerminalInput::Exit)
        );
        assert_eq!(
            translate(KeyEvent {
                modifiers: KeyModifiers::CONTROL,
                ..key(KeyCode::Char('c'), KeyEventKind::Press)
            }),
            Some(TerminalInput::Exit)
        );
        assert_eq!(translate(key(KeyCode::Esc, KeyEventKind::Release)), None);
    }
}
