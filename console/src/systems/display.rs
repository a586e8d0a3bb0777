use std::{
    io::{self, Write},
    thread::Scope,
    time::Duration,
};

use anyhow::Context;
use crossterm::{execute, terminal::SetTitle};
use tracing::{error, span, Level};

use crate::{event::Event, events::EventHandle, panel::PanelUpdate};

use super::{input::KEY_HELP, Console, System};

/// Prints status lines, panel changes and errors, shows the mission clock in the title bar
pub struct DisplaySystem;

impl System for DisplaySystem {
    const NAME: &'static str = "Display";

    fn start<'scope, 'env>(
        console: &'env Console,
        mut events: EventHandle,
        spawner: &'scope Scope<'scope, 'env>,
    ) -> anyhow::Result<()> {
        let listner = events.take_listner().context("Listner taken")?;

        spawner.spawn(move || {
            let _span = span!(Level::INFO, "Display").entered();

            for line in KEY_HELP {
                print_line(line);
            }

            let mut shown_secs = None;

            for event in listner.into_iter() {
                match &*event {
                    Event::Status(status) => {
                        let line = console.coordinator.on_status(status);
                        print_line(&line);
                    }
                    Event::Panel(PanelUpdate::Enabled(control, enabled)) => {
                        let state = if *enabled { "enabled" } else { "disabled" };
                        print_line(&format!("  {control:?} {state}"));
                    }
                    Event::Panel(PanelUpdate::TimeRemaining(remaining)) => {
                        let secs = remaining.as_secs();
                        if shown_secs != Some(secs) {
                            shown_secs = Some(secs);
                            let title = format!("mission-control {}", format_clock(*remaining));
                            let _ = execute!(io::stdout(), SetTitle(title));
                        }
                    }
                    Event::ExecutorConnected(addrs) => {
                        print_line(&format!("Connected to executor at {addrs}"));
                    }
                    Event::ExecutorDisconnected => {
                        print_line("Executor disconnected");
                    }
                    Event::Error(err) => {
                        error!("Encountered error: {err:?}");
                        print_line(&format!("Error: {err:#}"));
                    }
                    Event::Exit => break,
                    Event::Input(_) => {}
                }
            }
        });

        Ok(())
    }
}

/// The terminal is in raw mode, every line needs its own carriage return
fn print_line(line: &str) {
    let mut out = io::stdout().lock();
    let _ = write!(out, "{line}\r\n");
    let _ = out.flush();
}

/// `mm:ss`, rounded down
pub fn format_clock(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_format() {
        assert_eq!(format_clock(Duration::from_secs(600)), "10:00");
        assert_eq!(format_clock(Duration::from_millis(61_900)), "01:01");
        assert_eq!(format_clock(Duration::ZERO), "00:00");
    }
}
