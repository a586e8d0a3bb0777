use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread::Scope,
};

use anyhow::Context;
use tracing::info;

use crate::{
    event::Event,
    events::{EventHandle, EventSender},
};

use super::{Console, System};

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Turns Ctrl-C into a stop request
pub struct StopSystem;

impl System for StopSystem {
    const NAME: &'static str = "Stop";

    fn start<'scope, 'env>(
        _console: &'env Console,
        mut events: EventHandle,
        _spawner: &'scope Scope<'scope, 'env>,
    ) -> anyhow::Result<()> {
        let _ = events.take_listner();
        let events = events.sender();

        ctrlc::set_handler(move || request_stop(&events, "interrupted"))
            .context("Set ctrl-c")?;

        Ok(())
    }
}

/// Raises the process-wide stop flag and tells every system to exit
pub fn request_stop(events: &EventSender, reason: &str) {
    if !STOP_REQUESTED.swap(true, Ordering::AcqRel) {
        info!(reason, "Stop requested");
    }
    events.send(Event::Exit);
}

pub fn stop_requested() -> bool {
    STOP_REQUESTED.load(Ordering::Acquire)
}
