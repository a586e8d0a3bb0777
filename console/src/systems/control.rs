use std::{
    sync::Arc,
    thread::{self, Scope},
};

use anyhow::Context;
use crossbeam::channel::Receiver;
use tracing::{debug, span, Level};

use crate::{
    event::Event,
    events::{Backlog, EventHandle},
    input::{InputRouter, Routed},
};

use super::{stop::stop_requested, Console, System};

/// Feeds operator input to the coordinator
pub struct ControlSystem;

impl System for ControlSystem {
    const NAME: &'static str = "Control";
    // A release queued behind a blocked mode switch must still arrive
    const BACKLOG: Backlog = Backlog::Unbounded;

    fn start<'scope, 'env>(
        console: &'env Console,
        mut events: EventHandle,
        _spawner: &'scope Scope<'scope, 'env>,
    ) -> anyhow::Result<()> {
        let listner = events.take_listner().context("Listner taken")?;
        let router = InputRouter::new(console.coordinator.clone(), console.panel.clone());

        // Detached, a transition can block on the executor for as long as it stays unreachable
        thread::Builder::new()
            .name("control".to_owned())
            .spawn(move || {
                let _span = span!(Level::INFO, "Control").entered();
                route_input(&router, &listner, &mut events);
            })
            .context("Spawn control thread")?;

        Ok(())
    }
}

/// Routes every `Event::Input` in arrival order until `Event::Exit` or a stop request
pub fn route_input(
    router: &InputRouter,
    listner: &Receiver<Arc<Event>>,
    events: &mut EventHandle,
) {
    for event in listner.iter() {
        if stop_requested() {
            break;
        }

        match &*event {
            Event::Input(input) => match router.handle(*input) {
                Ok(Routed::Dispatched) => {}
                Ok(Routed::Ignored) => debug!(?input, "Input ignored"),
                Err(err) => {
                    let err = anyhow::Error::new(err).context("Handle operator input");
                    events.send(Event::Error(err));
                }
            },
            Event::Exit => break,
            _ => {}
        }
    }
}
