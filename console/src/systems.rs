//! Thread systems of the console binary, connected by the event bus

pub mod control;
pub mod display;
pub mod input;
pub mod stop;

use crate::coordinator::Coordinator;
use crate::event::Event;
use crate::events::{Backlog, EventHandle, EventSender};
use crate::link::Link;
use crate::panel::Panel;
use crate::sim::SimExecutor;
use anyhow::Context;
use std::sync::Arc;
use std::thread::{self, Scope};
use tracing::info;

/// Whoever is executing the commands, kept alive for as long as the console runs
pub enum Executor {
    Sim(SimExecutor),
    Link(Link),
}

pub struct Console {
    pub coordinator: Arc<Coordinator>,
    pub panel: Arc<Panel>,
    pub executor: Executor,
}

pub trait System {
    const NAME: &'static str;
    const BACKLOG: Backlog = Backlog::Bounded;

    fn start<'scope, 'env>(
        console: &'env Console,
        events: EventHandle,
        spawner: &'scope Scope<'scope, 'env>,
    ) -> anyhow::Result<()>;
}

type StartFn = for<'scope, 'env> fn(
    &'env Console,
    EventHandle,
    &'scope Scope<'scope, 'env>,
) -> anyhow::Result<()>;

#[derive(Default)]
pub struct SystemManager {
    systems: Vec<(&'static str, Backlog, StartFn)>,
}

impl SystemManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_system<S: System>(&mut self) {
        info!("Adding system: {}", S::NAME);
        self.systems.push((S::NAME, S::BACKLOG, S::start));
    }

    /// Builds the console with a handle to the bus and runs every system until they all exit
    pub fn start(
        self,
        setup: impl FnOnce(EventSender) -> anyhow::Result<Console>,
    ) -> anyhow::Result<Console> {
        let listners: Vec<_> = self
            .systems
            .iter()
            .map(|(name, backlog, _)| (*name, *backlog))
            .collect();
        let handles = EventHandle::create(&listners);
        let sender = handles
            .first()
            .map(EventHandle::sender)
            .context("No systems registered")?;

        let console = setup(sender.clone()).context("Set up console")?;

        thread::scope(|scope| {
            for ((name, _, start), handle) in self.systems.into_iter().zip(handles) {
                let ret = start(&console, handle, scope).with_context(|| format!("Start {name}"));
                if ret.is_err() {
                    sender.send(Event::Exit);
                    return ret;
                }
            }

            info!("All systems started");
            Ok(())
        })?;

        Ok(console)
    }
}
