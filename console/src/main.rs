//! Mission control console for the mining robot

use std::{io, sync::Arc};

use anyhow::Context;
use console::{
    channel::{CommandChannel, ServiceChannel},
    config::Args,
    coordinator::Coordinator,
    event::Event,
    events::EventSender,
    link::{Link, LinkEvent},
    panel::Panel,
    sim::{SimExecutor, SimTiming},
    systems::{
        control::ControlSystem, display::DisplaySystem, input::InputSystem, stop::StopSystem,
        Console, Executor, SystemManager,
    },
};
use tracing::info;

fn main() -> anyhow::Result<()> {
    let args = Args::parse_args()?;

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(io::stderr)
        .init();
    info!("Starting mission control");

    let mut systems = SystemManager::new();

    info!("---------- Registering systems ----------");
    systems.add_system::<StopSystem>();
    systems.add_system::<DisplaySystem>();
    systems.add_system::<ControlSystem>();
    systems.add_system::<InputSystem>();
    info!("-----------------------------------------");

    let console = systems.start(|events| build_console(&args, events))?;

    console.coordinator.shutdown();
    info!("Mission control stopped");

    Ok(())
}

fn build_console(args: &Args, events: EventSender) -> anyhow::Result<Console> {
    let panel = Arc::new(Panel::new({
        let events = events.clone();
        move |update| events.send(Event::Panel(update))
    }));

    let (teleop, autonomy, services, executor): (
        Arc<dyn CommandChannel>,
        Arc<dyn CommandChannel>,
        Arc<dyn ServiceChannel>,
        Executor,
    ) = if args.sim {
        info!("Using the simulated executor");

        let sim = SimExecutor::start(SimTiming::default(), move |status| {
            events.send(Event::Status(status))
        })
        .context("Start simulated executor")?;

        (
            sim.teleop(),
            sim.autonomy(),
            sim.services(),
            Executor::Sim(sim),
        )
    } else {
        let link = Link::connect(&args.executor, args.service_timeout(), move |event| {
            let event = match event {
                LinkEvent::Connected(addrs) => Event::ExecutorConnected(addrs),
                LinkEvent::Disconnected => Event::ExecutorDisconnected,
                LinkEvent::Status(status) => Event::Status(status),
            };
            events.send(event);
        })
        .context("Link to executor")?;

        (
            link.teleop(),
            link.autonomy(),
            link.services(),
            Executor::Link(link),
        )
    };

    let coordinator = Coordinator::new(teleop, autonomy, services, panel.clone(), args.coordinator())
        .context("Create coordinator")?;

    Ok(Console {
        coordinator: Arc::new(coordinator),
        panel,
        executor,
    })
}
