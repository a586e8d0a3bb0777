use crate::input::InputEvent;
use crate::panel::PanelUpdate;
use common::status::StatusEvent;
use std::net::SocketAddr;

/// Represents a message a system can broadcast
#[derive(Debug)]
pub enum Event {
    ExecutorConnected(SocketAddr),
    ExecutorDisconnected,

    Status(StatusEvent),
    Panel(PanelUpdate),
    Input(InputEvent),

    Error(anyhow::Error),
    Exit,
}
