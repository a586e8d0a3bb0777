//! Operator console for the mining robot
//!
//! The core is the [`coordinator::Coordinator`], it decides which of the autonomous and teleop
//! command channels may talk to the executor and in what order.

#![warn(meta_variable_misuse)]

pub mod channel;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod event;
pub mod events;
pub mod input;
pub mod link;
pub mod panel;
pub mod retry;
pub mod sim;
pub mod status_log;
pub mod systems;
pub mod watchdog;
