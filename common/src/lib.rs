//! Code shared between the mission control console and the robot's command executor

pub mod error;
pub mod network;
pub mod protocol;
pub mod service;
pub mod status;
pub mod types;
