use crate::service::{ServiceRequest, ServiceResponse};
use crate::status::StatusEvent;
use crate::types::{ChannelKind, Goal, GoalId, GoalState};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Representation of all messages that can be communicated between the console and the executor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Packet {
    /// Queues a goal on one of the executor's command channels
    SubmitGoal {
        channel: ChannelKind,
        id: GoalId,
        goal: Goal,
    },
    /// Cancels every goal the executor is tracking on a channel
    CancelAll { channel: ChannelKind },
    /// Lifecycle update for a previously submitted goal
    GoalState {
        channel: ChannelKind,
        id: GoalId,
        state: GoalState,
    },
    /// Invokes a named service, the name is sent as a string to keep it exact on the wire
    ServiceCall {
        id: u64,
        service: String,
        request: ServiceRequest,
    },
    /// Answer to a `ServiceCall` with the same id
    ServiceReply {
        id: u64,
        response: Result<ServiceResponse, String>,
    },
    /// Status message from the robot
    Status(StatusEvent),
    /// Asks the peer to reply with a Pong, used to measure communication latency
    Ping(SystemTime),
    /// Response to a Ping, used to measure communication latency
    Pong(SystemTime, SystemTime),
}

impl TryInto<Vec<u8>> for &Packet {
    type Error = anyhow::Error;

    fn try_into(self) -> Result<Vec<u8>, Self::Error> {
        bincode::serialize(self).context("Encode packet")
    }
}

impl TryFrom<&[u8]> for Packet {
    type Error = anyhow::Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        bincode::deserialize(bytes).context("Decode packet")
    }
}
