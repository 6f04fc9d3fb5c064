//! Request/response transport to the motion controller.
//!
//! Every call is one bounded exchange. Nothing in this layer retries: the
//! poll loop can shrug off a missed beat, but a command that may not have
//! been delivered must reach the operator.

mod sim;
mod tcp;

pub use sim::{HeldFetch, SimulatedLink};
pub use tcp::TcpLink;

use crate::error::Result;
use crate::types::{Axis, LimitFlags, MotionState};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// State as reported by the controller. Never `Unknown`; that only exists
/// in the registry before the first reading lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Moving,
    Fault,
}

impl From<ControllerState> for MotionState {
    fn from(s: ControllerState) -> Self {
        match s {
            ControllerState::Idle => MotionState::Idle,
            ControllerState::Moving => MotionState::Moving,
            ControllerState::Fault => MotionState::Fault,
        }
    }
}

/// One fetch result, in the controller's native pulse frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    pub state: ControllerState,
    pub position_pulse: i64,
}

#[async_trait]
pub trait ControllerLink: Send + Sync {
    async fn fetch_state_and_position(&self, axis: &Axis) -> Result<Reading>;

    /// Resolves once the controller acknowledged the move request, not when
    /// the motion completes.
    async fn put_position(&self, axis: &Axis, pulse: i64) -> Result<()>;

    async fn put_stop(&self, axis: &Axis) -> Result<()>;

    /// Limit and home switches. Not every axis supports the query.
    async fn fetch_status(&self, axis: &Axis) -> Result<LimitFlags>;
}
