use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerAction {
    Down,
    PointerDown,
    Move,
    PointerUp,
    Up,
}

/// One input frame from the host: the action plus every tracked pointer
/// position in screen space. At most two pointers are tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointerFrame {
    pub action: PointerAction,
    pub pointers: Vec<[f32; 2]>,
    #[serde(default)]
    pub time: Duration,
}

impl PointerFrame {
    pub const MAX_POINTERS: usize = 2;

    pub fn new(action: PointerAction, pointers: &[[f32; 2]], time: Duration) -> Self {
        Self {
            action,
            pointers: pointers.iter().take(Self::MAX_POINTERS).copied().collect(),
            time,
        }
    }

    pub fn pointer_count(&self) -> usize {
        self.pointers.len().min(Self::MAX_POINTERS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingState {
    #[default]
    Idle,
    Tracking1,
    Tracking2,
}

impl TrackingState {
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => TrackingState::Idle,
            1 => TrackingState::Tracking1,
            _ => TrackingState::Tracking2,
        }
    }
}
