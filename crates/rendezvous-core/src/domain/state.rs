//! State - listener generation の状態
//!
//! # 状態遷移
//! - Starting -> Running -> Stopped（close による正常終了）
//! - Starting -> Running -> Failed -> Repairing（子 generation を起動）
//! - Failed（親がいる場合は親に報告して終了）
//!
//! The stable handle adds `Terminated`: the chain gave up after a failed
//! repair and no generation is running.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Starting,
    Running,
    Stopped,
    Failed,
    Repairing,
}

/// What the stable handle reports to the rest of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerState {
    /// The current generation is binding or accepting.
    Active {
        generation: u64,
        state: GenerationState,
    },
    /// `close()` was called and the last generation stopped.
    Stopped,
    /// Repair failed; no generation is running.
    Terminated,
}

impl ListenerState {
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ListenerState::Active {
                state: GenerationState::Running,
                ..
            }
        )
    }

    pub fn generation(self) -> Option<u64> {
        match self {
            ListenerState::Active { generation, .. } => Some(generation),
            _ => None,
        }
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerState::Active { generation, state } => {
                write!(f, "generation {generation} {state:?}")
            }
            ListenerState::Stopped => f.write_str("stopped"),
            ListenerState::Terminated => f.write_str("terminated"),
        }
    }
}
