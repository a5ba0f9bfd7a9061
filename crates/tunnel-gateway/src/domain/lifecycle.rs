//! Request lifecycle.
//!
//! ```text
//! Discovered ──→ AdmissionChecked ──→ Executing ──→ Completed ──→ PublishPending ──→ Published
//!                       │                              ↑              │  ↺ retry
//!                       └──────── rejected ────────────┘              └──→ Abandoned (retry cap)
//! ```

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovered,
    AdmissionChecked,
    Executing,
    Completed,
    PublishPending,
    Published,
    Abandoned,
}

impl Stage {
    /// Whether `self → next` is a legal transition
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Discovered, AdmissionChecked)
                | (AdmissionChecked, Executing)
                | (AdmissionChecked, Completed)
                | (Executing, Completed)
                | (Completed, PublishPending)
                | (PublishPending, PublishPending)
                | (PublishPending, Published)
                | (PublishPending, Abandoned)
        )
    }

    /// Advance, or report the illegal transition
    pub fn advance(self, next: Stage) -> Result<Stage, InvalidTransition> {
        if self.can_advance_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Published | Stage::Abandoned)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Discovered => "discovered",
            Stage::AdmissionChecked => "admission_checked",
            Stage::Executing => "executing",
            Stage::Completed => "completed",
            Stage::PublishPending => "publish_pending",
            Stage::Published => "published",
            Stage::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid lifecycle transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: Stage,
    pub to: Stage,
}
