//! Scrape state machine.
//!
//! ```text
//! Idle → Connecting → Querying → Scanning → Tagging → Recording → Closed
//!          │            │          │          │          │
//!          └────────────┴──────────┴──────────┴──────────┴──→ Failed
//! ```
//!
//! `Closed` is reachable from every non-terminal state; `Failed` is
//! entered once the connection (if any) has been released.

use std::fmt;

use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrapePhase {
    Idle,
    Connecting,
    Querying,
    Scanning,
    Tagging,
    Recording,
    Closed,
    Failed,
}

impl ScrapePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    pub fn can_transition_to(self, next: ScrapePhase) -> bool {
        use ScrapePhase::*;
        match (self, next) {
            (Closed | Failed, _) => false,
            (_, Closed) => true,
            (Idle, Connecting) => true,
            (Connecting, Querying) => true,
            (Querying, Scanning) => true,
            (Scanning, Tagging) => true,
            (Tagging, Recording) => true,
            (Connecting | Querying | Scanning | Tagging | Recording, Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Querying => "querying",
            Self::Scanning => "scanning",
            Self::Tagging => "tagging",
            Self::Recording => "recording",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ScrapePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase tracker for one scrape invocation.
#[derive(Debug)]
pub(crate) struct PhaseTracker {
    phase: ScrapePhase,
    history: Vec<ScrapePhase>,
}

impl PhaseTracker {
    pub(crate) fn new() -> Self {
        Self {
            phase: ScrapePhase::Idle,
            history: vec![ScrapePhase::Idle],
        }
    }

    pub(crate) fn current(&self) -> ScrapePhase {
        self.phase
    }

    pub(crate) fn advance(&mut self, next: ScrapePhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "invalid scrape transition {} -> {}",
            self.phase,
            next
        );
        debug!(from = %self.phase, to = %next, "scrape phase");
        self.phase = next;
        self.history.push(next);
    }

    pub(crate) fn into_history(self) -> Vec<ScrapePhase> {
        self.history
    }
}
