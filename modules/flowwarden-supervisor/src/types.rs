use std::collections::BTreeSet;
use std::fmt;

use flowwarden_common::SourceKind;

use crate::context::ContextOrigin;
use crate::listener::ControlCommand;

/// Supervisor state machine phases, in cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AcquiringContext,
    Attaching,
    Waiting,
    Attached,
    Running,
    Terminated,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AcquiringContext => write!(f, "acquiring_context"),
            Self::Attaching => write!(f, "attaching"),
            Self::Waiting => write!(f, "waiting"),
            Self::Attached => write!(f, "attached"),
            Self::Running => write!(f, "running"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Why a computation was stopped from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Command(ControlCommand),
    ListenerClosed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(cmd) => write!(f, "command {cmd}"),
            Self::ListenerClosed => write!(f, "listener closed"),
        }
    }
}

/// How a running computation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Stopped(StopReason),
    Failed(String),
}

impl Termination {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Failures and listener loss pause before the next cycle. Commands
    /// restart at once.
    pub fn pauses_before_restart(&self) -> bool {
        matches!(
            self,
            Self::Failed(_) | Self::Stopped(StopReason::ListenerClosed)
        )
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped(reason) => write!(f, "stopped ({reason})"),
            Self::Failed(error) => write!(f, "failed ({error})"),
        }
    }
}

/// What happened during one supervision cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub phases: Vec<Phase>,
    pub origin: ContextOrigin,
    /// Batch sequence the context started the cycle at.
    pub start_batch_seq: u64,
    /// Batch sequence checkpointed when the cycle ended.
    pub end_batch_seq: u64,
    pub attach_attempts: u32,
    pub attached: BTreeSet<SourceKind>,
    pub termination: Termination,
}

impl CycleReport {
    pub fn batches_committed(&self) -> u64 {
        self.end_batch_seq - self.start_batch_seq
    }

    pub fn waits(&self) -> usize {
        self.phases.iter().filter(|p| **p == Phase::Waiting).count()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<&str> = self.attached.iter().map(|k| k.as_str()).collect();
        write!(
            f,
            "origin={} attach_attempts={} attached=[{}] batches_committed={} end_batch_seq={} termination={}",
            self.origin,
            self.attach_attempts,
            kinds.join(","),
            self.batches_committed(),
            self.end_batch_seq,
            self.termination,
        )
    }
}
