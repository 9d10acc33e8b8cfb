use std::fmt;
use std::time::Duration;

use crate::structs::{Container, ImageName};

/// What an action does to its target
///
/// `Create` carries the declared spec it realizes; `Remove`/`Stop` carry
/// the observed engine id they act on. `Start` resolves state-only drift
/// (right digest, wrong state) without a recreate, as does `Stop`.
#[derive(Clone, Debug)]
pub enum Op {
    EnsureImage(ImageName),
    Create(Box<Container>),
    Remove {
        id: String,
        kill_timeout: Duration,
    },
    Start {
        id: String,
    },
    Stop {
        id: String,
        kill_timeout: Duration,
    },
    WaitFor {
        window: Duration,
    },
    NoAction,
}

impl Op {
    pub fn kind(&self) -> &'static str {
        match self {
            Op::EnsureImage(_) => "ensure_image",
            Op::Create(_) => "create",
            Op::Remove { .. } => "remove",
            Op::Start { .. } => "start",
            Op::Stop { .. } => "stop",
            Op::WaitFor { .. } => "wait_for",
            Op::NoAction => "no_action",
        }
    }

    /// Whether executing this op mutates the engine
    pub fn mutates(&self) -> bool {
        match self {
            Op::NoAction | Op::WaitFor { .. } => false,
            _ => true,
        }
    }
}

/// One step of a plan: an operation, its target and the reason it is there
#[derive(Clone, Debug)]
pub struct Action {
    pub op: Op,
    /// Full container name, or image reference for `EnsureImage`
    pub target: String,
    pub reason: String,
}

impl Action {
    pub fn new(op: Op, target: &str, reason: &str) -> Self {
        Action {
            op,
            target: target.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.op.kind(), self.target, self.reason)
    }
}

/// An ordered sequence of actions produced by the differ
///
/// Order is binding: the runner must not reorder what the differ emitted.
#[derive(Clone, Debug, Default)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn is_converged(&self) -> bool {
        self.actions.iter().all(|a| !a.op.mutates())
    }

    /// Count of actions that will touch the engine
    pub fn changes(&self) -> usize {
        self.actions.iter().filter(|a| a.op.mutates()).count()
    }
}
