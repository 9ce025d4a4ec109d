use std::fmt;
use std::ops::Range;

/// Where a submission runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Local,
    Remote,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Admission rule: local while no local job is waiting for a worker.
///
/// Evaluated per submission against a depth that may already be stale;
/// the decision is best effort.
pub fn admit(local_queue_depth: usize) -> Backend {
    if local_queue_depth == 0 {
        Backend::Local
    } else {
        Backend::Remote
    }
}

/// Static partition of `[from, to)` for worker `id` of `workers`.
///
/// Every worker gets `(to - from) / workers` indices; the last one also
/// takes the remainder.
pub fn partition(from: i64, to: i64, workers: usize, id: usize) -> Range<i64> {
    let span = (to - from) / workers as i64;
    let start = from + id as i64 * span;
    let end = if id + 1 == workers { to } else { start + span };
    start..end
}
