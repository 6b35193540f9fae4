//! Delivery-state machine for a single message.
//!
//! Forward chain: `sending → sent → delivered → read`.  `error` is reachable
//! from `sending` only and leads back to `sending` on resend.  Nothing else
//! skips a step.

use spotter_shared::MessageStatus;

/// Outcome of applying a target status to a current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied {
        from: MessageStatus,
        to: MessageStatus,
    },
    /// Same state, or the message is already further along.
    Unchanged,
    Rejected {
        from: MessageStatus,
        to: MessageStatus,
    },
}

impl StatusChange {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Decide how `current` reacts to `target`.
pub fn progress(current: MessageStatus, target: MessageStatus) -> StatusChange {
    use MessageStatus::*;

    let applied = StatusChange::Applied {
        from: current,
        to: target,
    };
    let rejected = StatusChange::Rejected {
        from: current,
        to: target,
    };

    match (current, target) {
        (Sending, Error) | (Error, Sending) => applied,
        (Error, Error) => StatusChange::Unchanged,
        // Error is terminal for every forward target until a resend.
        (Error, _) | (_, Error) => rejected,
        _ => {
            // Both on the forward chain here.
            let (Some(from), Some(to)) = (current.rank(), target.rank()) else {
                return rejected;
            };
            if to <= from {
                StatusChange::Unchanged
            } else if to == from + 1 {
                applied
            } else {
                rejected
            }
        }
    }
}
