//! Derived message state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a message, inferred from its fields.
///
/// Nothing stores this value; it is computed by `Message::state` from
/// `Completed`, `LockedUntil`, `DeliveryCount` and `ScheduledEnqueueTime`.
///
/// Transitions:
/// - Pending -> Leased (dequeue, DeliveryCount + 1)
/// - Leased -> Completed (complete, or auto-complete at dequeue)
/// - Leased -> Pending / Scheduled (fail, or the lease runs out)
/// - Leased -> Poisoned (lease ends with DeliveryCount at the maximum)
/// - Completed -> Pending / Scheduled (fail reverts an optimistic completion)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageState {
    /// Eligible for dequeue now.
    Pending,

    /// Waiting for its `ScheduledEnqueueTime` (delayed delivery or backoff).
    Scheduled,

    /// Hidden by an active lease.
    Leased,

    /// Processed successfully.
    Completed,

    /// Delivery attempts exhausted; never delivered again.
    Poisoned,
}
