use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Message, MessageState};

/// Number of stored messages per derived state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub scheduled: usize,
    pub leased: usize,
    pub completed: usize,
    pub poisoned: usize,
}

impl QueueCounts {
    pub fn tally<'a, T: 'a>(
        messages: impl IntoIterator<Item = &'a Message<T>>,
        now: DateTime<Utc>,
        max_delivery_count: u32,
    ) -> Self {
        let mut counts = Self::default();
        for message in messages {
            match message.state(now, max_delivery_count) {
                MessageState::Pending => counts.pending += 1,
                MessageState::Scheduled => counts.scheduled += 1,
                MessageState::Leased => counts.leased += 1,
                MessageState::Completed => counts.completed += 1,
                MessageState::Poisoned => counts.poisoned += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.scheduled + self.leased + self.completed + self.poisoned
    }
}
