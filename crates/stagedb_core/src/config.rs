//! Stack configuration.

use crate::context::MergePolicy;

/// Configuration for a stack.
#[derive(Debug, Clone)]
pub struct Config {
    /// How a child's staged values combine with its parent's on save.
    pub merge_policy: MergePolicy,

    /// How many save events the save feed retains for polling.
    pub feed_history: usize,

    /// Prefix of the thread names used by asynchronous transaction queues.
    pub queue_label_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            merge_policy: MergePolicy::PropertyTrumps,
            feed_history: 1024,
            queue_label_prefix: "stagedb".to_owned(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the merge policy.
    #[must_use]
    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    /// Sets how many save events are retained.
    #[must_use]
    pub fn feed_history(mut self, events: usize) -> Self {
        self.feed_history = events;
        self
    }

    /// Sets the queue thread name prefix.
    #[must_use]
    pub fn queue_label_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.queue_label_prefix = prefix.into();
        self
    }
}
