//! Save feed for observing master saves.
//!
//! Master emits one [`SaveEvent`] per successful store save while it still
//! holds its serial queue, so every subscriber sees saves in completion
//! order. The read context is always subscribed; applications may subscribe
//! too, to mirror saves elsewhere or keep an audit trail.
//!
//! # Usage
//!
//! ```rust,ignore
//! let receiver = stack.subscribe()?;
//!
//! std::thread::spawn(move || {
//!     while let Ok(event) = receiver.recv() {
//!         println!("save {}: {} updated", event.sequence, event.updated.len());
//!     }
//! });
//! ```

use parking_lot::RwLock;
use serde::Serialize;
use stagedb_store::{ObjectId, SaveReceipt};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};

/// The identities one master save inserted, updated and deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveEvent {
    /// Store sequence of the save.
    pub sequence: u64,
    /// Inserted identities.
    pub inserted: Vec<ObjectId>,
    /// Updated identities.
    pub updated: Vec<ObjectId>,
    /// Deleted identities.
    pub deleted: Vec<ObjectId>,
}

impl SaveEvent {
    /// Returns the number of identities in the event.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    /// Returns `true` if the event carries no identities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&SaveReceipt> for SaveEvent {
    fn from(receipt: &SaveReceipt) -> Self {
        Self {
            sequence: receipt.sequence,
            inserted: receipt.inserted.clone(),
            updated: receipt.updated.clone(),
            deleted: receipt.deleted.clone(),
        }
    }
}

/// Fan-out of master save events.
///
/// Each subscriber owns one channel end. The last `max_history` events are
/// also retained so a late reader can catch up by sequence.
pub struct SaveFeed {
    subscribers: RwLock<Vec<Sender<SaveEvent>>>,
    history: RwLock<VecDeque<SaveEvent>>,
    max_history: usize,
}

impl SaveFeed {
    /// Creates a feed retaining at most `max_history` events.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::with_capacity(max_history.min(1024))),
            max_history,
        }
    }

    /// Opens a channel that receives every event emitted from now on.
    pub fn subscribe(&self) -> Receiver<SaveEvent> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers.write().push(sender);
        receiver
    }

    /// Records `event` and hands a copy to every live subscriber.
    ///
    /// Subscribers whose receiver was dropped are forgotten here.
    pub fn emit(&self, event: SaveEvent) {
        {
            let mut history = self.history.write();
            if history.len() == self.max_history {
                history.pop_front();
            }
            if self.max_history > 0 {
                history.push_back(event.clone());
            }
        }
        self.subscribers
            .write()
            .retain(|sender| sender.send(event.clone()).is_ok());
    }

    /// Returns up to `limit` retained events newer than `cursor`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<SaveEvent> {
        self.history
            .read()
            .iter()
            .skip_while(|event| event.sequence <= cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the sequence of the newest retained event, or 0.
    pub fn latest_sequence(&self) -> u64 {
        self.history.read().back().map_or(0, |event| event.sequence)
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of retained events.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl std::fmt::Debug for SaveFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveFeed")
            .field("subscribers", &self.subscriber_count())
            .field("history", &self.history_len())
            .finish()
    }
}
