//! Private serial execution queues.

use parking_lot::ReentrantMutex;

/// A serial queue private to one context.
///
/// Work submitted with [`SerialQueue::perform_and_wait`] runs on the calling
/// thread but never concurrently with other work on the same queue. Nested
/// calls from work already running on the queue proceed immediately.
pub(crate) struct SerialQueue {
    label: String,
    lock: ReentrantMutex<()>,
}

impl SerialQueue {
    pub(crate) fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            lock: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn perform_and_wait<R>(&self, work: impl FnOnce() -> R) -> R {
        let _serial = self.lock.lock();
        work()
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn work_never_overlaps() {
        let queue = Arc::new(SerialQueue::new("test"));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (queue, inside, overlaps) =
                    (Arc::clone(&queue), Arc::clone(&inside), Arc::clone(&overlaps));
                thread::spawn(move || {
                    for _ in 0..50 {
                        queue.perform_and_wait(|| {
                            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn nested_work_does_not_deadlock() {
        let queue = SerialQueue::new("nested");
        let value = queue.perform_and_wait(|| queue.perform_and_wait(|| 42));
        assert_eq!(value, 42);
        assert_eq!(queue.label(), "nested");
    }
}
