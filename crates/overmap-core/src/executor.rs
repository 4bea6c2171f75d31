use std::collections::VecDeque;
use std::sync::Mutex;

pub type OwnerTask = Box<dyn FnOnce() + Send>;

/// Submits work to the single context allowed to create, upload to, or release display
/// resources.
///
/// Submission is fire-and-forget: background code never blocks waiting for a submitted task to
/// run, and tasks are expected to eventually execute on the owner context in submission order.
pub trait OwnerExecutor: Send + Sync {
    fn submit(&self, task: OwnerTask);
}

/// Runs every task inline on the submitting thread.
///
/// Only correct when the submitting thread *is* the owner context, e.g. single-threaded hosts
/// and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl OwnerExecutor for InlineExecutor {
    fn submit(&self, task: OwnerTask) {
        task();
    }
}

/// Queues tasks until the owner context drains them, typically once per frame.
#[derive(Default)]
pub struct QueuedExecutor {
    tasks: Mutex<VecDeque<OwnerTask>>,
}

impl QueuedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs all queued tasks on the calling thread. Must only be called from the owner context.
    pub fn drain(&self) {
        loop {
            let task = self.tasks.lock().unwrap().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
    }

    pub fn queued_len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

impl OwnerExecutor for QueuedExecutor {
    fn submit(&self, task: OwnerTask) {
        self.tasks.lock().unwrap().push_back(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn queued_executor_runs_in_submission_order() {
        let executor = QueuedExecutor::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            executor.submit(Box::new(move || order.lock().unwrap().push(i)));
        }
        assert_eq!(executor.queued_len(), 3);
        executor.drain();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(executor.queued_len(), 0);
    }

    #[test]
    fn inline_executor_runs_immediately() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        InlineExecutor.submit(Box::new(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
