// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Shared pending-task pool.
//!
//! One mutex-protected stack consumed by every worker. LIFO: the most
//! recently enqueued task runs first. No ordering across workers.

use std::sync::Mutex;

use crate::sync::lock;
use crate::task::Task;

pub(crate) struct TaskPool {
    tasks: Mutex<Vec<Task>>,
}

impl TaskPool {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, task: Task) {
        lock(&self.tasks).push(task);
    }

    /// Most recently pushed task, if any.
    pub fn pop(&self) -> Option<Task> {
        lock(&self.tasks).pop()
    }

    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recording(log: &Arc<Mutex<Vec<usize>>>, n: usize) -> Task {
        let log = log.clone();
        Task::new(move || log.lock().unwrap().push(n))
    }

    #[test]
    fn push_pop() {
        let pool = TaskPool::new();
        assert!(pool.is_empty());
        pool.push(Task::new(|| {}));
        assert_eq!(pool.len(), 1);
        assert!(pool.pop().is_some());
        assert!(pool.pop().is_none());
    }

    #[test]
    fn pops_in_lifo_order() {
        let pool = TaskPool::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for n in 0..4 {
            pool.push(recording(&log, n));
        }
        while let Some(task) = pool.pop() {
            task.run();
        }
        assert_eq!(*log.lock().unwrap(), vec![3, 2, 1, 0]);
    }

    #[test]
    fn concurrent_push() {
        let pool = Arc::new(TaskPool::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        pool.push(Task::new(|| {}));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.len(), 800);
    }
}
