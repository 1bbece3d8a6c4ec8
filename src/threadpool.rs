//! Fixed-size worker pool with a FIFO queue.
//!
//! The only producer is the event loop, and the only use is offloading the
//! destruction of large values whose ownership has already been handed
//! over, so there is no shutdown path, no completion signal and no
//! back-pressure. Workers outlive the pool handle and die with the process.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

type Work = Box<dyn FnOnce() + Send + 'static>;

pub struct ThreadPool {
    queue: Arc<(Mutex<VecDeque<Work>>, Condvar)>,
}

impl ThreadPool {
    pub fn new(num_threads: usize) -> Self {
        assert!(num_threads > 0);
        let queue: Arc<(Mutex<VecDeque<Work>>, Condvar)> =
            Arc::new((Mutex::new(VecDeque::new()), Condvar::new()));

        for _ in 0..num_threads {
            let queue = Arc::clone(&queue);
            thread::spawn(move || loop {
                let work = {
                    let (lock, not_empty) = &*queue;
                    let mut q = lock.lock().unwrap();
                    while q.is_empty() {
                        q = not_empty.wait(q).unwrap();
                    }
                    q.pop_front().expect("queue is non-empty")
                };
                work();
            });
        }

        Self { queue }
    }

    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let (lock, not_empty) = &*self.queue;
        lock.lock().unwrap().push_back(Box::new(job));
        not_empty.notify_one();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (lock, _) = &*self.queue;
        f.debug_struct("ThreadPool")
            .field("queue_len", &lock.lock().unwrap().len())
            .finish()
    }
}
