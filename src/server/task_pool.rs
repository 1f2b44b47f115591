// Copyright (c) 2026 The Scamper developers
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>,
// at your option. All files in the project carrying such
// notice may not be copied, modified, or distributed except
// according to those terms.

//! The server's bounded worker pool.
//!
//! A fixed set of worker threads drains a bounded queue of items through
//! one worker function. When the queue is full the submission is refused
//! and the item comes back to the caller, so the acceptor can answer `503`
//! instead of queueing without bound. Dropping the pool closes the queue;
//! workers finish what is in flight and exit.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::trace;

/// Outcome of a submission attempt.
pub(crate) enum Submit<T> {
    Queued,
    /// Queue full; the item comes back to the caller.
    Saturated(T),
}

pub(crate) struct TaskPool<T: Send + 'static> {
    sender: Option<Sender<T>>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl<T: Send + 'static> TaskPool<T> {
    /// Spawns `pool_size` workers, each running `work` over queued items.
    pub fn new<F>(pool_size: usize, queue_size: usize, work: F) -> TaskPool<T>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let (sender, receiver) = bounded::<T>(queue_size.max(1));
        let work = Arc::new(work);

        let workers = (0..pool_size.max(1))
            .map(|n| {
                let receiver: Receiver<T> = receiver.clone();
                let work = work.clone();
                thread::Builder::new()
                    .name(format!("scamper-worker-{}", n))
                    .spawn(move || {
                        for item in receiver.iter() {
                            work(item);
                        }
                        trace!("worker exiting");
                    })
                    .unwrap_or_else(|e| panic!("failed to spawn worker thread: {}", e))
            })
            .collect();

        TaskPool {
            sender: Some(sender),
            workers,
        }
    }

    /// Queues an item unless the queue is at capacity.
    pub fn try_execute(&self, item: T) -> Submit<T> {
        let sender = match &self.sender {
            Some(sender) => sender,
            None => return Submit::Saturated(item),
        };
        match sender.try_send(item) {
            Ok(()) => Submit::Queued,
            Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => {
                Submit::Saturated(item)
            }
        }
    }

    /// Closes the queue and waits for the workers to drain it.
    pub fn shutdown(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl<T: Send + 'static> Drop for TaskPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_submitted_items() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sum = counter.clone();
        let mut pool = TaskPool::new(2, 8, move |n: usize| {
            sum.fetch_add(n, Ordering::SeqCst);
        });
        for n in 1..=8 {
            assert!(matches!(pool.try_execute(n), Submit::Queued));
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 36);
    }

    #[test]
    fn refuses_when_saturated() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (running_tx, running_rx) = mpsc::channel::<()>();
        let release_rx = std::sync::Mutex::new(release_rx);
        let running_tx = std::sync::Mutex::new(running_tx);

        let mut pool = TaskPool::new(1, 1, move |block: bool| {
            if block {
                running_tx.lock().unwrap().send(()).unwrap();
                release_rx.lock().unwrap().recv().unwrap();
            }
        });

        // Occupy the single worker...
        pool.try_execute(true);
        running_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // ...and fill the single queue slot.
        pool.try_execute(false);

        assert!(matches!(pool.try_execute(false), Submit::Saturated(false)));

        release_tx.send(()).unwrap();
        pool.shutdown();
    }
}
