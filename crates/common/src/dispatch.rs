//! Consumer-designated execution context for callbacks
//!
//! A [`DispatchQueue`] is a FIFO of jobs. Producers only ever enqueue; jobs
//! run either on the queue's own thread ([`DispatchQueue::spawn`]) or on
//! whichever thread pumps the queue ([`DispatchQueue::manual`] +
//! [`DispatchQueue::drain`]), which is how a UI run loop would consume it.
//!
//! Jobs enqueued from one thread run in the order they were enqueued.

use async_channel::{Receiver, Sender, unbounded};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// FIFO job queue bound to one execution context
#[derive(Clone)]
pub struct DispatchQueue {
    label: Arc<str>,
    tx: Sender<Job>,
    rx: Receiver<Job>,
}

impl DispatchQueue {
    /// Queue pumped by its owner via [`DispatchQueue::drain`]
    pub fn manual(label: &str) -> Self {
        let (tx, rx) = unbounded();
        Self {
            label: Arc::from(label),
            tx,
            rx,
        }
    }

    /// Queue served by a dedicated thread
    ///
    /// The thread exits once every clone of the returned queue is dropped
    /// and the remaining jobs have run.
    pub fn spawn(label: &str) -> crate::Result<(Self, JoinHandle<()>)> {
        let queue = Self::manual(label);
        let rx = queue.rx.clone();
        let thread_label = queue.label.clone();

        let handle = std::thread::Builder::new()
            .name(label.to_string())
            .spawn(move || {
                debug!("Dispatch queue '{}' started", thread_label);
                while let Ok(job) = rx.recv_blocking() {
                    job();
                }
                debug!("Dispatch queue '{}' stopped", thread_label);
            })?;

        Ok((queue, handle))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Enqueue a job; never runs it inline
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(e) = self.tx.try_send(Box::new(job)) {
            warn!("Dispatch queue '{}' rejected job: {}", self.label, e);
        }
    }

    /// Run every job queued so far on the calling thread
    ///
    /// Returns the number of jobs run.
    pub fn drain(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Number of jobs waiting to run
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("label", &self.label)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_manual_queue_is_fifo_and_deferred() {
        let queue = DispatchQueue::manual("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = seen.clone();
            queue.dispatch(move || seen.lock().unwrap().push(i));
        }

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(queue.pending(), 5);
        assert_eq!(queue.drain(), 5);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.drain(), 0);
    }

    #[test]
    fn test_spawned_queue_runs_on_its_thread() {
        let (queue, handle) = DispatchQueue::spawn("test-dispatch").unwrap();
        let (tx, rx) = mpsc::channel();

        queue.dispatch(move || {
            let name = std::thread::current().name().map(str::to_string);
            tx.send(name).unwrap();
        });

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("test-dispatch"));

        drop(queue);
        handle.join().unwrap();
    }
}
