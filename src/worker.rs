//! Background jobs with progress reporting and cooperative cancellation.
//!
//! A job runs on its own named thread and owns its partial result. It
//! reports per-unit progress through a channel and finishes with exactly one
//! [`WorkerEvent::Finished`] carrying the aggregate, even when cancelled.
//! The caller drains events from [`WorkerHandle::events`] or blocks on
//! [`WorkerHandle::wait`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::BboxeeError;

/// Shared cancel flag polled by jobs between units of work.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Message sent from a job to its owner.
#[derive(Debug)]
pub enum WorkerEvent<P, T> {
    /// One unit of work (an image or an input file) is done.
    Progress {
        index: usize,
        name: String,
        payload: P,
    },
    /// The job is over; no further events follow.
    Finished(T),
}

/// Job-side handle used to publish progress.
pub struct Reporter<P, T> {
    sender: Sender<WorkerEvent<P, T>>,
    cancel: CancelToken,
    last_index: std::cell::Cell<usize>,
}

impl<P, T> Reporter<P, T> {
    /// Creates a reporter that feeds `sender`. Jobs run inline (without
    /// [`WorkerHandle::spawn`]) use this directly.
    pub fn new(sender: Sender<WorkerEvent<P, T>>, cancel: CancelToken) -> Self {
        Self {
            sender,
            cancel,
            last_index: std::cell::Cell::new(0),
        }
    }

    /// Publishes progress for unit `index`. Indices must not decrease.
    pub fn progress(&self, index: usize, name: impl Into<String>, payload: P) {
        debug_assert!(index >= self.last_index.get(), "progress index went backwards");
        self.last_index.set(index);
        // The owner may have dropped the receiver; the job keeps going.
        let _ = self.sender.send(WorkerEvent::Progress {
            index,
            name: name.into(),
            payload,
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

/// Owner-side handle of a running job.
pub struct WorkerHandle<P, T> {
    events: Receiver<WorkerEvent<P, T>>,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl<P, T> WorkerHandle<P, T>
where
    P: Send + 'static,
    T: Send + 'static,
{
    /// Starts `job` on a new thread named `name`.
    pub fn spawn<F>(name: &str, job: F) -> Result<Self, BboxeeError>
    where
        F: FnOnce(&Reporter<P, T>) -> T + Send + 'static,
    {
        let (sender, events) = mpsc::channel();
        let cancel = CancelToken::new();
        let job_cancel = cancel.clone();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let reporter = Reporter::new(sender, job_cancel);
                let result = job(&reporter);
                let _ = reporter.sender.send(WorkerEvent::Finished(result));
            })
            .map_err(BboxeeError::Io)?;

        log::debug!("Started worker '{name}'");

        Ok(Self {
            events,
            cancel,
            thread: Some(thread),
        })
    }

    /// Event stream; ends after [`WorkerEvent::Finished`].
    pub fn events(&self) -> &Receiver<WorkerEvent<P, T>> {
        &self.events
    }

    /// Requests best-effort cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Blocks until the job finishes, passing each progress event to
    /// `on_progress`. Returns `None` only if the job panicked.
    pub fn wait(mut self, mut on_progress: impl FnMut(usize, &str, P)) -> Option<T> {
        let mut finished = None;
        for event in self.events.iter() {
            match event {
                WorkerEvent::Progress {
                    index,
                    name,
                    payload,
                } => on_progress(index, &name, payload),
                WorkerEvent::Finished(result) => {
                    finished = Some(result);
                    break;
                }
            }
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Worker thread panicked");
            }
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_precedes_finished() {
        let handle = WorkerHandle::<usize, usize>::spawn("count", |reporter| {
            for i in 0..3 {
                reporter.progress(i, format!("item{i}"), i * 10);
            }
            3
        })
        .expect("spawn");

        let mut seen = Vec::new();
        let total = handle.wait(|index, _, payload| seen.push((index, payload)));
        assert_eq!(total, Some(3));
        assert_eq!(seen, vec![(0, 0), (1, 10), (2, 20)]);
    }

    #[test]
    fn cancelled_job_still_finishes() {
        let handle = WorkerHandle::<(), usize>::spawn("cancel", |reporter| {
            let mut done = 0;
            while !reporter.is_cancelled() {
                done += 1;
                std::thread::yield_now();
            }
            done
        })
        .expect("spawn");

        handle.cancel();
        assert!(handle.wait(|_, _, _| {}).is_some());
    }
}
