//! Completion latch for one-shot runs

use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct Counts {
    expected: usize,
    completed: usize,
}

/// Counts finished bands and opens once every expected band reported.
///
/// Arrivals past the expected count are ignored, and so is a second
/// opening.
#[derive(Debug)]
pub struct OneShotBarrier {
    counts: Mutex<Counts>,
    done: watch::Sender<bool>,
}

impl OneShotBarrier {
    /// A barrier for `expected` bands. Zero bands means already open.
    pub fn new(expected: usize) -> Self {
        let (done, _) = watch::channel(expected == 0);
        Self {
            counts: Mutex::new(Counts { expected, completed: 0 }),
            done,
        }
    }

    /// Start counting again for a new set of bands.
    pub fn reset(&self, expected: usize) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        *counts = Counts { expected, completed: 0 };
        self.done.send_replace(expected == 0);
    }

    /// Report one finished band.
    pub fn arrive(&self) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.completed += 1;
        tracing::debug!("One-shot progress {}/{}", counts.completed, counts.expected);
        if counts.completed >= counts.expected && !*self.done.borrow() {
            tracing::info!("All {} band(s) completed their one-shot cycle", counts.expected);
            self.done.send_replace(true);
        }
    }

    pub fn is_complete(&self) -> bool {
        *self.done.borrow()
    }

    /// Resolve once the barrier is open.
    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
