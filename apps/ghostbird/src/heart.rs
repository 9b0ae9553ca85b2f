use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::trace;

use crate::runner::api::{Beat, Heart};

/// Ticks on a tokio interval for as long as a session runs.
pub struct IntervalHeart {
    period: Duration,
    active: Arc<AtomicUsize>,
}

impl IntervalHeart {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of beats started and not yet stopped.
    pub fn active_beats(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl Heart for IntervalHeart {
    /// Must be called from within a Tokio runtime.
    fn start_beat(&self) -> Beat {
        let period = self.period;
        let active = self.active.clone();
        active.fetch_add(1, Ordering::SeqCst);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                trace!("heartbeat");
            }
        });
        Beat::new(move || {
            task.abort();
            active.fetch_sub(1, Ordering::SeqCst);
        })
    }
}
