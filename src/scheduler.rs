use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Message delivered to the owner when an armed tick comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTick {
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchedulerStats {
    pub total_armed: u32,
    pub total_cancelled: u32,
    pub total_fired: u32,
}

#[derive(Debug)]
struct ArmedTick {
    generation: u64,
    interval: Duration,
    handle: JoinHandle<()>,
}

/// Single-slot tick scheduler.
///
/// At most one tick is pending at any time: arming always cancels the
/// previous task first. A tick that was already queued on the channel when
/// its task got cancelled is recognized as stale through its generation.
#[derive(Debug)]
pub struct TickScheduler {
    slot: Option<ArmedTick>,
    next_generation: u64,
    ticks: mpsc::Sender<ScheduledTick>,
    stats: SchedulerStats,
}

impl TickScheduler {
    pub fn new(ticks: mpsc::Sender<ScheduledTick>) -> Self {
        Self {
            slot: None,
            next_generation: 0,
            ticks,
            stats: SchedulerStats::default(),
        }
    }

    /// Cancel any pending tick and schedule a new one `interval` from now.
    /// Must be called from within a tokio runtime.
    pub fn arm(&mut self, interval: Duration) {
        self.cancel();

        self.next_generation = self.next_generation.wrapping_add(1);
        let generation = self.next_generation;
        let ticks = self.ticks.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = ticks.send(ScheduledTick { generation }).await;
        });

        trace!("armed tick #{} in {:?}", generation, interval);
        self.slot = Some(ArmedTick {
            generation,
            interval,
            handle,
        });
        self.stats.total_armed += 1;
    }

    pub fn cancel(&mut self) {
        if let Some(armed) = self.slot.take() {
            armed.handle.abort();
            self.stats.total_cancelled += 1;
        }
    }

    /// Accept a delivered tick. Returns false for ticks from a cancelled slot.
    pub fn accept(&mut self, tick: ScheduledTick) -> bool {
        match &self.slot {
            Some(armed) if armed.generation == tick.generation => {
                self.slot = None;
                self.stats.total_fired += 1;
                true
            }
            _ => {
                trace!("dropping stale tick #{}", tick.generation);
                false
            }
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot.is_some()
    }

    pub fn armed_interval(&self) -> Option<Duration> {
        self.slot.as_ref().map(|armed| armed.interval)
    }

    pub fn get_stats(&self) -> &SchedulerStats {
        &self.stats
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        if let Some(armed) = self.slot.take() {
            armed.handle.abort();
        }
    }
}
