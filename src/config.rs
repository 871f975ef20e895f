use crate::policy::PollIntervals;
use crate::state::IdleThresholds;
use crate::transport::DEFAULT_BAUD_RATE;
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: &str = "/dev/cu.usbserial-14410";
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 64;
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
pub const DEFAULT_REQUEST_CAPACITY: usize = 16;

/// Runtime configuration for one desk. Built from command-line flags and
/// never written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeskConfig {
    pub port: String,
    pub baud_rate: u32,
    pub poll: PollIntervals,
    pub idle: IdleThresholds,
    pub snapshot_capacity: usize,
    pub event_capacity: usize,
    pub request_capacity: usize,
}

impl Default for DeskConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            poll: PollIntervals::default(),
            idle: IdleThresholds::default(),
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            request_capacity: DEFAULT_REQUEST_CAPACITY,
        }
    }
}

impl DeskConfig {
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    pub fn with_idle_thresholds(mut self, free: u32, preset: u32) -> Self {
        self.idle = IdleThresholds { free, preset };
        self
    }
}
