use crate::protocol::{DeskButton, InboundCode};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Idle sentinels tolerated during a plain directional hold before the
/// desk is considered stopped.
pub const DEFAULT_IDLE_THRESHOLD_FREE: u32 = 2;
/// Idle sentinels tolerated while a preset is involved (the controller
/// pulses idle while accelerating toward the target).
pub const DEFAULT_IDLE_THRESHOLD_PRESET: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeskState {
    /// Reset required
    #[default]
    Invalid,
    /// Any action can be performed
    Ready,
    /// Motors are running
    Busy,
    /// Controller menu open, waiting for a preset button
    Config,
    /// Controller in low-power mode, wake-up required
    Sleep,
    /// Motor fault, no commands are sent
    Error,
}

impl DeskState {
    pub fn label(self) -> &'static str {
        match self {
            DeskState::Invalid => "invalid",
            DeskState::Ready => "ready",
            DeskState::Busy => "busy",
            DeskState::Config => "config",
            DeskState::Sleep => "sleep",
            DeskState::Error => "error",
        }
    }
}

impl core::fmt::Display for DeskState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeskControlVars {
    pub height: u16,             // Tenths of a centimeter, 0 = unknown
    pub active_button: DeskButton,
    pub active_preset: DeskButton,
    pub desired_preset: DeskButton,
    pub error_code: u16,
    pub error_message: Option<String>,
    pub idle_time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdleThresholds {
    pub free: u32,
    pub preset: u32,
}

impl Default for IdleThresholds {
    fn default() -> Self {
        Self {
            free: DEFAULT_IDLE_THRESHOLD_FREE,
            preset: DEFAULT_IDLE_THRESHOLD_PRESET,
        }
    }
}

impl IdleThresholds {
    fn for_vars(&self, vars: &DeskControlVars) -> u32 {
        if vars.active_button == DeskButton::None && vars.active_preset == DeskButton::None {
            self.free
        } else {
            self.preset
        }
    }
}

/// The transition function: fold one decoded code into the desk state.
pub fn transition(
    state: DeskState,
    vars: &DeskControlVars,
    code: u16,
    thresholds: IdleThresholds,
) -> (DeskState, DeskControlVars) {
    let mut next = vars.clone();
    let mut next_state = state;

    match InboundCode::classify(code) {
        InboundCode::Fault(fault) => {
            error!("desk reported fault {}: {}", fault.code(), fault.description());
            next_state = DeskState::Error;
            next.error_code = code;
        }

        InboundCode::ConfigEntered => {
            next_state = DeskState::Config;
        }

        InboundCode::Ready => {
            next_state = DeskState::Ready;
            next.active_button = DeskButton::None;
        }

        InboundCode::PresetReached(preset) => {
            next_state = DeskState::Config;
            next.active_preset = preset;
            next.desired_preset = DeskButton::None;
            next.active_button = DeskButton::None;
        }

        InboundCode::Height(height) => {
            // Controller drives to the preset on its own from here
            if state == DeskState::Ready && vars.active_button.is_preset() {
                next.active_button = DeskButton::None;
            }

            next_state = if state == DeskState::Invalid {
                DeskState::Ready
            } else {
                DeskState::Busy
            };
            next.height = height;
            next.idle_time = 0;
        }

        InboundCode::Idle => {
            // An idle report outside a run, or during a preset run, means the run stopped
            if state != DeskState::Busy || vars.active_button.is_preset() {
                next_state = DeskState::Ready;
            } else if vars.idle_time >= thresholds.for_vars(vars) {
                next_state = DeskState::Ready;
                next.active_button = DeskButton::None;
            } else {
                next.idle_time += 1;
            }
        }

        InboundCode::Sleep => {
            next_state = DeskState::Sleep;
        }

        InboundCode::Unknown(code) => {
            warn!("unrecognized desk code {} (0x{:04x})", code, code);
        }
    }

    (next_state, next)
}
