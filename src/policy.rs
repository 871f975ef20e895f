use crate::protocol::{Command, DeskButton};
use crate::state::{DeskControlVars, DeskState};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_IDLE_POLL: Duration = Duration::from_millis(2000);
pub const DEFAULT_READY_POLL: Duration = Duration::from_millis(500);
pub const DEFAULT_ACTIVE_POLL: Duration = Duration::from_millis(150);

/// Result of one invocation of the output function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub state: DeskState,
    pub command: Option<Command>,
}

/// The output function: derive the command to (re)send from the current state.
pub fn tick(state: DeskState, vars: &DeskControlVars, connected: bool) -> Tick {
    if !connected {
        return Tick {
            state: DeskState::Invalid,
            command: None,
        };
    }

    let command = match state {
        DeskState::Error => None,

        DeskState::Invalid => Some(Command::Reset),

        DeskState::Config => {
            if vars.desired_preset != DeskButton::None {
                Some(Command::PressButton(vars.desired_preset))
            } else {
                // Leave the menu
                Some(Command::PressButton(DeskButton::M))
            }
        }

        DeskState::Ready => {
            if vars.desired_preset != DeskButton::None {
                // Open the menu so the preset can be stored
                Some(Command::PressButton(DeskButton::M))
            } else {
                Some(Command::PressButton(vars.active_button))
            }
        }

        DeskState::Busy => {
            if vars.active_button.is_preset() {
                // Interrupt the running move with anything but the target
                Some(Command::PressButton(interrupt_button(vars.active_button)))
            } else {
                Some(Command::PressButton(vars.active_button))
            }
        }

        DeskState::Sleep => {
            if vars.active_button != DeskButton::None {
                // Wake-up pulse
                Some(Command::PressButton(DeskButton::M))
            } else {
                Some(Command::KeepAlive)
            }
        }
    };

    Tick { state, command }
}

fn interrupt_button(target: DeskButton) -> DeskButton {
    if target == DeskButton::P1 {
        DeskButton::P2
    } else {
        DeskButton::P1
    }
}

/// Scheduler intervals per state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollIntervals {
    pub idle: Duration,   // Sleep, Invalid and Error
    pub ready: Duration,
    pub active: Duration, // Busy and Config
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            idle: DEFAULT_IDLE_POLL,
            ready: DEFAULT_READY_POLL,
            active: DEFAULT_ACTIVE_POLL,
        }
    }
}

impl PollIntervals {
    pub fn for_state(&self, state: DeskState) -> Duration {
        match state {
            DeskState::Sleep | DeskState::Invalid | DeskState::Error => self.idle,
            DeskState::Ready => self.ready,
            DeskState::Busy | DeskState::Config => self.active,
        }
    }
}
