use crate::config::DeskConfig;
use crate::policy::{self, PollIntervals};
use crate::protocol::{Command, DeskButton, DeskFault, FrameDecoder};
use crate::state::{self, DeskControlVars, DeskState, IdleThresholds};
use crate::transport::{Transport, TransportEvent};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the owner of the tick scheduler should do after a desk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    /// Leave the pending tick alone
    Keep,
    /// Cancel the pending tick and schedule a new one
    Arm(Duration),
    /// Cancel the pending tick, schedule nothing
    Cancel,
}

/// Immutable view of the desk published to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeskSnapshot {
    pub state: DeskState,
    pub height: u16,
    pub active_button: DeskButton,
    pub active_preset: DeskButton,
    pub desired_preset: DeskButton,
    pub error_code: u16,
    pub error_message: Option<String>,
}

impl DeskSnapshot {
    /// Height in centimeters with one decimal, or `---` while unknown.
    pub fn height_label(&self) -> String {
        if self.height > 0 {
            format!("{}.{}cm", self.height / 10, self.height % 10)
        } else {
            "---".to_string()
        }
    }

    pub fn fault(&self) -> Option<DeskFault> {
        if self.state == DeskState::Error {
            DeskFault::from_code(self.error_code)
        } else {
            None
        }
    }
}

impl core::fmt::Display for DeskSnapshot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} height={} button={} preset={}",
            self.state,
            self.height_label(),
            self.active_button,
            self.active_preset
        )?;
        if self.desired_preset != DeskButton::None {
            write!(f, " saving={}", self.desired_preset)?;
        }
        if let Some(fault) = self.fault() {
            write!(f, " fault={} ({})", self.error_code, fault.description())?;
        }
        if let Some(message) = &self.error_message {
            write!(f, " error=\"{}\"", message)?;
        }
        Ok(())
    }
}

/// Single owner of everything mutable about one desk: state, control
/// variables, frame decoder and the transport.
///
/// Every method runs to completion without blocking. Scheduling is left to
/// the caller through the returned [`Rearm`] decisions.
pub struct Desk<T: Transport> {
    transport: T,
    state: DeskState,
    vars: DeskControlVars,
    decoder: FrameDecoder,
    thresholds: IdleThresholds,
    intervals: PollIntervals,
    commands_sent: u32,
}

impl<T: Transport> Desk<T> {
    pub fn new(transport: T, config: &DeskConfig) -> Self {
        Self {
            transport,
            state: DeskState::Invalid,
            vars: DeskControlVars::default(),
            decoder: FrameDecoder::new(),
            thresholds: config.idle,
            intervals: config.poll,
            commands_sent: 0,
        }
    }

    pub fn connect(&mut self) -> Rearm {
        match self.transport.open() {
            Ok(()) => self.on_connection_state_changed(true, None),
            Err(e) => {
                warn!("connect failed: {}", e);
                self.on_connection_state_changed(false, Some(e.to_string()))
            }
        }
    }

    pub fn disconnect(&mut self) -> Rearm {
        self.state = DeskState::Invalid;
        self.transport.close();
        self.on_connection_state_changed(false, None)
    }

    pub fn handle_event(&mut self, event: TransportEvent) -> Rearm {
        match event {
            TransportEvent::ConnectionStateChanged { is_open, error } => {
                self.on_connection_state_changed(is_open, error)
            }
            TransportEvent::ByteReceived(byte) => self.on_byte(byte),
        }
    }

    pub fn on_connection_state_changed(&mut self, is_open: bool, error: Option<String>) -> Rearm {
        info!("connection {}", if is_open { "opened" } else { "closed" });
        self.state = DeskState::Invalid;
        self.vars.idle_time = 0;
        self.vars.error_code = 0;
        self.vars.error_message = error;
        self.decoder.reset();

        if is_open {
            self.tick();
            self.rearm()
        } else {
            Rearm::Cancel
        }
    }

    pub fn on_byte(&mut self, byte: u8) -> Rearm {
        match self.decoder.push_byte(byte) {
            Some(code) => self.on_code(code),
            None => Rearm::Keep,
        }
    }

    /// Apply one decoded code. A state change ticks immediately and rearms
    /// with the new state's interval.
    pub fn on_code(&mut self, code: u16) -> Rearm {
        debug!("received code {} (0x{:04x})", code, code);
        let old_state = self.state;
        let (new_state, new_vars) = state::transition(self.state, &self.vars, code, self.thresholds);
        self.state = new_state;
        self.vars = new_vars;

        if old_state == self.state {
            return Rearm::Keep;
        }

        info!("state {} -> {}", old_state, self.state);
        self.tick();
        self.rearm()
    }

    /// Run the output function once and send whatever it yields.
    pub fn tick(&mut self) -> Option<Command> {
        let result = policy::tick(self.state, &self.vars, self.transport.is_connected());
        self.state = result.state;

        let command = result.command?;
        debug!("sending {}", command);
        if let Err(e) = self.transport.send(&command.encode()) {
            warn!("failed to send {}: {}", command, e);
        } else {
            self.commands_sent = self.commands_sent.wrapping_add(1);
        }
        Some(command)
    }

    /// Scheduling decision for the current state.
    pub fn rearm(&self) -> Rearm {
        if self.transport.is_connected() {
            Rearm::Arm(self.intervals.for_state(self.state))
        } else {
            Rearm::Cancel
        }
    }

    /// Press `button`, or release it when it is already held.
    pub fn toggle_button(&mut self, button: DeskButton) -> Option<Command> {
        self.vars.active_button = if self.vars.active_button == button {
            DeskButton::None
        } else {
            button
        };
        self.vars.active_preset = if self.vars.active_button.is_preset() {
            self.vars.active_button
        } else {
            DeskButton::None
        };
        self.tick()
    }

    /// Ask the controller to store the current height as `preset`. The
    /// controller does the storing once it sees the menu and preset presses.
    pub fn save_height(&mut self, preset: DeskButton) -> Option<Command> {
        self.vars.desired_preset = preset;
        self.tick()
    }

    pub fn state(&self) -> DeskState {
        self.state
    }

    pub fn vars(&self) -> &DeskControlVars {
        &self.vars
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn commands_sent(&self) -> u32 {
        self.commands_sent
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn snapshot(&self) -> DeskSnapshot {
        DeskSnapshot {
            state: self.state,
            height: self.vars.height,
            active_button: self.vars.active_button,
            active_preset: self.vars.active_preset,
            desired_preset: self.vars.desired_preset,
            error_code: self.vars.error_code,
            error_message: self.vars.error_message.clone(),
        }
    }
}
