//! # Desk Controller
//!
//! Drives a motorized height-adjustable desk through the proprietary serial
//! link of its motor controller.
//!
//! ## Features
//!
//! - **Frame decoding**: sliding 3-byte checksum window over an unframed byte stream
//! - **State machine**: inbound status codes folded into desk states and control variables
//! - **Output policy**: button presses derived from state and resent on a state-dependent interval
//! - **Single-slot scheduling**: re-armable tick that never runs twice for the same desk
//! - **Snapshots**: immutable desk views broadcast to any number of observers
//!
//! ## Quick Start
//!
//! ```no_run
//! use deskctl::{Desk, DeskButton, DeskConfig, DeskService, SerialTransport};
//! use tokio::sync::mpsc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeskConfig::default().with_port("/dev/ttyUSB0");
//! let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
//! let transport = SerialTransport::new(&config.port, config.baud_rate, events_tx);
//! let (service, handle) = DeskService::new(Desk::new(transport, &config), events_rx, &config);
//! tokio::spawn(service.run());
//!
//! handle.connect().await?;
//! handle.toggle_button(DeskButton::Up).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - Buttons, outbound commands, inbound frame decoding
//! - [`state`] - Desk states and the transition function
//! - [`policy`] - Output function and polling intervals
//! - [`scheduler`] - Single-slot tick scheduler
//! - [`transport`] - Serial link collaborator
//! - [`desk`] - Synchronous owner of all desk state
//! - [`service`] - Async actor and presentation handle
//! - [`config`] - Runtime configuration

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod desk;
pub mod policy;
pub mod protocol;
pub mod scheduler;
pub mod service;
pub mod state;
pub mod transport;

// Re-export main public types for convenience
pub use config::DeskConfig;
pub use desk::{Desk, DeskSnapshot, Rearm};
pub use protocol::{Command, DeskButton, FrameDecoder};
pub use service::{DeskHandle, DeskService};
pub use state::{DeskControlVars, DeskState};
pub use transport::{SerialTransport, Transport, TransportEvent};
