//! Banked code dispatch and event scheduling for the bridge controller firmware.
//!
//! The controller's CPU addresses 64KB of code while the image is larger, so everything above
//! 0x8000 is reached through a bank window. This crate owns the pieces every subsystem depends on
//! to move between banks safely: the dispatch table and trampoline, the interrupt router, the
//! main loop, the endpoint scheduler and the command engine. Subsystems plug in as routines
//! placed in a [`CodeImage`] at the addresses the dispatch table names.
#![forbid(unsafe_code)]

pub mod bank;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod firmware;
pub mod image;
pub mod irq;
pub mod main_loop;
pub mod router;
pub mod stack;
pub mod trampoline;

pub use bank::{Bank, BankWindow, CodeAddr};
pub use config::FirmwareConfig;
pub use dispatch::{CallConvention, DispatchEntry, DispatchTable, SlotId, STANDARD_TABLE};
pub use error::{BuildError, CallError, ConfigError, DispatchError};
pub use firmware::Firmware;
pub use image::{CodeImage, Routine};
pub use irq::IrqLine;
