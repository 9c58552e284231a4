//! XDATA register space for the bridge controller: the bus abstraction the firmware core is
//! written against, a RAM-backed bus with range-mapped devices, the register map, and host-side
//! models of the hardware blocks behind those registers.
#![forbid(unsafe_code)]

pub mod bus;
pub mod devices;
pub mod map;
pub mod xdata;

pub use bus::RegisterBus;
pub use xdata::{XdataBus, XdataDevice};
