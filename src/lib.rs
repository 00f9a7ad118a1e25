//! Host-to-flash/FPGA bridge core.
//!
//! The host talks to the bridge over a bit-banged serial line using
//! single-byte commands; the bridge turns them into SPI flash transactions,
//! FPGA reset/done control, or a raw passthrough between the host and the
//! FPGA's serial lines. Everything here is hardware independent: pins come
//! in through `embedded-hal`, time through [`BitClock`] and the SPI shift
//! register through [`SpiPort`].
#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fpga;
pub mod page;
pub mod protocol;
pub mod serial;
pub mod spi_flash;

#[cfg(test)]
mod sim;

pub use clock::BitClock;
pub use config::BridgeConfig;
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use fpga::{FpgaBitLink, FpgaControl, FpgaLink};
pub use page::PageBuffer;
pub use protocol::Command;
pub use serial::SoftSerial;
pub use spi_flash::{SpiFlash, SpiPort};
