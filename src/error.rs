//! Error type shared by the transports and the dispatcher.

use thiserror::Error;

/// Faults a command can run into. None of them is reported to the host;
/// the dispatcher abandons the command and goes back to awaiting the next
/// command byte.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    #[error("GPIO operation failed")]
    Pin,

    #[error("host stopped sending in the middle of a command")]
    HostTimeout,

    #[error("SPI exchange did not complete")]
    SpiTimeout,
}

pub type Result<T> = core::result::Result<T, Error>;
