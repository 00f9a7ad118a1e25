//! FPGA side of the bridge: reset/done control and the raw lines used by
//! passthrough.

use embedded_hal::digital::{InputPin, OutputPin};

use crate::config::BREAK_THRESHOLD;
use crate::error::{Error, Result};

/// Configuration control of the FPGA.
///
/// The reset line is open-drain style: asserting it drives the pin low,
/// releasing it floats the pin and lets the board pull-up raise it.
pub trait FpgaControl {
    fn assert_reset(&mut self) -> Result<()>;
    fn release_reset(&mut self) -> Result<()>;
    /// Level of the configuration-done line.
    fn read_done(&mut self) -> Result<bool>;
}

/// Raw lines between the bridge and the FPGA's serial port.
pub trait FpgaBitLink {
    /// Drive the bridge-to-FPGA line.
    fn drive_fpga(&mut self, level: bool) -> Result<()>;
    /// Sample the FPGA-to-bridge line.
    fn sample_fpga(&mut self) -> Result<bool>;
}

/// `FpgaBitLink` over a plain output/input pin pair.
pub struct FpgaLink<O, I> {
    to_fpga: O,
    from_fpga: I,
}

impl<O: OutputPin, I: InputPin> FpgaLink<O, I> {
    pub fn new(to_fpga: O, from_fpga: I) -> Self {
        Self { to_fpga, from_fpga }
    }
}

impl<O: OutputPin, I: InputPin> FpgaBitLink for FpgaLink<O, I> {
    fn drive_fpga(&mut self, level: bool) -> Result<()> {
        self.to_fpga
            .set_state(level.into())
            .map_err(|_| Error::Pin)
    }

    fn sample_fpga(&mut self) -> Result<bool> {
        self.from_fpga.is_high().map_err(|_| Error::Pin)
    }
}

/// Recognises a break on the host line while in passthrough: the line held
/// low for `BREAK_THRESHOLD` consecutive samples. Any high sample restarts
/// the count.
#[derive(Clone, Debug, Default)]
pub struct BreakDetector {
    low_run: u8,
}

impl BreakDetector {
    pub const fn new() -> Self {
        Self { low_run: 0 }
    }

    /// Feed one sample of the host line; true once the break is complete.
    pub fn observe(&mut self, host_level: bool) -> bool {
        if host_level {
            self.low_run = 0;
        } else {
            self.low_run = self.low_run.saturating_add(1);
        }
        self.low_run >= BREAK_THRESHOLD
    }

    pub fn low_run(&self) -> u8 {
        self.low_run
    }
}
