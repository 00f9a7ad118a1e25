/// SPI master towards the flash, one byte at a time.
///
/// The shift register is driven without interrupts: an exchange is started
/// by loading a byte and its completion is found by polling. Keeping the
/// "exchange in flight" state here lets callers overlap an SPI exchange with
/// serial traffic and collect the result later.
use embedded_hal::digital::OutputPin;

use crate::clock::BitClock;
use crate::config::SPI_CMD_RELEASE_POWER_DOWN;
use crate::error::{Error, Result};

/// Byte-level access to an SPI shift register.
pub trait SpiPort {
    /// Load `byte` and start clocking it out. Returns immediately; the caller
    /// guarantees no other exchange is still running.
    fn start(&mut self, byte: u8);

    /// The byte clocked in by the last `start`, once that exchange is done.
    fn poll(&mut self) -> Option<u8>;
}

pub struct SpiFlash<P, CS, C> {
    port: P,
    cs: CS,
    clock: C,
    timeout_us: Option<u64>,
    in_flight: bool,
    received: u8,
}

impl<P, CS, C> SpiFlash<P, CS, C>
where
    P: SpiPort,
    CS: OutputPin,
    C: BitClock,
{
    /// Takes over the port and chip-select, leaving the flash deselected.
    pub fn new(port: P, cs: CS, clock: C, timeout_us: Option<u64>) -> Result<Self> {
        let mut flash = Self {
            port,
            cs,
            clock,
            timeout_us,
            in_flight: false,
            received: 0,
        };
        flash.deselect()?;
        Ok(flash)
    }

    // =========================================================================
    // CS control
    // =========================================================================

    #[inline]
    pub fn select(&mut self) -> Result<()> {
        self.cs.set_low().map_err(|_| Error::Pin)
    }

    #[inline]
    pub fn deselect(&mut self) -> Result<()> {
        self.cs.set_high().map_err(|_| Error::Pin)
    }

    // =========================================================================
    // Byte exchanges
    // =========================================================================

    /// Exchange one byte and wait for it to finish. The byte clocked in is
    /// available from `slave_receive`.
    pub fn transmit(&mut self, byte: u8) -> Result<()> {
        self.transmit_overlapped(byte)?;
        self.finish()
    }

    /// Start exchanging `byte` without waiting for it. A still running
    /// exchange is completed first, its received byte is dropped.
    pub fn transmit_overlapped(&mut self, byte: u8) -> Result<()> {
        self.finish()?;
        self.port.start(byte);
        self.in_flight = true;
        Ok(())
    }

    /// Wait for the running exchange, if any.
    pub fn finish(&mut self) -> Result<()> {
        if !self.in_flight {
            return Ok(());
        }

        let deadline = self.clock.deadline_after(self.timeout_us);
        loop {
            if let Some(byte) = self.port.poll() {
                self.received = byte;
                self.in_flight = false;
                return Ok(());
            }
            if let Some(deadline) = deadline {
                if self.clock.now_us() >= deadline {
                    return Err(Error::SpiTimeout);
                }
            }
        }
    }

    /// Wait for the running exchange and return the byte it clocked in.
    /// With nothing running, returns the byte of the last exchange.
    pub fn slave_receive(&mut self) -> Result<u8> {
        self.finish()?;
        Ok(self.received)
    }

    // =========================================================================
    // Flash sequences
    // =========================================================================

    /// Release the flash from deep power-down and give it `settle_us` to
    /// come back.
    pub fn wake(&mut self, settle_us: u64) -> Result<()> {
        self.select()?;
        self.transmit(SPI_CMD_RELEASE_POWER_DOWN)?;
        self.deselect()?;
        self.clock.spin_for(settle_us);
        Ok(())
    }

    /// Forget a stuck exchange and deselect the flash.
    pub fn abort(&mut self) -> Result<()> {
        self.in_flight = false;
        self.deselect()
    }
}
