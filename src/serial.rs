/// Bit-banged asynchronous serial link to the host.
///
/// Frames are 8N1, LSB first, idle high. Both directions block the caller
/// for the whole frame; there is no buffering, a byte that arrives while
/// nobody is receiving is lost.
use embedded_hal::digital::{InputPin, OutputPin};

use crate::clock::BitClock;
use crate::config::SerialTiming;
use crate::error::{Error, Result};

pub struct SoftSerial<RX, TX, C> {
    rx: RX,
    tx: TX,
    clock: C,
    timing: SerialTiming,
    framing_errors: u32,
}

impl<RX, TX, C> SoftSerial<RX, TX, C>
where
    RX: InputPin,
    TX: OutputPin,
    C: BitClock,
{
    /// Takes over the line pins and idles the output high.
    pub fn new(rx: RX, tx: TX, clock: C, timing: SerialTiming) -> Result<Self> {
        let mut serial = Self {
            rx,
            tx,
            clock,
            timing,
            framing_errors: 0,
        };
        serial.write_line(true)?;
        Ok(serial)
    }

    /// Frames whose stop bit was sampled low since start-up.
    ///
    /// Such bytes are still delivered; the count is only for diagnostics.
    pub fn framing_errors(&self) -> u32 {
        self.framing_errors
    }

    // =========================================================================
    // Raw line access
    // =========================================================================

    #[inline]
    pub fn read_line(&mut self) -> Result<bool> {
        self.rx.is_high().map_err(|_| Error::Pin)
    }

    #[inline]
    pub fn write_line(&mut self, level: bool) -> Result<()> {
        self.tx.set_state(level.into()).map_err(|_| Error::Pin)
    }

    // =========================================================================
    // Framed bytes
    // =========================================================================

    /// Wait as long as it takes for the next byte.
    pub fn receive_byte(&mut self) -> Result<u8> {
        self.receive_byte_until(None)
    }

    /// Receive one byte whose start bit begins before `deadline` (µs).
    ///
    /// Returns in the middle of the stop bit, so a call made right away
    /// sees the line high until the next start bit.
    pub fn receive_byte_until(&mut self, deadline: Option<u64>) -> Result<u8> {
        let start = loop {
            if !self.read_line()? {
                break self.clock.now_us();
            }
            if let Some(deadline) = deadline {
                if self.clock.now_us() >= deadline {
                    return Err(Error::HostTimeout);
                }
            }
        };

        let mut byte = 0u8;
        for bit in 0..8 {
            self.clock
                .spin_until(start + self.timing.sample_offset_us(bit));
            byte = (u8::from(self.read_line()?) << 7) | (byte >> 1);
        }

        self.clock
            .spin_until(start + self.timing.stop_sample_offset_us());
        if !self.read_line()? {
            self.framing_errors = self.framing_errors.wrapping_add(1);
        }

        Ok(byte)
    }

    /// Send one frame and return after the full stop bit.
    pub fn transmit_byte(&mut self, byte: u8) -> Result<()> {
        let start = self.clock.now_us();
        self.write_line(false)?;

        let mut bits = byte;
        for slot in 1..=8 {
            self.clock
                .spin_until(start + self.timing.edge_offset_us(slot));
            self.write_line(bits & 1 != 0)?;
            bits >>= 1;
        }

        self.clock.spin_until(start + self.timing.edge_offset_us(9));
        self.write_line(true)?;
        self.clock.spin_until(start + self.timing.frame_us());
        Ok(())
    }

    pub fn transmit_all(&mut self, bytes: &[u8]) -> Result<()> {
        bytes.iter().try_for_each(|&b| self.transmit_byte(b))
    }
}
