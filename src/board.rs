/// RP2040 implementations of the bridge's hardware seams.
use embassy_rp::gpio::{Flex, Input, Pull};
use embassy_rp::peripherals::SPI0;
use embassy_rp::spi::{Blocking, Spi};
use fpga_bridge::{BitClock, FpgaControl, SpiPort};

// =============================================================================
// Time base
// =============================================================================

/// Microsecond clock backed by the embassy time driver (RP2040 TIMER).
#[derive(Clone, Copy)]
pub struct EmbassyClock;

impl BitClock for EmbassyClock {
    #[inline]
    fn now_us(&mut self) -> u64 {
        embassy_time::Instant::now().as_micros()
    }
}

// =============================================================================
// SPI shift register
// =============================================================================

/// Byte-wise access to the PL022 behind SPI0.
///
/// The embassy driver configures pins, clock rate and mode; the data and
/// status registers are then used directly so an exchange can be started
/// without waiting for it.
pub struct Pl022 {
    _spi: Spi<'static, SPI0, Blocking>,
}

impl Pl022 {
    pub fn new(spi: Spi<'static, SPI0, Blocking>) -> Self {
        // Drop anything left in the receive FIFO.
        let regs = embassy_rp::pac::SPI0;
        while regs.sr().read().rne() {
            let _ = regs.dr().read();
        }
        Self { _spi: spi }
    }
}

impl SpiPort for Pl022 {
    #[inline]
    fn start(&mut self, byte: u8) {
        let regs = embassy_rp::pac::SPI0;
        while !regs.sr().read().tnf() {}
        regs.dr().write(|w| w.set_data(byte as u16));
    }

    #[inline]
    fn poll(&mut self) -> Option<u8> {
        let regs = embassy_rp::pac::SPI0;
        if regs.sr().read().rne() {
            Some(regs.dr().read().data() as u8)
        } else {
            None
        }
    }
}

// =============================================================================
// FPGA reset / done
// =============================================================================

/// CRESET is never driven high: asserted means output-low, released means
/// floating input so the board pull-up takes it high.
pub struct FpgaPins {
    reset: Flex<'static>,
    done: Input<'static>,
}

impl FpgaPins {
    pub fn new(mut reset: Flex<'static>, done: Input<'static>) -> Self {
        reset.set_pull(Pull::None);
        reset.set_low();
        reset.set_as_input();
        Self { reset, done }
    }
}

impl FpgaControl for FpgaPins {
    fn assert_reset(&mut self) -> fpga_bridge::Result<()> {
        self.reset.set_as_output();
        Ok(())
    }

    fn release_reset(&mut self) -> fpga_bridge::Result<()> {
        self.reset.set_as_input();
        Ok(())
    }

    fn read_done(&mut self) -> fpga_bridge::Result<bool> {
        Ok(self.done.is_high())
    }
}
