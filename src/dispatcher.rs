/// Command dispatcher: reads one command byte from the host and runs the
/// matching sequence of serial, SPI and FPGA operations.
///
/// Every command is self-contained and leaves the dispatcher awaiting the
/// next command byte. A command that fails (host went quiet, SPI stalled)
/// is abandoned without a response. Chip-select is released only when the
/// flash itself stopped responding.
use embedded_hal::digital::{InputPin, OutputPin};

use crate::clock::BitClock;
use crate::config::{BridgeConfig, PAGE_BUFFER_LEN, PAGE_HEADER_LEN, PAGE_SIZE};
use crate::error::{Error, Result};
use crate::fpga::{BreakDetector, FpgaBitLink, FpgaControl};
use crate::page::PageBuffer;
use crate::protocol::*;
use crate::serial::SoftSerial;
use crate::spi_flash::{SpiFlash, SpiPort};

pub struct Dispatcher<RX, TX, P, CS, C, F, L> {
    serial: SoftSerial<RX, TX, C>,
    spi: SpiFlash<P, CS, C>,
    fpga: F,
    link: L,
    clock: C,
    config: BridgeConfig,

    /// Framing errors already reported.
    framing_errors_seen: u32,
}

impl<RX, TX, P, CS, C, F, L> Dispatcher<RX, TX, P, CS, C, F, L>
where
    RX: InputPin,
    TX: OutputPin,
    P: SpiPort,
    CS: OutputPin,
    C: BitClock,
    F: FpgaControl,
    L: FpgaBitLink,
{
    pub fn new(
        serial: SoftSerial<RX, TX, C>,
        spi: SpiFlash<P, CS, C>,
        fpga: F,
        link: L,
        clock: C,
        config: BridgeConfig,
    ) -> Self {
        Self {
            serial,
            spi,
            fpga,
            link,
            clock,
            config,
            framing_errors_seen: 0,
        }
    }

    /// Block until the host sends a command byte.
    pub fn next_command(&mut self) -> Result<Command> {
        let b = self.serial.receive_byte()?;
        Ok(Command::from_byte(b))
    }

    /// Receive one command and run it.
    pub fn serve(&mut self, page: &mut PageBuffer) -> Result<Command> {
        let command = self.next_command()?;
        self.execute(command, page)?;
        Ok(command)
    }

    /// Run one command. `page` is staging storage for this command only.
    pub fn execute(&mut self, command: Command, page: &mut PageBuffer) -> Result<()> {
        let result = match command {
            Command::Select => self.spi.select(),
            Command::Deselect => self.spi.deselect(),
            Command::Transact => self.cmd_transact(),
            Command::ProgramPage => self.cmd_program_page(page),
            Command::VerifyPage => self.cmd_verify_page(page),
            Command::FastProgram => self.cmd_fast_program(),
            Command::FastVerify => self.cmd_fast_verify(),
            Command::FpgaResetAssert => self.cmd_fpga_reset(true),
            Command::FpgaResetRelease => self.cmd_fpga_reset(false),
            Command::FpgaDone => self.cmd_fpga_done(),
            Command::FlashWake => self.cmd_flash_wake(),
            Command::Passthrough => self.cmd_passthrough(),
            Command::Unknown(b) => {
                debug!("Unknown cmd 0x{:02x}", b);
                self.serial.transmit_byte(NAK_UNKNOWN)
            }
        };

        if let Err(e) = result {
            warn!("{} abandoned: {}", command, e);
            self.recover(e);
        }
        self.report_framing_errors();
        result
    }

    // =========================================================================
    // Single byte transaction
    // =========================================================================

    fn cmd_transact(&mut self) -> Result<()> {
        let to_slave = self.receive_payload()?;
        self.spi.transmit(to_slave)?;
        let from_slave = self.spi.slave_receive()?;
        trace!("TRANSACT: 0x{:02x} -> 0x{:02x}", to_slave, from_slave);
        self.serial.transmit_byte(from_slave)
    }

    // =========================================================================
    // Page program / verify, staged through the page buffer
    // =========================================================================

    fn cmd_program_page(&mut self, page: &mut PageBuffer) -> Result<()> {
        for slot in page.frame_mut().iter_mut() {
            *slot = self.receive_payload()?;
        }
        self.serial.transmit_byte(ACK_PAGE_RECEIVED)?;

        self.spi.select()?;
        for &b in page.frame().iter() {
            self.spi.transmit(b)?;
        }
        self.spi.deselect()?;

        self.serial.transmit_byte(ACK_PAGE_DONE)
    }

    fn cmd_verify_page(&mut self, page: &mut PageBuffer) -> Result<()> {
        for slot in page.header_mut() {
            *slot = self.receive_payload()?;
        }

        self.spi.select()?;
        for &b in page.header() {
            self.spi.transmit(b)?;
        }
        for slot in page.data_mut() {
            self.spi.transmit(0)?;
            *slot = self.spi.slave_receive()?;
        }
        self.spi.deselect()?;

        self.serial.transmit_all(page.data())
    }

    // =========================================================================
    // Pipelined page program / verify
    // =========================================================================

    /// Each SPI exchange runs while the next byte is still arriving on the
    /// serial line; a serial frame outlasts an SPI exchange, so the shift
    /// register is always free again by the time it is reloaded.
    fn cmd_fast_program(&mut self) -> Result<()> {
        self.spi.select()?;
        for _ in 0..PAGE_BUFFER_LEN {
            let b = self.receive_payload()?;
            self.spi.transmit_overlapped(b)?;
        }
        self.spi.finish()?;
        self.spi.deselect()?;

        self.serial.transmit_byte(ACK_PAGE_RECEIVED)?;
        self.serial.transmit_byte(ACK_PAGE_DONE)
    }

    /// Header as in fast program, then each readback exchange runs while the
    /// previous byte goes out on the serial line.
    fn cmd_fast_verify(&mut self) -> Result<()> {
        self.spi.select()?;
        for _ in 0..PAGE_HEADER_LEN {
            let b = self.receive_payload()?;
            self.spi.transmit_overlapped(b)?;
        }

        self.spi.transmit_overlapped(0)?;
        for i in 0..PAGE_SIZE {
            let b = self.spi.slave_receive()?;
            if i + 1 < PAGE_SIZE {
                self.spi.transmit_overlapped(0)?;
            }
            self.serial.transmit_byte(b)?;
        }
        self.spi.deselect()
    }

    // =========================================================================
    // FPGA control
    // =========================================================================

    fn cmd_fpga_reset(&mut self, assert: bool) -> Result<()> {
        if assert {
            self.fpga.assert_reset()?;
            self.serial.transmit_byte(CMD_FPGA_RESET_ASSERT)
        } else {
            self.fpga.release_reset()?;
            self.serial.transmit_byte(CMD_FPGA_RESET_RELEASE)
        }
    }

    fn cmd_fpga_done(&mut self) -> Result<()> {
        let done = self.fpga.read_done()?;
        self.serial.transmit_byte(u8::from(done))
    }

    fn cmd_flash_wake(&mut self) -> Result<()> {
        self.spi.wake(self.config.flash_wake_settle_us)?;
        self.serial.transmit_byte(CMD_FLASH_WAKE)
    }

    // =========================================================================
    // Passthrough
    // =========================================================================

    /// Mirror the host line onto the FPGA and the FPGA line back to the host,
    /// one sample per `passthrough_sample_us`, until the host sends a break.
    fn cmd_passthrough(&mut self) -> Result<()> {
        self.serial.transmit_byte(CMD_PASSTHROUGH)?;
        info!("Passthrough: bridging host and FPGA");

        let mut detector = BreakDetector::new();
        let mut next_sample = self.clock.now_us();
        loop {
            self.clock.spin_until(next_sample);
            next_sample += self.config.passthrough_sample_us;

            let from_host = self.serial.read_line()?;
            if detector.observe(from_host) {
                break;
            }
            self.link.drive_fpga(from_host)?;
            let from_fpga = self.link.sample_fpga()?;
            self.serial.write_line(from_fpga)?;
        }

        // Idle the host line and let the break end, so its tail is not taken
        // for a start bit.
        self.serial.write_line(true)?;
        while !self.serial.read_line()? {}

        info!("Passthrough: break received, back to command mode");
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn receive_payload(&mut self) -> Result<u8> {
        let deadline = self.clock.deadline_after(self.config.payload_timeout_us);
        self.serial.receive_byte_until(deadline)
    }

    /// Put the lines back into a state where the next command can run.
    ///
    /// After a host timeout chip-select stays where it is: raising it would
    /// make the flash execute whatever part of a write was already clocked
    /// in. Only a stalled or faulty bus gets the flash deselected.
    fn recover(&mut self, cause: Error) {
        let spi = match cause {
            Error::HostTimeout => self.spi.finish().or_else(|_| self.spi.abort()),
            Error::Pin | Error::SpiTimeout => self.spi.abort(),
        };
        let line = self.serial.write_line(true);
        if spi.is_err() || line.is_err() {
            error!("Recovery failed to reset lines");
        }
    }

    fn report_framing_errors(&mut self) {
        let total = self.serial.framing_errors();
        if total != self.framing_errors_seen {
            warn!(
                "{} framing error(s) on host link",
                total.wrapping_sub(self.framing_errors_seen)
            );
            self.framing_errors_seen = total;
        }
    }
}
