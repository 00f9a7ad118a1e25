#![no_std]
#![no_main]

mod board;
mod leds;

use defmt::*;
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_rp::gpio::{Flex, Input, Level, Output, Pull};
use embassy_rp::spi::{self, Spi};
use fpga_bridge::config::{BAUD_RATE, SPI_FREQ_HZ};
use fpga_bridge::{BridgeConfig, Dispatcher, FpgaLink, PageBuffer, SoftSerial, SpiFlash};
use panic_probe as _;

use crate::board::{EmbassyClock, FpgaPins, Pl022};
use crate::leds::ActivityLed;

// =============================================================================
// Pin map
// =============================================================================
//
//   GPIO0   host serial out (to USB-serial RX)
//   GPIO1   host serial in  (from USB-serial TX)
//   GPIO4   passthrough out (to FPGA RX)
//   GPIO5   passthrough in  (from FPGA TX)
//   GPIO6   FPGA CRESET#    (open drain, external pull-up)
//   GPIO7   FPGA CDONE
//   GPIO16  SPI0 MISO
//   GPIO17  flash CS#
//   GPIO18  SPI0 SCK
//   GPIO19  SPI0 MOSI
//   GPIO25  activity LED

// =============================================================================
// Entry point
// =============================================================================

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let p = embassy_rp::init(Default::default());

    info!("FPGA bridge starting up");

    let config = BridgeConfig::default();
    let clock = EmbassyClock;

    // ---- Host serial link ----
    let host_rx = Input::new(p.PIN_1, Pull::Up);
    let host_tx = Output::new(p.PIN_0, Level::High);
    let serial = unwrap!(SoftSerial::new(host_rx, host_tx, clock, config.serial));

    // ---- SPI flash ----
    let mut spi_config = spi::Config::default();
    spi_config.frequency = SPI_FREQ_HZ;
    spi_config.phase = spi::Phase::CaptureOnFirstTransition;
    spi_config.polarity = spi::Polarity::IdleLow;

    let spi = Spi::new_blocking(p.SPI0, p.PIN_18, p.PIN_19, p.PIN_16, spi_config);
    let cs = Output::new(p.PIN_17, Level::High); // CS deasserted (high)
    let flash = unwrap!(SpiFlash::new(Pl022::new(spi), cs, clock, config.spi_timeout_us));

    // ---- FPGA ----
    let fpga = FpgaPins::new(Flex::new(p.PIN_6), Input::new(p.PIN_7, Pull::None));
    let link = FpgaLink::new(
        Output::new(p.PIN_4, Level::High),
        Input::new(p.PIN_5, Pull::Up),
    );

    // ---- LED ----
    let mut led = ActivityLed::new(Output::new(p.PIN_25, Level::Low));

    let mut bridge = Dispatcher::new(serial, flash, fpga, link, clock, config);

    info!(
        "FPGA bridge ready: host link {} baud, SPI {} Hz",
        BAUD_RATE, SPI_FREQ_HZ
    );

    // One staging buffer, lent to each command in turn.
    let mut page = PageBuffer::new();

    loop {
        let command = match bridge.next_command() {
            Ok(command) => command,
            Err(e) => {
                warn!("Command read failed: {}", e);
                continue;
            }
        };

        led.set_busy(true);
        // Failures are logged and recovered inside the dispatcher.
        let _ = bridge.execute(command, &mut page);
        led.set_busy(false);
    }
}
