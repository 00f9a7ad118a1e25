//! Virtual-time model of the board for host tests.
//!
//! Time only moves when the code under test polls an input (host line, SPI
//! status) or spins on the clock, so every run is deterministic.

use core::convert::Infallible;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use embedded_hal::digital::{ErrorKind, ErrorType, InputPin, OutputPin};

use crate::clock::BitClock;
use crate::config::{BridgeConfig, BAUD_RATE, PAGE_SIZE};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::fpga::{FpgaControl, FpgaLink};
use crate::serial::SoftSerial;
use crate::spi_flash::{SpiFlash, SpiPort};

/// Host bit period at the configured rate.
pub const HOST_BIT_NS: u64 = 1_000_000_000 / BAUD_RATE as u64;

/// Cost of one poll of an input or status flag.
pub const POLL_COST_NS: u64 = 100;

/// One SPI exchange at 1 MHz.
pub const SPI_BYTE_NS: u64 = 8_000;

/// Anything running longer than this is a hang in the code under test.
const STALL_LIMIT_NS: u64 = 120_000_000_000;

pub type Shared = Rc<RefCell<World>>;

// =============================================================================
// Recorded line levels
// =============================================================================

/// Edges driven on a line that idles high.
#[derive(Clone, Debug)]
pub struct Waveform {
    edges: Vec<(u64, bool)>,
    level: bool,
}

impl Default for Waveform {
    fn default() -> Self {
        Self {
            edges: Vec::new(),
            level: true,
        }
    }
}

impl Waveform {
    fn drive(&mut self, at_ns: u64, level: bool) {
        if level != self.level {
            self.edges.push((at_ns, level));
            self.level = level;
        }
    }

    pub fn edges(&self) -> &[(u64, bool)] {
        &self.edges
    }

    /// Only the edges before `at_ns`.
    pub fn until(&self, at_ns: u64) -> Waveform {
        let edges: Vec<_> = self.edges.iter().copied().filter(|&(t, _)| t < at_ns).collect();
        let level = edges.last().map_or(true, |&(_, level)| level);
        Waveform { edges, level }
    }

    pub fn level_at(&self, at_ns: u64) -> bool {
        self.edges
            .iter()
            .take_while(|&&(t, _)| t <= at_ns)
            .last()
            .map_or(true, |&(_, level)| level)
    }

    /// Decode 8N1 frames; each entry is (start edge time, byte).
    pub fn decode_uart(&self, bit_ns: u64) -> Vec<(u64, u8)> {
        let mut frames = Vec::new();
        let mut busy_until = 0;
        for &(t, level) in &self.edges {
            if level || t < busy_until {
                continue;
            }
            let at = |half_bits: u64| self.level_at(t + half_bits * bit_ns / 2);
            let byte = (0..8).fold(0u8, |acc, i| acc | (u8::from(at(2 * i + 3)) << i));
            assert!(at(19), "frame at {t} ns has no stop bit");
            frames.push((t, byte));
            busy_until = t + 19 * bit_ns / 2;
        }
        frames
    }
}

// =============================================================================
// Host side of the serial line
// =============================================================================

#[derive(Clone, Copy, Debug)]
struct Frame {
    start: u64,
    byte: u8,
    stop: bool,
}

impl Frame {
    fn level_at(&self, at_ns: u64) -> bool {
        match (at_ns - self.start) / HOST_BIT_NS {
            0 => false,
            slot @ 1..=8 => (self.byte >> (slot - 1)) & 1 != 0,
            _ => self.stop,
        }
    }
}

enum HostLine {
    /// Frames are started the moment the bridge is listening, back to back.
    Framed {
        queue: VecDeque<(u8, bool)>,
        frame: Option<Frame>,
    },
    /// One level per read of the line; the last level sticks.
    Script { levels: VecDeque<bool>, last: bool },
    /// Plays back a recorded waveform against the clock.
    Replay(Waveform),
}

// =============================================================================
// SPI NOR flash
// =============================================================================

/// Enough of a 25-series NOR flash for the bridge's commands: write enable,
/// status, page program, read, JEDEC id and release from power-down.
#[derive(Default)]
pub struct SimFlash {
    memory: BTreeMap<u32, u8>,
    current: Vec<u8>,
    transactions: Vec<Vec<u8>>,
    write_enabled: bool,
    powered_down: bool,
}

impl SimFlash {
    pub fn read(&self, addr: u32) -> u8 {
        self.memory.get(&addr).copied().unwrap_or(0xFF)
    }

    pub fn load(&mut self, addr: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.memory.insert(addr + i as u32, b);
        }
    }

    pub fn power_down(&mut self) {
        self.powered_down = true;
    }

    pub fn is_powered_down(&self) -> bool {
        self.powered_down
    }

    /// Bytes clocked into the chip-select window that is still open.
    pub fn pending(&self) -> &[u8] {
        &self.current
    }

    /// Completed chip-select windows, one entry per window.
    pub fn transactions(&self) -> &[Vec<u8>] {
        &self.transactions
    }

    fn address(txn: &[u8]) -> u32 {
        u32::from_be_bytes([0, txn[1], txn[2], txn[3]])
    }

    fn exchange(&mut self, mosi: u8, selected: bool) -> u8 {
        if !selected {
            return 0xFF;
        }
        let index = self.current.len();
        self.current.push(mosi);
        if self.powered_down {
            return 0xFF;
        }
        match self.current[0] {
            0x05 if index >= 1 => u8::from(self.write_enabled) << 1,
            0x9F if index >= 1 => [0xEF, 0x40, 0x18][(index - 1) % 3],
            0x03 if index >= 4 => {
                let addr = Self::address(&self.current) + (index - 4) as u32;
                self.read(addr & 0x00FF_FFFF)
            }
            _ => 0xFF,
        }
    }

    fn chip_select(&mut self, low: bool) {
        if low {
            self.current.clear();
            return;
        }
        if self.current.is_empty() {
            return;
        }
        let txn = core::mem::take(&mut self.current);
        self.commit(&txn);
        self.transactions.push(txn);
    }

    fn commit(&mut self, txn: &[u8]) {
        match txn[0] {
            0xAB => self.powered_down = false,
            _ if self.powered_down => {}
            0x06 => self.write_enabled = true,
            0x04 => self.write_enabled = false,
            0x02 if self.write_enabled && txn.len() > 4 => {
                let base = Self::address(txn);
                for (i, &b) in txn[4..].iter().take(PAGE_SIZE).enumerate() {
                    let addr = (base & !0xFF) | ((base + i as u32) & 0xFF);
                    let programmed = self.read(addr) & b;
                    self.memory.insert(addr, programmed);
                }
                self.write_enabled = false;
            }
            _ => {}
        }
    }
}

// =============================================================================
// FPGA
// =============================================================================

pub struct FpgaState {
    pub reset_asserted: bool,
    pub done: bool,
    /// Level the FPGA drives towards the bridge.
    pub tx_level: bool,
    /// Every level the bridge drove towards the FPGA.
    pub driven: Vec<bool>,
}

impl Default for FpgaState {
    fn default() -> Self {
        Self {
            reset_asserted: false,
            done: false,
            tx_level: true,
            driven: Vec::new(),
        }
    }
}

// =============================================================================
// World
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpiExchange {
    pub at_ns: u64,
    pub mosi: u8,
    pub miso: u8,
    pub selected: bool,
}

pub struct World {
    now_ns: u64,
    host: HostLine,
    host_frame_starts: Vec<u64>,
    pub bridge_tx: Waveform,
    pub flash: SimFlash,
    pub fpga: FpgaState,
    cs_low: bool,
    cs_edges: Vec<(u64, bool)>,
    cs_fault: bool,
    spi_in_flight: Option<(u64, u8)>,
    spi_stalled: bool,
    spi_log: Vec<SpiExchange>,
}

impl World {
    pub fn shared() -> Shared {
        Rc::new(RefCell::new(World {
            now_ns: 0,
            host: HostLine::Framed {
                queue: VecDeque::new(),
                frame: None,
            },
            host_frame_starts: Vec::new(),
            bridge_tx: Waveform::default(),
            flash: SimFlash::default(),
            fpga: FpgaState::default(),
            cs_low: false,
            cs_edges: Vec::new(),
            cs_fault: false,
            spi_in_flight: None,
            spi_stalled: false,
            spi_log: Vec::new(),
        }))
    }

    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    fn advance(&mut self, ns: u64) {
        self.now_ns += ns;
        assert!(self.now_ns < STALL_LIMIT_NS, "simulation stalled");
    }

    // ---- host line ----

    fn framed_queue(&mut self) -> &mut VecDeque<(u8, bool)> {
        if !matches!(self.host, HostLine::Framed { .. }) {
            self.host = HostLine::Framed {
                queue: VecDeque::new(),
                frame: None,
            };
        }
        match &mut self.host {
            HostLine::Framed { queue, .. } => queue,
            _ => unreachable!(),
        }
    }

    pub fn host_send(&mut self, bytes: &[u8]) {
        self.framed_queue().extend(bytes.iter().map(|&b| (b, true)));
    }

    pub fn host_send_broken_stop(&mut self, byte: u8) {
        self.framed_queue().push_back((byte, false));
    }

    /// Drive the host line sample by sample instead of in frames.
    pub fn host_script(&mut self, levels: impl IntoIterator<Item = bool>) {
        self.host = HostLine::Script {
            levels: levels.into_iter().collect(),
            last: true,
        };
    }

    /// Rewind time and feed everything the bridge transmitted back into its
    /// own input.
    pub fn loop_back_bridge_output(&mut self) {
        self.host = HostLine::Replay(self.bridge_tx.clone());
        self.now_ns = 0;
    }

    pub fn host_frame_starts(&self) -> &[u64] {
        &self.host_frame_starts
    }

    fn host_level(&mut self) -> bool {
        let now = self.now_ns;
        match &mut self.host {
            HostLine::Framed { queue, frame } => {
                if let Some(f) = frame {
                    if now < f.start + 10 * HOST_BIT_NS {
                        return f.level_at(now);
                    }
                    *frame = None;
                }
                match queue.pop_front() {
                    Some((byte, stop)) => {
                        *frame = Some(Frame {
                            start: now,
                            byte,
                            stop,
                        });
                        self.host_frame_starts.push(now);
                        false
                    }
                    None => true,
                }
            }
            HostLine::Script { levels, last } => {
                if let Some(level) = levels.pop_front() {
                    *last = level;
                }
                *last
            }
            HostLine::Replay(waveform) => waveform.level_at(now),
        }
    }

    /// Bytes the bridge sent to the host so far.
    pub fn host_received(&self) -> Vec<u8> {
        self.host_received_frames().into_iter().map(|(_, b)| b).collect()
    }

    pub fn host_received_frames(&self) -> Vec<(u64, u8)> {
        self.bridge_tx.decode_uart(HOST_BIT_NS)
    }

    // ---- SPI ----

    pub fn cs_low(&self) -> bool {
        self.cs_low
    }

    pub fn cs_edges(&self) -> &[(u64, bool)] {
        &self.cs_edges
    }

    pub fn spi_log(&self) -> &[SpiExchange] {
        &self.spi_log
    }

    pub fn spi_busy(&self) -> bool {
        self.spi_in_flight.is_some()
    }

    pub fn stall_spi(&mut self) {
        self.spi_stalled = true;
    }

    /// Every later write to chip-select fails and leaves it unchanged.
    pub fn fail_chip_select(&mut self) {
        self.cs_fault = true;
    }
}

// =============================================================================
// Peripherals
// =============================================================================

#[derive(Clone)]
pub struct SimClock(pub Shared);

impl BitClock for SimClock {
    fn now_us(&mut self) -> u64 {
        self.0.borrow().now_ns / 1_000
    }

    fn spin_until(&mut self, deadline_us: u64) {
        let mut w = self.0.borrow_mut();
        let deadline_ns = deadline_us * 1_000;
        if deadline_ns > w.now_ns {
            let wait = deadline_ns - w.now_ns;
            w.advance(wait);
        }
    }
}

/// Bridge input from the host.
pub struct HostRx(pub Shared);

impl ErrorType for HostRx {
    type Error = Infallible;
}

impl InputPin for HostRx {
    fn is_high(&mut self) -> core::result::Result<bool, Infallible> {
        let mut w = self.0.borrow_mut();
        w.advance(POLL_COST_NS);
        Ok(w.host_level())
    }

    fn is_low(&mut self) -> core::result::Result<bool, Infallible> {
        self.is_high().map(|high| !high)
    }
}

/// Bridge output to the host.
pub struct HostTx(pub Shared);

impl ErrorType for HostTx {
    type Error = Infallible;
}

impl OutputPin for HostTx {
    fn set_low(&mut self) -> core::result::Result<(), Infallible> {
        let mut w = self.0.borrow_mut();
        let now = w.now_ns;
        w.bridge_tx.drive(now, false);
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Infallible> {
        let mut w = self.0.borrow_mut();
        let now = w.now_ns;
        w.bridge_tx.drive(now, true);
        Ok(())
    }
}

/// Flash chip-select.
pub struct SimCs(pub Shared);

impl SimCs {
    fn drive(&mut self, low: bool) -> core::result::Result<(), ErrorKind> {
        let mut w = self.0.borrow_mut();
        if w.cs_fault {
            return Err(ErrorKind::Other);
        }
        if w.cs_low == low {
            return Ok(());
        }
        w.cs_low = low;
        let now = w.now_ns;
        w.cs_edges.push((now, low));
        w.flash.chip_select(low);
        Ok(())
    }
}

impl ErrorType for SimCs {
    type Error = ErrorKind;
}

impl OutputPin for SimCs {
    fn set_low(&mut self) -> core::result::Result<(), ErrorKind> {
        self.drive(true)
    }

    fn set_high(&mut self) -> core::result::Result<(), ErrorKind> {
        self.drive(false)
    }
}

/// SPI shift register wired to the simulated flash.
pub struct SimSpi(pub Shared);

impl SpiPort for SimSpi {
    fn start(&mut self, byte: u8) {
        let mut w = self.0.borrow_mut();
        w.advance(POLL_COST_NS);
        assert!(
            w.spi_in_flight.is_none(),
            "shift register reloaded while an exchange is running"
        );
        let selected = w.cs_low;
        let miso = w.flash.exchange(byte, selected);
        let at_ns = w.now_ns;
        w.spi_log.push(SpiExchange {
            at_ns,
            mosi: byte,
            miso,
            selected,
        });
        w.spi_in_flight = Some((at_ns + SPI_BYTE_NS, miso));
    }

    fn poll(&mut self) -> Option<u8> {
        let mut w = self.0.borrow_mut();
        w.advance(POLL_COST_NS);
        if w.spi_stalled {
            return None;
        }
        match w.spi_in_flight {
            Some((done_ns, miso)) if w.now_ns >= done_ns => {
                w.spi_in_flight = None;
                Some(miso)
            }
            _ => None,
        }
    }
}

pub struct SimFpga(pub Shared);

impl FpgaControl for SimFpga {
    fn assert_reset(&mut self) -> Result<()> {
        self.0.borrow_mut().fpga.reset_asserted = true;
        Ok(())
    }

    fn release_reset(&mut self) -> Result<()> {
        self.0.borrow_mut().fpga.reset_asserted = false;
        Ok(())
    }

    fn read_done(&mut self) -> Result<bool> {
        Ok(self.0.borrow().fpga.done)
    }
}

/// Bridge output towards the FPGA.
pub struct FpgaTx(pub Shared);

impl ErrorType for FpgaTx {
    type Error = Infallible;
}

impl OutputPin for FpgaTx {
    fn set_low(&mut self) -> core::result::Result<(), Infallible> {
        self.0.borrow_mut().fpga.driven.push(false);
        Ok(())
    }

    fn set_high(&mut self) -> core::result::Result<(), Infallible> {
        self.0.borrow_mut().fpga.driven.push(true);
        Ok(())
    }
}

/// Bridge input from the FPGA.
pub struct FpgaRx(pub Shared);

impl ErrorType for FpgaRx {
    type Error = Infallible;
}

impl InputPin for FpgaRx {
    fn is_high(&mut self) -> core::result::Result<bool, Infallible> {
        Ok(self.0.borrow().fpga.tx_level)
    }

    fn is_low(&mut self) -> core::result::Result<bool, Infallible> {
        self.is_high().map(|high| !high)
    }
}

// =============================================================================
// Assembled bridge
// =============================================================================

pub type SimDispatcher =
    Dispatcher<HostRx, HostTx, SimSpi, SimCs, SimClock, SimFpga, FpgaLink<FpgaTx, FpgaRx>>;

/// Default configuration with waits short enough for quick tests.
pub fn test_config() -> BridgeConfig {
    BridgeConfig {
        payload_timeout_us: Some(5_000),
        spi_timeout_us: Some(1_000),
        ..BridgeConfig::default()
    }
}

pub fn dispatcher(world: &Shared, config: BridgeConfig) -> SimDispatcher {
    let clock = SimClock(world.clone());
    let serial = SoftSerial::new(
        HostRx(world.clone()),
        HostTx(world.clone()),
        clock.clone(),
        config.serial,
    )
    .unwrap();
    let spi = SpiFlash::new(
        SimSpi(world.clone()),
        SimCs(world.clone()),
        clock.clone(),
        config.spi_timeout_us,
    )
    .unwrap();
    let link = FpgaLink::new(FpgaTx(world.clone()), FpgaRx(world.clone()));
    Dispatcher::new(serial, spi, SimFpga(world.clone()), link, clock, config)
}
