// Link parameters, protocol constants and runtime tunables.

// =============================================================================
// Host serial link (software UART, 8N1, idle high)
// =============================================================================

/// Bit rate of the host link. 26 µs per bit, as expected by the host tool.
pub const BAUD_RATE: u32 = 38_400;

// =============================================================================
// SPI flash link
// =============================================================================

/// SPI clock towards the flash (Hz).
pub const SPI_FREQ_HZ: u32 = 1_000_000;

/// Time for one 8-bit SPI exchange at `SPI_FREQ_HZ`, rounded up (µs).
pub const SPI_BYTE_US: u64 = (8 * 1_000_000u64).div_ceil(SPI_FREQ_HZ as u64);

/// Release from Deep Power-Down.
pub const SPI_CMD_RELEASE_POWER_DOWN: u8 = 0xAB;

/// Time the flash needs after release from power-down (tRES1).
pub const FLASH_WAKE_SETTLE_US: u64 = 10;

// The pipelined commands hide one SPI exchange behind each serial byte, so
// a serial frame must never be shorter than an SPI exchange.
const _: () = assert!(SerialTiming::new(BAUD_RATE).frame_us() >= SPI_BYTE_US);

// =============================================================================
// Page buffer layout
// =============================================================================

/// Bytes of page payload programmed or verified per command.
pub const PAGE_SIZE: usize = 256;

/// Opcode plus 24-bit address.
pub const PAGE_HEADER_LEN: usize = 4;

/// Largest transaction staged by a single command.
pub const PAGE_BUFFER_LEN: usize = PAGE_HEADER_LEN + PAGE_SIZE;

// =============================================================================
// Passthrough
// =============================================================================

/// Consecutive low samples of the host line that end passthrough.
pub const BREAK_THRESHOLD: u8 = 255;

/// Sampling interval of the passthrough loop (µs).
pub const PASSTHROUGH_SAMPLE_US: u64 = 2;

// =============================================================================
// Wait bounds
// =============================================================================

/// Longest gap tolerated before a payload byte starts (µs).
pub const PAYLOAD_TIMEOUT_US: u64 = 250_000;

/// Longest time an SPI exchange may take before the device is considered
/// stalled (µs).
pub const SPI_TIMEOUT_US: u64 = 10_000;

// =============================================================================
// Serial timing
// =============================================================================

/// Frame timing derived from a bit rate.
///
/// Every offset is measured from the falling edge of the start bit and is
/// computed from the exact rational `n / (2 * baud)`, so rounding error
/// never accumulates over a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SerialTiming {
    baud_rate: u32,
}

impl SerialTiming {
    pub const fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }

    const fn half_bits_us(&self, half_bits: u32) -> u64 {
        (half_bits as u64 * 1_000_000) / (2 * self.baud_rate as u64)
    }

    pub const fn bit_period_us(&self) -> u64 {
        self.half_bits_us(2)
    }

    /// Middle of data bit `bit` (0 = LSB).
    pub const fn sample_offset_us(&self, bit: u32) -> u64 {
        self.half_bits_us(2 * bit + 3)
    }

    /// Middle of the stop bit. The receiver returns here.
    pub const fn stop_sample_offset_us(&self) -> u64 {
        self.half_bits_us(19)
    }

    /// Start of bit slot `slot` (0 = start bit, 1..=8 data, 9 stop).
    pub const fn edge_offset_us(&self, slot: u32) -> u64 {
        self.half_bits_us(2 * slot)
    }

    /// Start bit, eight data bits and stop bit.
    pub const fn frame_us(&self) -> u64 {
        self.edge_offset_us(10)
    }
}

// =============================================================================
// Runtime configuration
// =============================================================================

/// Tunables handed to the dispatcher at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BridgeConfig {
    pub serial: SerialTiming,
    /// `None` waits forever for payload bytes.
    pub payload_timeout_us: Option<u64>,
    /// `None` polls the SPI completion flag forever.
    pub spi_timeout_us: Option<u64>,
    pub passthrough_sample_us: u64,
    pub flash_wake_settle_us: u64,
}

impl BridgeConfig {
    pub const fn new() -> Self {
        Self {
            serial: SerialTiming::new(BAUD_RATE),
            payload_timeout_us: Some(PAYLOAD_TIMEOUT_US),
            spi_timeout_us: Some(SPI_TIMEOUT_US),
            passthrough_sample_us: PASSTHROUGH_SAMPLE_US,
            flash_wake_settle_us: FLASH_WAKE_SETTLE_US,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}
