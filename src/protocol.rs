// Host wire protocol: command bytes, acknowledgement markers and the
// per-command transfer contract.

use crate::config::{PAGE_BUFFER_LEN, PAGE_HEADER_LEN, PAGE_SIZE};

// =============================================================================
// Command bytes (one ASCII letter per command)
// =============================================================================

pub const CMD_SELECT: u8 = b'l';
pub const CMD_DESELECT: u8 = b'r';
pub const CMD_TRANSACT: u8 = b'b';
pub const CMD_PROGRAM_PAGE: u8 = b'p';
pub const CMD_VERIFY_PAGE: u8 = b'v';
pub const CMD_FAST_PROGRAM: u8 = b'f';
pub const CMD_FAST_VERIFY: u8 = b'g';
pub const CMD_FPGA_RESET_ASSERT: u8 = b'q';
pub const CMD_FPGA_RESET_RELEASE: u8 = b'w';
pub const CMD_FPGA_DONE: u8 = b'e';
pub const CMD_FLASH_WAKE: u8 = b't';
pub const CMD_PASSTHROUGH: u8 = b'z';

// =============================================================================
// Response markers
// =============================================================================

/// Page payload fully received.
pub const ACK_PAGE_RECEIVED: u8 = b'a';

/// Page handed to the flash, chip-select released.
pub const ACK_PAGE_DONE: u8 = b'd';

/// Unrecognized command byte.
pub const NAK_UNKNOWN: u8 = b'?';

// =============================================================================
// Commands
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Select,
    Deselect,
    Transact,
    ProgramPage,
    VerifyPage,
    FastProgram,
    FastVerify,
    FpgaResetAssert,
    FpgaResetRelease,
    FpgaDone,
    FlashWake,
    Passthrough,
    Unknown(u8),
}

impl Command {
    pub const fn from_byte(b: u8) -> Self {
        match b {
            CMD_SELECT => Command::Select,
            CMD_DESELECT => Command::Deselect,
            CMD_TRANSACT => Command::Transact,
            CMD_PROGRAM_PAGE => Command::ProgramPage,
            CMD_VERIFY_PAGE => Command::VerifyPage,
            CMD_FAST_PROGRAM => Command::FastProgram,
            CMD_FAST_VERIFY => Command::FastVerify,
            CMD_FPGA_RESET_ASSERT => Command::FpgaResetAssert,
            CMD_FPGA_RESET_RELEASE => Command::FpgaResetRelease,
            CMD_FPGA_DONE => Command::FpgaDone,
            CMD_FLASH_WAKE => Command::FlashWake,
            CMD_PASSTHROUGH => Command::Passthrough,
            other => Command::Unknown(other),
        }
    }

    /// The byte the host sends for this command.
    pub const fn code(self) -> u8 {
        match self {
            Command::Select => CMD_SELECT,
            Command::Deselect => CMD_DESELECT,
            Command::Transact => CMD_TRANSACT,
            Command::ProgramPage => CMD_PROGRAM_PAGE,
            Command::VerifyPage => CMD_VERIFY_PAGE,
            Command::FastProgram => CMD_FAST_PROGRAM,
            Command::FastVerify => CMD_FAST_VERIFY,
            Command::FpgaResetAssert => CMD_FPGA_RESET_ASSERT,
            Command::FpgaResetRelease => CMD_FPGA_RESET_RELEASE,
            Command::FpgaDone => CMD_FPGA_DONE,
            Command::FlashWake => CMD_FLASH_WAKE,
            Command::Passthrough => CMD_PASSTHROUGH,
            Command::Unknown(b) => b,
        }
    }

    /// Framed bytes exchanged with the host after the command byte.
    pub const fn contract(self) -> Contract {
        match self {
            Command::Select | Command::Deselect => Contract::new(0, 0),
            Command::Transact => Contract::new(1, 1),
            Command::ProgramPage | Command::FastProgram => Contract::new(PAGE_BUFFER_LEN, 2),
            Command::VerifyPage | Command::FastVerify => Contract::new(PAGE_HEADER_LEN, PAGE_SIZE),
            Command::FpgaResetAssert
            | Command::FpgaResetRelease
            | Command::FpgaDone
            | Command::FlashWake
            | Command::Unknown(_) => Contract::new(0, 1),
            Command::Passthrough => Contract {
                request_len: 0,
                response_len: 1,
                raw_bridge: true,
            },
        }
    }
}

/// Number of framed bytes a command reads from and writes to the host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Contract {
    pub request_len: usize,
    pub response_len: usize,
    /// After its response the command bridges raw line levels until a break.
    pub raw_bridge: bool,
}

impl Contract {
    const fn new(request_len: usize, response_len: usize) -> Self {
        Self {
            request_len,
            response_len,
            raw_bridge: false,
        }
    }
}

// The page commands stage their whole request in the page buffer.
const _: () = assert!(Command::ProgramPage.contract().request_len <= PAGE_BUFFER_LEN);
const _: () = assert!(Command::VerifyPage.contract().response_len <= PAGE_BUFFER_LEN);
