use crate::config::{PAGE_BUFFER_LEN, PAGE_HEADER_LEN};

/// Staging storage for one page transaction.
///
/// Layout: `[0..4)` flash opcode and 24-bit address, `[4..260)` page
/// payload. The dispatcher borrows it for the duration of a single command;
/// contents are meaningless once that command returns.
#[derive(Clone)]
pub struct PageBuffer {
    bytes: [u8; PAGE_BUFFER_LEN],
}

impl PageBuffer {
    pub const fn new() -> Self {
        Self {
            bytes: [0; PAGE_BUFFER_LEN],
        }
    }

    /// Whole transaction: header followed by payload.
    pub fn frame(&self) -> &[u8; PAGE_BUFFER_LEN] {
        &self.bytes
    }

    pub fn frame_mut(&mut self) -> &mut [u8; PAGE_BUFFER_LEN] {
        &mut self.bytes
    }

    pub fn header(&self) -> &[u8] {
        &self.bytes[..PAGE_HEADER_LEN]
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[..PAGE_HEADER_LEN]
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes[PAGE_HEADER_LEN..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[PAGE_HEADER_LEN..]
    }
}

impl Default for PageBuffer {
    fn default() -> Self {
        Self::new()
    }
}
