use thiserror::Error;

use super::OpCode;

#[derive(Debug, Error)]
pub enum PickleError {
    #[error("Unexpected end of pickle stream at byte {0}")]
    UnexpectedEof(usize),
    #[error("Unsupported pickle opcode 0x{opcode:02x} at byte {position}")]
    UnsupportedOpCode {
        opcode: u8,
        position: usize,
    },
    #[error("Unsupported pickle protocol {0}")]
    UnsupportedProtocol(u8),
    #[error("Pickle stack underflow at byte {0}")]
    StackUnderflow(usize),
    #[error("{0:?} without a preceding MARK")]
    MarkNotFound(OpCode),
    #[error("Pickle memo entry {0} not found")]
    MemoNotFound(u32),
    #[error("{op:?} expected {expected}, found {found}")]
    UnexpectedValue {
        op: OpCode,
        expected: &'static str,
        found: &'static str,
    },
    #[error("Invalid data in pickle stream: {0}")]
    InvalidData(String),
    #[error("Pickle stream ended without STOP")]
    MissingStop,
}
