//! Incoming hub stream: record framing and per-exchange reply assembly.

pub mod assembler;
pub mod codec;

pub use assembler::{AssembledReply, ResponseAssembler, Step, MODERATION_PLACEHOLDER, STOP_SEQUENCE};
pub use codec::{decode, encode, Record, RECORD_SEPARATOR};
