// Wire protocol for KevinbotMC motor controllers
//
// Provides:
// - Typed transaction values and their byte encodings
// - Device status codes
// - Frame encoders, CRC-16/MODBUS and the resynchronizing frame parser

pub mod frame;
pub mod status;
pub mod value;

pub use frame::{FrameParser, InboundFrame, ResponseFrame, UnsolicitedFrame};
pub use status::{StatusCode, TransactionResult};
pub use value::{CodecError, DataType, PackedValue, TransactionValue};
