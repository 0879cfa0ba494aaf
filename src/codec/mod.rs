//! Value and wire codecs
//!
//! `encode` turns message field values into driver arguments, `decode`
//! turns scanned columns back into field values, and `wire` moves whole
//! messages across the RPC boundary in binary or JSON form.

pub mod decode;
pub mod encode;
pub mod wire;

pub use decode::{decode_field, scan_row};
pub use encode::encode_field;
pub use wire::{decode_message, encode_message, MsgFormat};
