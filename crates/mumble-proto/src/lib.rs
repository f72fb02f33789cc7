pub mod framing;
pub mod mumble;
pub mod varint;
pub mod voice;

pub use framing::{expected_message, message_to_bytes, parse_message, read_frame, send_message, FramingError, MessageKind};
