// Audio module
// Uses Symphonia for decoding and cpal for output

pub mod buffer;
pub mod decoder;
pub mod output;
pub mod resample;

pub use buffer::DecodedBuffer;
pub use decoder::{AudioDecoder, DecodeError};
pub use output::{wait_blocking, OutputContext, OutputError, OutputState, SharedOutput};
