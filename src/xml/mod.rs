mod decode;
mod encode;

pub use decode::{decode_method_call, decode_response};
pub use encode::{encode_method_call, encode_response_fault, encode_response_ok};
