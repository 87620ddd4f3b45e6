mod client;
mod error;
mod frame;
mod handle;
mod pending;
mod value;
mod xml;

pub use client::{Client, ClientState, ConnectOptions};
pub use error::{Error, Result};
pub use value::{MethodCall, Response, Value};
