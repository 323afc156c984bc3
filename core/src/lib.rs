extern crate self as blockstream_core;

pub mod log;

pub use ::log::{debug, error, info, trace, warn};
