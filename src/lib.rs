//! Export microscopy stacks as normalized OpenVDB volumes.

pub mod assemble;
pub mod config;
pub mod convert;
pub mod encode;
pub mod error;
pub mod read;
pub mod roi;
pub mod source;
pub mod write;

pub use error::{Error, Result};
