//! The core module holds the interfaces the descriptor cache is built on: the native device, the batch tracker,
//! settings and errors.

pub mod batch;
pub mod device;
pub mod error;
pub mod settings;
