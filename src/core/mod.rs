//! The core module holds the device, its queue and configuration, and the crate error type.

pub mod app_info;
pub mod device;
pub mod error;
pub mod queue;
