pub mod common;
pub mod fs;
pub mod memory;
pub mod queued;
