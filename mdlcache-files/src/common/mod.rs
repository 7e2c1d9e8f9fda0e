pub mod compression;
pub mod reader;
pub mod types;
