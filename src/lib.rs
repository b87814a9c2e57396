pub mod archive;
pub mod call_frame;
pub mod class;
pub mod class_file;
pub mod coerce;
pub mod descriptor;
pub mod error;
pub mod format;
pub mod heap;
pub mod instructions;
pub mod jdk;
pub mod pipeline;
pub mod reader;
pub mod request;
pub mod vm;
