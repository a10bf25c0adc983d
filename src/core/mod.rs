// Session core: values, channels, the engine seam, containers, and result translation.
pub mod channel;
pub mod container;
pub mod engine;
pub mod error;
pub mod result;
pub mod translate;
pub mod value;
