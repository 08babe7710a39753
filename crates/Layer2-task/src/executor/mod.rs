//! Converters
//!
//! - `DccConverter` - runs the external `dcc` tool as a child process
//! - `Converter` - trait for plugging in other backends (and test doubles)

pub mod process;
pub mod r#trait;

pub use process::DccConverter;
pub use r#trait::Converter;
