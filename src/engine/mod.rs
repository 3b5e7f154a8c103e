// Encoding engine - independent of the CLI front-end

pub mod core;
pub mod crop;
pub mod error;
pub mod hardware;
pub mod probe;
pub mod process;
pub mod streams;
pub mod worker;

pub use self::core::*;
