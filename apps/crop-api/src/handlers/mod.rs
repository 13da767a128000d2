//! Handlers 模块

pub mod devices;
pub mod farms;
pub mod health;

pub use devices::*;
pub use farms::*;
pub use health::*;
