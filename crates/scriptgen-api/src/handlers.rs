//! Request handlers.

pub mod health;
pub mod scripts;

pub use health::*;
pub use scripts::*;
