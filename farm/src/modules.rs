//! Built-in modules, selected by name in the configuration.

pub mod default;
pub mod sweep;
