//! Command-line interface definitions.

mod commands;
mod display;

pub use commands::{Cli, Commands, GoalAction};
pub use display::Display;
