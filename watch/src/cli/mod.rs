//! Command line of the `screeps-watch` binary

pub mod args;

pub use args::{Args, Command};
