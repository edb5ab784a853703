//! Console output for the intake service.

pub mod console;

pub use console::{render, ConsoleReporter, OutputCallback};
