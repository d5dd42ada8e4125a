// ABOUTME: Command implementations
// ABOUTME: Exports the dump command

pub mod dump;

pub use dump::dump;
