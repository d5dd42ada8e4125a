// ABOUTME: Library module for mysql-large-dump
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod backup;
pub mod commands;
pub mod config;
pub mod error;
pub mod interactive;
pub mod mysql;
pub mod tunnel;
pub mod utils;
