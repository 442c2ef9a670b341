//! A3S Pod CLI - drive pods and containers on a CRI runtime.

pub mod commands;
pub mod output;
