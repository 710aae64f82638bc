//! Side-effecting adapters: processes, git, the result cache, config, badges.

pub mod badges;
pub mod cache;
pub mod config;
pub mod fsutil;
pub mod git;
pub mod process;
pub mod toolchain;
