//  LIB.rs
//
//  Description:
//!   The `kappal-cli` crate implements the Compose-verb workflows behind
//!   the `kappal` binary: `up`, `down`, `ps`, `logs`, `exec`, `build`,
//!   `clean` and `eject`, each sequencing the engine crates.
//

// Declare modules
pub mod errors;
pub mod utils;
pub mod up;
pub mod down;
pub mod ps;
pub mod logs;
pub mod exec;
pub mod build;
pub mod clean;
pub mod eject;
