//! fbkit: manifest-driven packaging and account tooling for Frostbite
//! models.
//!
//! The heavy lifting lives in the workspace library crates; this crate
//! wires them into the `fbkit` command-line pipeline:
//! validate → convert/pack → guest-config → derive → chunk.

pub mod args;
pub mod commands;
