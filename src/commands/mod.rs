//! Subcommand implementations.
//!
//! Each command returns the process exit code: 0 on success, 1 when a
//! check failed in a way the caller should script against (validation
//! violations, seed collisions). Hard errors bubble up as `anyhow`.

use anyhow::Result;

use crate::args::Command;

mod accounts;
mod guest;
mod model;
mod payload;

pub fn run(command: &Command) -> Result<i32> {
    match command {
        Command::Validate(args) => model::validate(args),
        Command::SchemaHash(args) => model::schema_hash(args),
        Command::Convert(args) => model::convert(args),
        Command::Pack(args) => model::pack(args),
        Command::Chunk(args) => model::chunk(args),
        Command::Input(args) => payload::input(args),
        Command::Output(args) => payload::output(args),
        Command::GuestConfig(args) => guest::guest_config(args),
        Command::Accounts(args) => accounts::run(args),
    }
}
