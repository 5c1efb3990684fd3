//! Guest config generation.

use std::path::Path;
use std::str::FromStr;

use anyhow::Result;

use fb_guest::{write_guest_config, GuestTemplate};

use crate::args::GuestConfigArgs;

pub fn guest_config(args: &GuestConfigArgs) -> Result<i32> {
    let template = args
        .template
        .as_deref()
        .map(GuestTemplate::from_str)
        .transpose()?;
    let guest_dir = args.guest.clone().unwrap_or_else(|| {
        args.manifest
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("guest")
    });
    let written = write_guest_config(
        &args.manifest,
        &guest_dir,
        template,
        args.schema_hash.into(),
    )?;
    println!("Wrote guest config: {}", written.display());
    Ok(0)
}
