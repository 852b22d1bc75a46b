#![deny(warnings)]

//! Convert a JSON save into the compact bincode format, or back.
//!
//! Usage: migrate <input> <output>. The direction follows the input
//! extension: `.json` in means bincode out, anything else means JSON out.

use anyhow::{bail, Context};
use std::fs;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let (Some(input), Some(output)) = (args.next(), args.next()) else {
        bail!("usage: migrate <input> <output>");
    };
    let input = Path::new(&input);
    let is_json = input.extension().map_or(false, |e| e == "json");
    let snap = if is_json {
        persistence::load_json(input)?
    } else {
        let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
        persistence::from_bincode(&bytes)?
    };
    if is_json {
        fs::write(&output, persistence::to_bincode(&snap)?)?;
    } else {
        persistence::save_json(&output, &snap)?;
    }
    println!(
        "Save migrated to {} (turn {}, content {})",
        output, snap.turn, snap.content_id
    );
    Ok(())
}
