#![deny(warnings)]

//! Headless CLI: run the autopilot over a content pack and print a summary.

use anyhow::{bail, Context, Result};
use prog_core::SessionConfig;
use prog_runtime::{Session, TurnYields};
use rust_decimal::Decimal;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Args {
    content: Option<PathBuf>,
    turns: u32,
    yields: TurnYields,
    config: SessionConfig,
    save: Option<PathBuf>,
    load: Option<PathBuf>,
}

const USAGE: &str = "usage: progression [--content <dir>] [--turns <n>] [--science <n>] \
[--culture <n>] [--seed <n>] [--boost-chance <f>] [--boost-fraction <d>] \
[--save [path]] [--load <path>] [--version]";

fn value<T: std::str::FromStr>(flag: &str, raw: Option<String>) -> Result<T> {
    let raw = raw.with_context(|| format!("{flag} needs a value"))?;
    raw.parse()
        .map_err(|_| anyhow::anyhow!("invalid value '{raw}' for {flag}"))
}

fn parse_args() -> Result<Option<Args>> {
    let mut args = Args {
        content: None,
        turns: 50,
        yields: TurnYields {
            science: 20,
            culture: 12,
        },
        config: SessionConfig::default(),
        save: None,
        load: None,
    };
    let mut it = std::env::args().skip(1).peekable();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--content" => args.content = Some(value("--content", it.next())?),
            "--turns" => args.turns = value("--turns", it.next())?,
            "--science" => args.yields.science = value("--science", it.next())?,
            "--culture" => args.yields.culture = value("--culture", it.next())?,
            "--seed" => args.config.rng_seed = value("--seed", it.next())?,
            "--boost-chance" => {
                args.config.boost_chance_per_turn = value("--boost-chance", it.next())?
            }
            "--boost-fraction" => {
                args.config.boost_fraction = value::<Decimal>("--boost-fraction", it.next())?
            }
            "--save" => {
                let path = match it.peek() {
                    Some(next) if !next.starts_with("--") => it.next().map(PathBuf::from),
                    _ => None,
                };
                args.save =
                    Some(path.unwrap_or_else(|| PathBuf::from(persistence::default_save_path())));
            }
            "--load" => args.load = Some(value("--load", it.next())?),
            "--version" => {
                println!(
                    "progression {} ({} built {})",
                    env!("CARGO_PKG_VERSION"),
                    env!("GIT_SHA"),
                    env!("BUILD_DATE")
                );
                return Ok(None);
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(None);
            }
            other => bail!("unknown argument '{other}'\n{USAGE}"),
        }
    }
    Ok(Some(args))
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Some(args) = parse_args()? else {
        return Ok(());
    };
    info!(?args, "starting CLI");

    let pack = match &args.content {
        Some(dir) => content::load_dir(dir)
            .with_context(|| format!("loading content pack from {}", dir.display()))?,
        None => content::builtin().context("loading built-in content pack")?,
    };
    let mut session = match &args.load {
        Some(path) => Session::load(&pack, args.config.clone(), path)
            .with_context(|| format!("loading save {}", path.display()))?,
        None => Session::new(&pack, args.config.clone())?,
    };

    let mut combos = 0usize;
    for _ in 0..args.turns {
        let report = session.autopilot_turn(args.yields);
        combos += report.combos.len();
        for id in &report.technologies {
            if let Some(n) = session.tech().node(*id) {
                println!("turn {:>3} | technology | {}", report.turn, n.name());
            }
        }
        for id in &report.civics {
            if let Some(n) = session.civics().node(*id) {
                println!("turn {:>3} | civic      | {}", report.turn, n.name());
            }
        }
        for g in &report.governments_unlocked {
            println!("turn {:>3} | government | {g:?} unlocked", report.turn);
        }
        for name in &report.combos {
            println!("turn {:>3} | combo      | {name}", report.turn);
        }
    }

    let policies = session.policies();
    let equipped: Vec<String> = policies
        .equipped()
        .iter()
        .filter_map(|e| {
            policies
                .card(e.card)
                .map(|c| format!("{} ({} {})", c.name(), e.category, e.slot))
        })
        .collect();
    println!(
        "Session | pack: {} | turn: {} | government: {:?}",
        session.content_id(),
        session.turn(),
        session.government()
    );
    println!(
        "Progress | technologies: {}/{} | civics: {}/{} | cards unlocked: {} | combos fired: {}",
        session.tech().activated_ids().len(),
        session.tech().len(),
        session.civics().activated_ids().len(),
        session.civics().len(),
        policies.unlocked().len(),
        combos
    );
    println!("Policies | {}", equipped.join(", "));
    drop(policies);

    if let Some(path) = &args.save {
        session
            .save(path)
            .with_context(|| format!("writing save {}", path.display()))?;
        println!("Saved | {}", path.display());
    }
    Ok(())
}
