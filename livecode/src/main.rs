//! Static checking and instrumentation CLI over the validation core.
//!
//! The sandbox protocol needs a live host; everything else — parsing,
//! stripping, static scoring, instrumentation — works offline and is
//! exposed here for lesson authors debugging rule files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use livecode::core::evaluate::{DynamicPayload, StaticPayload, evaluate};
use livecode::core::extract::strip;
use livecode::core::rules::{Rule, RuleSet};
use livecode::exit_codes;
use livecode::instrument::instrument;
use livecode::io::rules_store::load_bundle;
use livecode::markup::{parse, serialize};

#[derive(Parser)]
#[command(
    name = "livecode",
    version,
    about = "Static checks and instrumentation for learner markup"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score a markup file against the base rules and an optional rule file.
    Check {
        file: PathBuf,
        /// Rule bundle JSON (validated against the embedded schema).
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Skip the base well-formedness rules.
        #[arg(long)]
        lax: bool,
    },
    /// Print the script-free markup used for preview renders.
    Strip { file: PathBuf },
    /// Print the document with its script rewritten into the
    /// self-reporting form the sandbox executes.
    Instrument {
        file: PathBuf,
        /// Rule bundle JSON (validated against the embedded schema).
        #[arg(long)]
        rules: Option<PathBuf>,
    },
}

fn main() {
    livecode::logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Check { file, rules, lax } => cmd_check(&file, rules.as_deref(), lax),
        Command::Strip { file } => cmd_strip(&file),
        Command::Instrument { file, rules } => cmd_instrument(&file, rules.as_deref()),
    }
}

fn cmd_check(file: &Path, rules_path: Option<&Path>, lax: bool) -> Result<i32> {
    let text = read_markup(file)?;
    let set = RuleSet::with_base(load_external_rules(rules_path)?, lax);
    let scored = score(&set, &text);
    for rule in &scored.rules {
        let verdict = if rule.is_failing() { "FAIL" } else { "PASS" };
        println!("{verdict} {} {}", rule.kind.label(), rule.needle);
    }
    println!(
        "ratio: {:.2} ({})",
        scored.good_ratio(),
        scored.intent().label()
    );
    Ok(if scored.is_passing() {
        exit_codes::OK
    } else {
        exit_codes::FAILING
    })
}

fn cmd_strip(file: &Path) -> Result<i32> {
    let text = read_markup(file)?;
    let (stripped, _) = strip(&parse(&text));
    println!("{}", serialize(&stripped));
    Ok(exit_codes::OK)
}

fn cmd_instrument(file: &Path, rules_path: Option<&Path>) -> Result<i32> {
    let text = read_markup(file)?;
    let set = RuleSet::new(load_external_rules(rules_path)?);
    let (_, extract) = strip(&parse(&text));
    let script = extract
        .source
        .ok_or_else(|| anyhow!("no script to instrument in {}", file.display()))?;
    let instrumented = instrument(&text, &script, &set)?;
    println!("{}", instrumented.document);
    Ok(exit_codes::OK)
}

fn read_markup(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("read {}", file.display()))
}

fn load_external_rules(path: Option<&Path>) -> Result<Vec<Rule>> {
    match path {
        Some(path) => Ok(load_bundle(path)?.rules),
        None => Ok(Vec::new()),
    }
}

/// Static scoring of a standalone file: the dynamic payload is whatever
/// script the document carries.
fn score(set: &RuleSet, text: &str) -> RuleSet {
    let tree = parse(text);
    let (_, extract) = strip(&tree);
    let script = extract.source.unwrap_or_default();
    evaluate(
        set,
        &StaticPayload {
            raw_text: text,
            tree: &tree,
        },
        &DynamicPayload { script: &script },
    )
}
