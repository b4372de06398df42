//! Identify every glyph of obfuscation fonts
//!
//! Runs the fast path and, unless disabled, the slow path against reference
//! fonts. Confident slow matches are recorded in the coordinate table.
//!
//! Usage:
//!   cargo run --release --bin slow_match -- --reference SourceHanSansSC-Normal.otf font.ttf
//!   cargo run --release --bin slow_match -- --config engine.json --guess-range cjk font.ttf
//!   cargo run --release --bin slow_match -- --remote-table shared.json --fast-only font.ttf
//!
//! Options:
//!   --config FILE         JSON engine configuration (other options override it)
//!   --table FILE          Local coordinate table
//!   --bundled FILE        Bundled baseline table
//!   --reference FILE      Reference font, repeatable, searched in order
//!   --threshold X         Acceptance threshold (fraction of glyph size)
//!   --timeout-ms N        Slow-path deadline per glyph
//!   --guess-range R       `cjk`, or a UTF-8 file listing allowed characters
//!   --remote-table FILE   Reconcile this table into the local one first
//!   --fast-only           Do not run the slow path

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use glyph_match::{Engine, EngineConfig, GuessRange, MatchResult, SlowMode};

struct Args {
    config: EngineConfig,
    guess_range: GuessRange,
    remote_table: Option<PathBuf>,
    fast_only: bool,
    fonts: Vec<PathBuf>,
}

impl Args {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = std::env::args().collect();

        // The config file is applied first so flags can override it.
        let mut config = match args.iter().position(|a| a == "--config") {
            Some(i) => {
                let path = args.get(i + 1).ok_or("--config needs a value")?;
                EngineConfig::from_json_file(path).map_err(|e| e.to_string())?
            },
            None => EngineConfig::new(),
        };
        let mut guess_range = GuessRange::all();
        let mut remote_table = None;
        let mut fast_only = false;
        let mut fonts = Vec::new();

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || -> Result<String, String> {
                i += 1;
                args.get(i).cloned().ok_or_else(|| format!("{} needs a value", flag))
            };
            match flag {
                "--config" => {
                    value()?;
                },
                "--table" => config.table_path = PathBuf::from(value()?),
                "--bundled" => config.bundled_table_path = PathBuf::from(value()?),
                "--reference" => config.reference_fonts.push(PathBuf::from(value()?)),
                "--threshold" => {
                    let v = value()?;
                    config.accept_threshold =
                        v.parse().map_err(|_| format!("invalid threshold '{}'", v))?;
                },
                "--timeout-ms" => {
                    let v = value()?;
                    let ms: u64 = v.parse().map_err(|_| format!("invalid timeout '{}'", v))?;
                    config.slow_timeout = Duration::from_millis(ms);
                },
                "--guess-range" => {
                    let v = value()?;
                    guess_range = if v == "cjk" {
                        GuessRange::cjk_unified()
                    } else {
                        let text = std::fs::read_to_string(&v)
                            .map_err(|e| format!("guess range {}: {}", v, e))?;
                        GuessRange::from_chars(text.chars().filter(|c| !c.is_whitespace()))
                    };
                },
                "--remote-table" => remote_table = Some(PathBuf::from(value()?)),
                "--fast-only" => fast_only = true,
                other if other.starts_with("--") => return Err(format!("unknown option {}", other)),
                other => fonts.push(PathBuf::from(other)),
            }
            i += 1;
        }

        if fonts.is_empty() {
            return Err("no font files given".to_string());
        }

        Ok(Self {
            config,
            guess_range,
            remote_table,
            fast_only,
            fonts,
        })
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match Args::from_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Usage: slow_match [--reference FONT]... [options] FONT...");
            return ExitCode::from(2);
        },
    };

    let engine = match Engine::open(args.config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        },
    };

    if let Some(remote) = &args.remote_table {
        match std::fs::read(remote) {
            Ok(bytes) => {
                let report = engine.reconcile_table(&bytes);
                println!(
                    "Reconciled {}: {} added, {} conflicts{}",
                    remote.display(),
                    report.added,
                    report.conflicts.len(),
                    if report.remote_corrupt { " (remote table corrupt, ignored)" } else { "" }
                );
            },
            Err(e) => eprintln!("Warning: cannot read {}: {}", remote.display(), e),
        }
    }

    let mode = if args.fast_only {
        SlowMode::Disabled
    } else {
        SlowMode::Enabled(args.guess_range)
    };

    let mut failed = false;
    for path in &args.fonts {
        let start = Instant::now();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                failed = true;
                continue;
            },
        };

        let report = match engine.identify_font(&bytes, mode.clone()) {
            Ok(report) => report,
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                failed = true;
                continue;
            },
        };

        println!("# {} ({})", path.display(), report.fingerprint);
        for m in &report.results {
            let shown = char::from_u32(m.code_point)
                .map(|c| c.to_string())
                .unwrap_or_else(|| "?".to_string());
            match m.result {
                MatchResult::Resolved { .. } => {
                    println!("U+{:04X} {} -> {}", m.code_point, shown, m.result)
                },
                MatchResult::Unresolved(_) => {
                    println!("U+{:04X} {} -- {}", m.code_point, shown, m.result)
                },
            }
        }
        println!(
            "# {}/{} resolved, {} slow searches in {:?}, total {:?}",
            report.resolved_count(),
            report.results.len(),
            report.slow_searches,
            report.slow_path_time,
            start.elapsed()
        );
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
