//! CLI binary for running and validating fly rule sets.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fly_pipe::{MapRecord, MappingAccessor, Pipe, Severity};
use fly_types::{FlyError, Value};

#[derive(Parser)]
#[command(name = "fly", version, about = "Apply declarative match/alter rules to JSON records")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a rule set to JSON-lines records
    Run {
        /// Path to the JSON rule set
        #[arg(short, long)]
        rules: PathBuf,

        /// JSON-lines input file (default: stdin)
        input: Option<PathBuf>,

        /// Abort on the first record that fails instead of skipping it
        #[arg(long)]
        fail_fast: bool,
    },

    /// Lint a rule set
    Validate {
        /// Path to the JSON rule set
        #[arg(short, long)]
        rules: PathBuf,

        /// Print diagnostics as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Show the rules in evaluation order
    Info {
        /// Path to the JSON rule set
        #[arg(short, long)]
        rules: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            rules,
            input,
            fail_fast,
        } => {
            cmd_run(&rules, input.as_deref(), fail_fast)?;
        }
        Commands::Validate { rules, json } => {
            cmd_validate(&rules, json)?;
        }
        Commands::Info { rules } => {
            cmd_info(&rules)?;
        }
    }

    Ok(())
}

fn load_pipe(path: &Path) -> anyhow::Result<Pipe> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rule set {}", path.display()))?;
    let pipe = Pipe::from_json(&source)
        .with_context(|| format!("Invalid rule set {}", path.display()))?;
    Ok(pipe)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Counters reported at the end of a run.
#[derive(Debug, Default, PartialEq, Eq)]
struct RunStats {
    read: usize,
    written: usize,
    dropped: usize,
    failed: usize,
}

fn cmd_run(rules: &Path, input: Option<&Path>, fail_fast: bool) -> anyhow::Result<()> {
    let pipe = load_pipe(rules)?;
    let stdout = io::stdout();
    let mut writer = BufWriter::new(stdout.lock());

    let stats = match input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            run_stream(&pipe, BufReader::new(file), &mut writer, fail_fast)?
        }
        None => run_stream(&pipe, io::stdin().lock(), &mut writer, fail_fast)?,
    };
    writer.flush()?;

    tracing::info!(
        read = stats.read,
        written = stats.written,
        dropped = stats.dropped,
        failed = stats.failed,
        "Run complete"
    );
    Ok(())
}

/// Push every JSON-lines record from `reader` through `pipe`, writing the
/// survivors to `writer`. Blank lines are ignored. A record that fails is
/// skipped unless `fail_fast` is set or the failure lies in the rule set.
fn run_stream<R: BufRead, W: Write>(
    pipe: &Pipe,
    reader: R,
    writer: &mut W,
    fail_fast: bool,
) -> anyhow::Result<RunStats> {
    let mut stats = RunStats::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        stats.read += 1;
        let line_no = index + 1;

        let outcome = decode_record(&line).and_then(|record| {
            pipe.process(&MappingAccessor, record)
                .map_err(anyhow::Error::from)
        });
        match outcome {
            Ok(Some(record)) => {
                serde_json::to_writer(&mut *writer, &encode_record(&record))?;
                writer.write_all(b"\n")?;
                stats.written += 1;
            }
            Ok(None) => stats.dropped += 1,
            Err(e) if fail_fast || is_rule_set_fault(&e) => {
                return Err(e.context(format!("Record on line {line_no}")))
            }
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "Skipping record");
                stats.failed += 1;
            }
        }
    }
    Ok(stats)
}

/// A faulty rule set fails every record alike, so it is never skipped.
fn is_rule_set_fault(err: &anyhow::Error) -> bool {
    err.downcast_ref::<FlyError>()
        .is_some_and(FlyError::is_configuration_error)
}

fn decode_record(line: &str) -> anyhow::Result<MapRecord> {
    let json: serde_json::Value = serde_json::from_str(line)?;
    let serde_json::Value::Object(fields) = json else {
        bail!("Record must be a JSON object, got {json}");
    };
    Ok(fields
        .into_iter()
        .map(|(key, value)| (key, Value::from(value)))
        .collect())
}

fn encode_record(record: &MapRecord) -> serde_json::Value {
    serde_json::Value::Object(
        record
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// validate / info
// ---------------------------------------------------------------------------

fn cmd_validate(path: &Path, json: bool) -> anyhow::Result<()> {
    let pipe = load_pipe(path)?;
    let diagnostics = fly_pipe::validate(pipe.rules());
    let has_error = diagnostics.iter().any(|d| d.severity == Severity::Error);

    if json {
        println!("{}", serde_json::to_string_pretty(&diagnostics)?);
    } else if diagnostics.is_empty() {
        println!("Rule set is valid ({} rules)", pipe.len());
    } else {
        for diag in &diagnostics {
            let severity = match diag.severity {
                Severity::Error => "ERROR",
                Severity::Warning => "WARN",
                Severity::Info => "INFO",
            };
            let location = match (diag.rule_index, &diag.field) {
                (Some(i), Some(field)) => format!(" (rule #{i}, field '{field}')"),
                (Some(i), None) => format!(" (rule #{i})"),
                _ => String::new(),
            };
            println!("[{}] {}: {}{}", severity, diag.rule, diag.message, location);
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let pipe = load_pipe(path)?;

    println!("Rules: {}", pipe.len());
    for (index, rule) in pipe.rules().iter().enumerate() {
        let fields = rule
            .matcher
            .as_ref()
            .map(|fields| {
                fields
                    .iter()
                    .map(|f| f.field.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_else(|| "(always)".into());
        let alter = match rule.alter {
            Some(ref section) => {
                let mut parts: Vec<String> =
                    section.groups.iter().map(|g| g.operator.to_string()).collect();
                match section.drop {
                    Some(fly_pipe::DropTarget::Record) => parts.insert(0, "drop ALL".into()),
                    Some(fly_pipe::DropTarget::Fields(ref f)) => {
                        parts.insert(0, format!("drop [{}]", f.join(", ")))
                    }
                    None => {}
                }
                parts.join(", ")
            }
            None => "(none)".into(),
        };
        println!(
            "  #{} priority={} mode={:?} match=[{}] alter=[{}]",
            index, rule.priority, rule.mode, fields, alter
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn write_rules(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    const RULES: &str = r#"[
        {"priority": 1,
         "match": {"hostname": {"conditions": [["endswith", ".ru"]]}},
         "alter": {"set": {"status": {"value": "0", "type": "int"}}}},
        {"priority": 0,
         "match": {"hostname": {"conditions": [["iexact", "SPAM.com"]]}},
         "alter": {"drop": "ALL"}}
    ]"#;

    fn run(input: &str, fail_fast: bool) -> (anyhow::Result<RunStats>, String) {
        let file = write_rules(RULES);
        let pipe = load_pipe(file.path()).unwrap();
        let mut out = Vec::new();
        let stats = run_stream(&pipe, Cursor::new(input), &mut out, fail_fast);
        (stats, String::from_utf8(out).unwrap())
    }

    #[test]
    fn run_writes_survivors_only() {
        let input = concat!(
            "{\"hostname\": \"mail.ru\", \"status\": 1}\n",
            "\n",
            "{\"hostname\": \"spam.com\", \"status\": 1}\n",
            "{\"hostname\": \"example.org\", \"status\": 1}\n",
        );
        let (stats, out) = run(input, false);
        assert_eq!(
            stats.unwrap(),
            RunStats { read: 3, written: 2, dropped: 1, failed: 0 }
        );
        let lines: Vec<serde_json::Value> =
            out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines[0]["status"], 0);
        assert_eq!(lines[1]["hostname"], "example.org");
    }

    #[test]
    fn bad_records_are_skipped_unless_fail_fast() {
        let input = "[1, 2]\n{\"hostname\": \"mail.ru\"}\n";
        let (stats, out) = run(input, false);
        assert_eq!(stats.unwrap().failed, 1);
        assert_eq!(out.lines().count(), 1);

        let (stats, _) = run(input, true);
        let err = stats.unwrap_err();
        assert!(format!("{err:#}").contains("line 1"), "got: {err:#}");
    }

    #[test]
    fn rule_set_faults_abort_without_fail_fast() {
        let file = write_rules(
            r#"[{"match": {"hostname": {"conditions": [["regex", "(unclosed"]]}}}]"#,
        );
        let pipe = load_pipe(file.path()).unwrap();
        let input = "{\"hostname\": \"mail.ru\"}\n{\"hostname\": \"ya.ru\"}\n";
        let mut out = Vec::new();

        let err = run_stream(&pipe, Cursor::new(input), &mut out, false).unwrap_err();
        assert!(format!("{err:#}").contains("line 1"), "got: {err:#}");
        assert!(matches!(
            err.downcast_ref::<FlyError>(),
            Some(FlyError::InvalidPattern { .. })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn output_keeps_input_key_order() {
        let input = "{\"zone\": \"b\", \"hostname\": \"mail.ru\", \"age\": 3}\n";
        let (stats, out) = run(input, false);
        assert_eq!(stats.unwrap().written, 1);
        assert_eq!(out.trim(), r#"{"zone":"b","hostname":"mail.ru","age":3,"status":0}"#);
    }

    #[test]
    fn load_pipe_reports_invalid_rules() {
        let file = write_rules(r#"[{"alter": {"explode": {}}}]"#);
        let err = load_pipe(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("Unknown alter operator explode"));
    }

    #[test]
    fn load_pipe_sorts_rules() {
        let file = write_rules(RULES);
        let pipe = load_pipe(file.path()).unwrap();
        assert_eq!(pipe.rules()[0].priority, 0);
    }
}
