//! Purpose: `notebridge` CLI entry point.
//! Role: Binary crate root; parses args, builds the interpreter, dispatches commands.
//! Invariants: stdout carries results only (payload text on a TTY, JSON otherwise).
//! Invariants: Diagnostics and logs go to stderr; non-interactive errors are JSON.
//! Invariants: Process exit code is derived from `api::to_exit_code`.
use std::ffi::OsString;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use tracing_subscriber::EnvFilter;

mod command_dispatch;
mod serve;
mod stdio;

use notebridge::api::{Error, ErrorKind, InterpreterConfig, to_exit_code};

#[derive(Copy, Clone, Debug)]
struct RunOutcome {
    exit_code: i32,
}

impl RunOutcome {
    fn ok() -> Self {
        Self { exit_code: 0 }
    }

    fn with_code(exit_code: i32) -> Self {
        Self { exit_code }
    }
}

fn main() {
    let exit_code = match run() {
        Ok(outcome) => outcome.exit_code,
        Err((err, color_mode)) => {
            emit_error(&err, color_mode);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<RunOutcome, (Error, ColorMode)> {
    let cli = match Cli::try_parse_from(std::env::args_os().collect::<Vec<OsString>>()) {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    (
                        Error::new(ErrorKind::Io)
                            .with_message("failed to write help")
                            .with_source(io_err),
                        ColorMode::Auto,
                    )
                })?;
                let exit_code = if matches!(
                    err.kind(),
                    ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                ) {
                    2
                } else {
                    0
                };
                return Ok(RunOutcome::with_code(exit_code));
            }
            _ => {
                return Err((
                    Error::new(ErrorKind::Usage)
                        .with_message(clap_error_summary(&err))
                        .with_hint("Try `notebridge --help`."),
                    ColorMode::Auto,
                ));
            }
        },
    };

    let color_mode = cli.color;
    init_tracing(match cli.command {
        Command::Serve { .. } => "info",
        _ => "warn",
    });

    let config = interpreter_config(&cli).map_err(|err| (err, color_mode))?;
    command_dispatch::dispatch_command(cli.command, config)
        .map_err(|err| (err, color_mode))
}

fn interpreter_config(cli: &Cli) -> Result<InterpreterConfig, Error> {
    let mut pairs = Vec::with_capacity(cli.property.len());
    for property in &cli.property {
        let (key, value) = property.split_once('=').ok_or_else(|| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid property: {property}"))
                .with_hint("Use KEY=VALUE, e.g. --property eager-save=false.")
        })?;
        pairs.push((key.trim(), value));
    }
    let mut config = InterpreterConfig::from_properties(pairs)?;
    if let Some(dir) = &cli.state_dir {
        config = config.with_state_dir(dir);
    }
    if cli.no_eager_save {
        config = config.with_eager_save(false);
    }
    Ok(config)
}

fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(
    name = "notebridge",
    version,
    about = "Persistent command sessions for notebooks",
    long_about = None,
    before_help = r#"Each note id owns one engine session. Text sent to a note runs in that
session; its output comes back as plain text or as a tab-separated table.
Session variables are saved under the state directory and restored on next use.
"#,
    after_help = r#"EXAMPLES
  $ notebridge run 2A94M5J1Z 'xs = [1, 2, 3]'
  $ notebridge run 2A94M5J1Z 'ys = [4, 5]
  table xs ys'
  $ notebridge state show 2A94M5J1Z
  $ notebridge serve --bind 127.0.0.1:9710

NOTES
  - Default state directory: notebridge/states (override with --state-dir)
  - Log level: RUST_LOG (e.g. RUST_LOG=debug)"#,
    arg_required_else_help = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Directory for per-note state files (default: notebridge/states)",
        value_hint = ValueHint::DirPath
    )]
    state_dir: Option<PathBuf>,
    #[arg(
        short = 'p',
        long,
        global = true,
        help = "Interpreter property KEY=VALUE (state-dir, eager-save); repeatable"
    )]
    property: Vec<String>,
    #[arg(
        long,
        global = true,
        help = "Save session state only when the interpreter closes"
    )]
    no_eager_save: bool,
    #[arg(
        long,
        global = true,
        default_value = "auto",
        value_enum,
        help = "Colorize stderr diagnostics: auto|always|never"
    )]
    color: ColorMode,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ColorMode {
    Auto,
    Always,
    Never,
}

impl ColorMode {
    fn use_color(self, is_tty: bool) -> bool {
        match self {
            ColorMode::Auto => is_tty,
            ColorMode::Always => true,
            ColorMode::Never => false,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(
        arg_required_else_help = true,
        about = "Interpret text in a note's session",
        long_about = r#"Interpret TEXT (or stdin when omitted) in the session for NOTE, print the
result, and save the session state.

Exit status is 0 for a successful result and 1 when the engine reported an error."#,
        after_help = r#"EXAMPLES
  $ notebridge run demo 'greeting = "hello"'
  $ notebridge run demo 'print $greeting'
  $ printf 'a = [1, 2]\nb = [3, 4]\ntable a b\n' | notebridge run demo
  $ notebridge run demo --json 'vars'"#
    )]
    Run {
        #[arg(help = "Note id (session key)")]
        note: String,
        #[arg(help = "Text to interpret; read from stdin when omitted")]
        text: Option<String>,
        #[arg(long, help = "Emit the result as JSON even on a terminal")]
        json: bool,
    },
    #[command(
        about = "Serve newline-delimited JSON requests on stdin/stdout",
        long_about = r#"Read one JSON request per line from stdin and write one JSON response per line
to stdout. EOF closes every session and saves its state.

Requests:
  {"note": "N", "text": "..."}                       interpret (default op)
  {"op": "completion", "note": "N", "buffer": "...", "cursor": 3}
  {"op": "cancel", "note": "N"}
  {"op": "progress", "note": "N"}
An optional "id" is echoed back in the response."#
    )]
    Stdio,
    #[command(
        about = "Serve notes over HTTP",
        long_about = r#"Run an HTTP/JSON server exposing the interpreter.

Routes:
  GET  /healthz
  GET  /v0/notes
  POST /v0/notes/:note/interpret    {"text": "..."}
  POST /v0/notes/:note/cancel
  GET  /v0/notes/:note/completion?buffer=...&cursor=N"#,
        after_help = r#"EXAMPLES
  $ notebridge serve
  $ notebridge serve --bind 127.0.0.1:9710 --state-dir /var/lib/notebridge"#
    )]
    Serve {
        #[arg(long, default_value = "127.0.0.1:9710", help = "Bind address (host:port)")]
        bind: String,
        #[arg(long, help = "Allow binding to a non-loopback address")]
        allow_non_loopback: bool,
    },
    #[command(
        arg_required_else_help = true,
        about = "Inspect saved session state",
        after_help = r#"EXAMPLES
  $ notebridge state list
  $ notebridge state show demo
  $ notebridge state delete demo other"#
    )]
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
    #[command(about = "Generate shell completion scripts")]
    Completion {
        #[arg(value_enum)]
        shell: Shell,
    },
    #[command(about = "Print version information")]
    Version,
}

#[derive(Subcommand)]
enum StateCommand {
    #[command(about = "List saved sessions")]
    List {
        #[arg(long, help = "Emit JSON instead of human-readable output")]
        json: bool,
    },
    #[command(arg_required_else_help = true, about = "Show a saved session namespace")]
    Show {
        #[arg(help = "Note id")]
        note: String,
        #[arg(long, help = "Emit JSON instead of human-readable output")]
        json: bool,
    },
    #[command(arg_required_else_help = true, about = "Delete saved session state")]
    Delete {
        #[arg(required = true, help = "Note id(s) to delete")]
        notes: Vec<String>,
    },
}

fn emit_json(value: Value) {
    let json = if io::stdout().is_terminal() {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    }
    .unwrap_or_else(|_| "{\"error\":\"json encode failed\"}".to_string());
    println!("{json}");
}

fn emit_error(err: &Error, color_mode: ColorMode) {
    let is_tty = io::stderr().is_terminal();
    if is_tty {
        eprintln!("{}", error_text(err, color_mode.use_color(is_tty)));
        return;
    }

    let value = error_json(err);
    let json = serde_json::to_string(&value).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    if let Some(message) = err.message() {
        return message.to_string();
    }
    match err.kind() {
        ErrorKind::Internal => "internal error".to_string(),
        ErrorKind::Usage => "usage error".to_string(),
        ErrorKind::NotFound => "not found".to_string(),
        ErrorKind::Engine => "engine error".to_string(),
        ErrorKind::Corrupt => "corrupt state".to_string(),
        ErrorKind::InvalidStateDir => "invalid state directory".to_string(),
        ErrorKind::Io => "i/o error".to_string(),
    }
}

fn error_causes(err: &Error) -> Vec<String> {
    use std::error::Error as StdError;

    let mut causes = Vec::new();
    let mut cur = err.source();
    while let Some(source) = cur {
        causes.push(source.to_string());
        cur = source.source();
    }
    causes
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(hint) = err.hint() {
        inner.insert("hint".to_string(), json!(hint));
    }
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if let Some(key) = err.key() {
        inner.insert("key".to_string(), json!(key));
    }
    let causes = error_causes(err);
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }

    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn error_text(err: &Error, use_color: bool) -> String {
    let mut lines = vec![format!(
        "{} {}",
        colorize_label("error:", use_color, AnsiColor::Red),
        error_message(err)
    )];
    if let Some(hint) = err.hint() {
        lines.push(format!(
            "{} {hint}",
            colorize_label("hint:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(key) = err.key() {
        lines.push(format!(
            "{} {key}",
            colorize_label("note:", use_color, AnsiColor::Yellow)
        ));
    }
    if let Some(path) = err.path() {
        lines.push(format!(
            "{} {}",
            colorize_label("path:", use_color, AnsiColor::Yellow),
            path.display()
        ));
    }
    if let Some(cause) = error_causes(err).first() {
        lines.push(format!(
            "{} {cause}",
            colorize_label("caused by:", use_color, AnsiColor::Yellow)
        ));
    }
    lines.join("\n")
}

#[derive(Copy, Clone, Debug)]
enum AnsiColor {
    Red,
    Yellow,
}

fn colorize_label(label: &str, use_color: bool, color: AnsiColor) -> String {
    if !use_color {
        return label.to_string();
    }
    let code = match color {
        AnsiColor::Red => "31",
        AnsiColor::Yellow => "33",
    };
    format!("\x1b[1;{code}m{label}\x1b[0m")
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command, error_json, interpreter_config};
    use clap::Parser;
    use notebridge::api::{DEFAULT_STATE_DIR, Error, ErrorKind};
    use std::path::PathBuf;

    #[test]
    fn state_dir_flag_overrides_property() {
        let cli = Cli::try_parse_from([
            "notebridge",
            "--property",
            "state-dir=/from/property",
            "--state-dir",
            "/from/flag",
            "--no-eager-save",
            "stdio",
        ])
        .expect("parse");
        let config = interpreter_config(&cli).expect("config");
        assert_eq!(config.state_dir, PathBuf::from("/from/flag"));
        assert!(!config.eager_save);
        assert!(matches!(cli.command, Command::Stdio));
    }

    #[test]
    fn malformed_property_is_usage_error() {
        let cli = Cli::try_parse_from(["notebridge", "-p", "eager-save", "stdio"]).expect("parse");
        let err = interpreter_config(&cli).expect_err("bad property");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn error_json_carries_context() {
        let err = Error::new(ErrorKind::NotFound)
            .with_message("no saved state")
            .with_key("demo")
            .with_hint("Run something in the note first.");
        let value = error_json(&err);
        assert_eq!(value["error"]["kind"], "NotFound");
        assert_eq!(value["error"]["key"], "demo");
        assert_eq!(value["error"]["hint"], "Run something in the note first.");
    }

    #[test]
    fn default_state_dir_constant_matches_help() {
        assert_eq!(DEFAULT_STATE_DIR, "notebridge/states");
    }
}
