//! Purpose: Hold top-level CLI command dispatch for `notebridge`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Commands needing persistence validate the state directory up front.
//! Invariants: `run` exits 0 for Success results and 1 for Error results.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use clap::CommandFactory;
use notebridge::api::{NotebookInterpreter, StateStore};
use notebridge::script::script_engine_factory;

use super::*;

pub(super) fn dispatch_command(
    command: Command,
    config: InterpreterConfig,
) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "notebridge", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            if io::stdout().is_terminal() {
                println!("notebridge {}", env!("CARGO_PKG_VERSION"));
            } else {
                emit_json(json!({ "name": "notebridge", "version": env!("CARGO_PKG_VERSION") }));
            }
            Ok(RunOutcome::ok())
        }
        Command::Run { note, text, json } => {
            let text = match text {
                Some(text) => text,
                None => read_stdin()?,
            };
            let interpreter = open_interpreter(config)?;
            let result = interpreter.interpret(&note, &text);
            let report = interpreter.close();

            if json || !io::stdout().is_terminal() {
                emit_json(json!({ "note": note, "result": result }));
            } else {
                emit_payload(&result.payload)?;
            }
            if let Some((_, err)) = report.failed.into_iter().next() {
                return Err(err);
            }
            Ok(if result.is_success() {
                RunOutcome::ok()
            } else {
                RunOutcome::with_code(1)
            })
        }
        Command::Stdio => {
            let interpreter = open_interpreter(config)?;
            stdio::serve(&interpreter)?;
            Ok(RunOutcome::ok())
        }
        Command::Serve {
            bind,
            allow_non_loopback,
        } => {
            let bind: SocketAddr = bind.parse().map_err(|_| {
                Error::new(ErrorKind::Usage)
                    .with_message("invalid bind address")
                    .with_hint("Use a host:port value like 127.0.0.1:9710.")
            })?;
            let serve_config = serve::ServeConfig {
                bind,
                allow_non_loopback,
            };
            let interpreter = Arc::new(open_interpreter(config)?);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start async runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(serve_config, interpreter))?;
            Ok(RunOutcome::ok())
        }
        Command::State { command } => {
            let store = StateStore::new(&config.state_dir);
            dispatch_state_command(command, &store)
        }
    }
}

fn dispatch_state_command(
    command: StateCommand,
    store: &StateStore,
) -> Result<RunOutcome, Error> {
    match command {
        StateCommand::List { json } => {
            let states = store.list()?;
            if json || !io::stdout().is_terminal() {
                let values: Vec<Value> = states
                    .iter()
                    .map(|info| {
                        json!({
                            "key": info.key,
                            "path": info.path.display().to_string(),
                            "size": info.size,
                            "modified": info.modified,
                        })
                    })
                    .collect();
                emit_json(json!({ "states": values }));
            } else if states.is_empty() {
                println!("No saved sessions in {}.", store.state_dir().display());
            } else {
                let width = states.iter().map(|info| info.key.len()).max().unwrap_or(0);
                for info in &states {
                    println!(
                        "{:<width$}  {:>8}  {}",
                        info.key,
                        format_bytes(info.size),
                        info.modified.as_deref().unwrap_or("-"),
                    );
                }
            }
            Ok(RunOutcome::ok())
        }
        StateCommand::Show { note, json } => {
            let snapshot = store.read_snapshot(&note)?.ok_or_else(|| {
                Error::new(ErrorKind::NotFound)
                    .with_message("no saved state for note")
                    .with_key(&note)
                    .with_hint("Run something in the note first, or check --state-dir.")
            })?;
            if json || !io::stdout().is_terminal() {
                let value = serde_json::to_value(&snapshot).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode snapshot")
                        .with_source(err)
                })?;
                emit_json(value);
            } else {
                println!("note:  {}", snapshot.key);
                println!("saved: {}", snapshot.saved_at);
                for (name, value) in &snapshot.namespace {
                    println!("  {name} = {value}");
                }
            }
            Ok(RunOutcome::ok())
        }
        StateCommand::Delete { notes } => {
            let mut deleted = Vec::new();
            for note in &notes {
                if !store.delete(note)? {
                    return Err(Error::new(ErrorKind::NotFound)
                        .with_message("no saved state for note")
                        .with_key(note));
                }
                deleted.push(note.clone());
            }
            if !io::stdout().is_terminal() {
                emit_json(json!({ "deleted": deleted }));
            }
            Ok(RunOutcome::ok())
        }
    }
}

fn open_interpreter(config: InterpreterConfig) -> Result<NotebookInterpreter, Error> {
    StateStore::new(&config.state_dir).ensure_dir()?;
    let interpreter = NotebookInterpreter::new(config, script_engine_factory());
    interpreter.open();
    Ok(interpreter)
}

fn read_stdin() -> Result<String, Error> {
    let mut text = String::new();
    io::stdin().read_to_string(&mut text).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read stdin")
            .with_source(err)
    })?;
    Ok(text)
}

fn emit_payload(payload: &str) -> Result<(), Error> {
    let mut stdout = io::stdout().lock();
    let result = if payload.is_empty() || payload.ends_with('\n') {
        stdout.write_all(payload.as_bytes())
    } else {
        writeln!(stdout, "{payload}")
    };
    result.map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write result")
            .with_source(err)
    })
}

fn format_bytes(value: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    if value >= MIB {
        format!("{:.1}M", value as f64 / MIB as f64)
    } else if value >= KIB {
        format!("{:.1}K", value as f64 / KIB as f64)
    } else {
        format!("{value}B")
    }
}
