//! Purpose: Serve interpreter requests as newline-delimited JSON over stdio.
//! Exports: `serve`.
//! Role: Line-protocol host for the notebook interpreter (one request, one response).
//! Invariants: stdout only emits JSON responses (one JSON value per line).
//! Invariants: stdin EOF closes the interpreter, saving every session.
//! Invariants: Malformed requests get an error response; the loop keeps going.

use std::io::{self, BufRead, BufReader, BufWriter, Write};

use notebridge::api::{Error, ErrorKind, NotebookInterpreter};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Op {
    #[default]
    Interpret,
    Completion,
    Cancel,
    Progress,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    op: Op,
    note: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    buffer: String,
    #[serde(default)]
    cursor: Option<usize>,
}

pub(super) fn serve(interpreter: &NotebookInterpreter) -> Result<(), Error> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let reader = BufReader::new(stdin.lock());
    let writer = BufWriter::new(stdout.lock());
    serve_and_close(interpreter, reader, writer)
}

/// Runs the request loop, then closes the interpreter even when the loop failed.
fn serve_and_close<R: BufRead, W: Write>(
    interpreter: &NotebookInterpreter,
    reader: R,
    writer: W,
) -> Result<(), Error> {
    let served = serve_lines(interpreter, reader, writer);
    let report = interpreter.close();
    served?;
    if let Some((_, err)) = report.failed.into_iter().next() {
        return Err(err);
    }
    Ok(())
}

fn serve_lines<R: BufRead, W: Write>(
    interpreter: &NotebookInterpreter,
    mut reader: R,
    mut writer: W,
) -> Result<(), Error> {
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to read request")
                .with_source(err)
        })?;
        if read == 0 {
            return writer.flush().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to flush output")
                    .with_source(err)
            });
        }

        let response = match std::str::from_utf8(&line) {
            Ok(text) => {
                let message = text.trim_end_matches(['\n', '\r']);
                if message.trim().is_empty() {
                    continue;
                }
                handle_line(interpreter, message)
            }
            Err(err) => {
                tracing::debug!(error = %err, "rejecting non-UTF-8 request");
                usage_error(format!("request is not valid UTF-8: {err}"))
            }
        };
        write_json_line(&mut writer, &response)?;
    }
}

fn handle_line(interpreter: &NotebookInterpreter, message: &str) -> Value {
    let request: Request = match serde_json::from_str(message) {
        Ok(request) => request,
        Err(err) => {
            tracing::debug!(error = %err, "rejecting malformed request");
            return usage_error(format!("invalid request: {err}"));
        }
    };

    let id = request.id.unwrap_or(Value::Null);
    match request.op {
        Op::Interpret => {
            let result = interpreter.interpret(&request.note, &request.text);
            json!({ "id": id, "result": result })
        }
        Op::Completion => {
            let cursor = request.cursor.unwrap_or(request.buffer.len());
            let candidates = interpreter.completion(&request.note, &request.buffer, cursor);
            json!({ "id": id, "candidates": candidates })
        }
        Op::Cancel => {
            interpreter.cancel(&request.note);
            json!({ "id": id, "ok": true })
        }
        Op::Progress => {
            json!({ "id": id, "progress": interpreter.progress(&request.note) })
        }
    }
}

fn usage_error(message: String) -> Value {
    json!({
        "id": Value::Null,
        "error": { "kind": "Usage", "message": message },
    })
}

fn write_json_line<W: Write>(writer: &mut W, payload: &Value) -> Result<(), Error> {
    serde_json::to_writer(&mut *writer, payload).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to encode response")
            .with_source(err)
    })?;
    writer.write_all(b"\n").map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to write response")
            .with_source(err)
    })?;
    writer.flush().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to flush response")
            .with_source(err)
    })
}
