//! Purpose: Provide the HTTP/JSON server for notebridge.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum-based loopback server exposing interpret, cancel, and completion per note.
//! Invariants: Interpret responses are always 200 with the result envelope; engine errors live in it.
//! Invariants: Loopback-only unless explicitly allowed.
//! Invariants: Shutdown closes the interpreter, saving every session before exit.

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;

use notebridge::api::{Error, ErrorKind, NotebookInterpreter};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub allow_non_loopback: bool,
}

#[derive(Clone)]
struct AppState {
    interpreter: Arc<NotebookInterpreter>,
}

pub async fn serve(config: ServeConfig, interpreter: Arc<NotebookInterpreter>) -> Result<(), Error> {
    validate_config(&config)?;

    let state = Arc::new(AppState {
        interpreter: Arc::clone(&interpreter),
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    tracing::info!(bind = %config.bind, "notebridge server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    let served: Result<(), Error> = tokio::select! {
        result = &mut server => result.map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("server failed")
                .with_source(err)
        }),
        _ = shutdown_signal() => {
            tracing::info!("shutdown requested");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                }),
                Err(_) => {
                    tracing::warn!("server shutdown timed out; closing sessions anyway");
                    Ok(())
                }
            }
        }
    };
    if let Err(err) = &served {
        tracing::error!(error = %err, "server stopped; saving sessions before exit");
    }

    close_interpreter(interpreter).await?;
    served
}

/// Closes every session, returning the first save failure.
async fn close_interpreter(interpreter: Arc<NotebookInterpreter>) -> Result<(), Error> {
    let report = tokio::task::spawn_blocking(move || interpreter.close())
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("session shutdown task failed")
                .with_source(err)
        })?;
    match report.failed.into_iter().next() {
        Some((_, err)) => Err(err),
        None => Ok(()),
    }
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v0/notes", get(list_notes))
        .route("/v0/notes/:note/interpret", post(interpret))
        .route("/v0/notes/:note/cancel", post(cancel))
        .route("/v0/notes/:note/completion", get(completion))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "could not install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct InterpretRequest {
    text: String,
}

#[derive(Debug, Deserialize)]
struct CompletionQuery {
    #[serde(default)]
    buffer: String,
    cursor: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<String>,
}

async fn healthz() -> Response {
    json_response(json!({ "ok": true }))
}

async fn list_notes(State(state): State<Arc<AppState>>) -> Response {
    let interpreter = Arc::clone(&state.interpreter);
    let listed = tokio::task::spawn_blocking(move || {
        let live = interpreter.registry().session_keys();
        let saved = interpreter.registry().store().list()?;
        Ok::<_, Error>((live, saved))
    })
    .await;
    match flatten_join(listed) {
        Ok((live, saved)) => {
            let saved: Vec<String> = saved.into_iter().map(|info| info.key).collect();
            json_response(json!({ "live": live, "saved": saved }))
        }
        Err(err) => error_response(err),
    }
}

async fn interpret(
    State(state): State<Arc<AppState>>,
    AxumPath(note): AxumPath<String>,
    Json(payload): Json<InterpretRequest>,
) -> Response {
    let interpreter = Arc::clone(&state.interpreter);
    let key = note.clone();
    let result = tokio::task::spawn_blocking(move || {
        Ok::<_, Error>(interpreter.interpret(&key, &payload.text))
    })
    .await;
    match flatten_join(result) {
        Ok(result) => json_response(json!({ "note": note, "result": result })),
        Err(err) => error_response(err),
    }
}

async fn cancel(
    State(state): State<Arc<AppState>>,
    AxumPath(note): AxumPath<String>,
) -> Response {
    state.interpreter.cancel(&note);
    json_response(json!({ "ok": true }))
}

async fn completion(
    State(state): State<Arc<AppState>>,
    AxumPath(note): AxumPath<String>,
    Query(query): Query<CompletionQuery>,
) -> Response {
    let interpreter = Arc::clone(&state.interpreter);
    let candidates = tokio::task::spawn_blocking(move || {
        let cursor = query.cursor.unwrap_or(query.buffer.len());
        Ok::<_, Error>(interpreter.completion(&note, &query.buffer, cursor))
    })
    .await;
    match flatten_join(candidates) {
        Ok(candidates) => json_response(json!({ "candidates": candidates })),
        Err(err) => error_response(err),
    }
}

fn flatten_join<T>(
    joined: Result<Result<T, Error>, tokio::task::JoinError>,
) -> Result<T, Error> {
    joined.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("request task failed")
            .with_source(err)
    })?
}

fn json_response(payload: serde_json::Value) -> Response {
    let mut response = Json(payload).into_response();
    response
        .headers_mut()
        .insert("notebridge-version", HeaderValue::from_static("0"));
    response
}

fn error_response(err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Engine => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Corrupt
        | ErrorKind::InvalidStateDir
        | ErrorKind::Io
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            path: err.path().map(|path| path.to_string_lossy().to_string()),
            key: err.key().map(str::to_string),
        },
    };
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert("notebridge-version", HeaderValue::from_static("0"));
    response
}
