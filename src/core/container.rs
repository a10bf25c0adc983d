// One engine plus its input/output channels behind a single interpret call.
use std::any::Any;
use std::error::Error as StdError;
use std::panic::{self, AssertUnwindSafe};

use crate::core::channel::TextChannel;
use crate::core::engine::Engine;
use crate::core::error::Error;
use crate::core::result::InterpretResult;
use crate::core::translate::translate;
use crate::core::value::Namespace;

pub struct SessionContainer {
    key: String,
    engine: Option<Box<dyn Engine>>,
    input: TextChannel,
    output: TextChannel,
}

impl SessionContainer {
    pub fn new(key: impl Into<String>, engine: Box<dyn Engine>) -> Self {
        let key = key.into();
        tracing::info!(session = %key, "session opened");
        Self {
            key,
            engine: Some(engine),
            input: TextChannel::new(),
            output: TextChannel::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_closed(&self) -> bool {
        self.engine.is_none()
    }

    /// Feeds `text`, runs the engine, drains its output and translates the
    /// outcome. Engine errors and panics become Error-status results.
    pub fn interpret(&mut self, text: &str) -> InterpretResult {
        let Some(engine) = self.engine.as_mut() else {
            return InterpretResult::error(format!("session {} is closed", self.key));
        };
        tracing::debug!(session = %self.key, bytes = text.len(), "interpret");

        self.input.feed(text);
        let input = &mut self.input;
        let output = &mut self.output;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| engine.run(input, output)));

        // Input a failed run left behind must not reach the next call.
        self.input.clear();
        let captured = self.output.drain();

        match outcome {
            Ok(Ok(())) => translate(engine.return_value(), captured),
            Ok(Err(err)) => {
                tracing::warn!(session = %self.key, error = %err, "engine execution failed");
                InterpretResult::error(diagnostic(&err))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(session = %self.key, panic = %message, "engine panicked");
                InterpretResult::error(format!("internal error: engine panicked: {message}"))
            }
        }
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.engine.as_ref().map(|engine| engine.namespace())
    }

    /// Replaces the engine namespace; returns false when the session is closed.
    pub fn install_namespace(&mut self, namespace: Namespace) -> bool {
        match self.engine.as_mut() {
            Some(engine) => {
                engine.set_namespace(namespace);
                true
            }
            None => false,
        }
    }

    pub fn close(&mut self) {
        if self.engine.take().is_some() {
            self.input.clear();
            self.output.clear();
            tracing::info!(session = %self.key, "session closed");
        }
    }
}

fn diagnostic(err: &Error) -> String {
    let mut text = format!("error: {}", err.message().unwrap_or("engine execution failed"));
    if let Some(hint) = err.hint() {
        text.push_str(&format!("\nhint: {hint}"));
    }
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(&format!("\ncaused by: {cause}"));
        source = cause.source();
    }
    text
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic payload".to_string()
}
