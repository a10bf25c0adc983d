//! Purpose: Bundled line-oriented command engine used by the `notebridge` binary.
//! Exports: `ScriptEngine`, `script_engine_factory`.
//! Role: Concrete `Engine` so sessions are usable without an external engine.
//! Invariants: One command per line; the first failing line stops the run.
//! Invariants: Lines executed before a failure keep their effects.
//! Invariants: Each run starts with a `None` return value.

use std::fmt::Write as _;
use std::sync::Arc;

use crate::core::channel::TextChannel;
use crate::core::engine::{Engine, EngineFactory};
use crate::core::error::{Error, ErrorKind};
use crate::core::value::{Namespace, Value};

#[derive(Debug, Default)]
pub struct ScriptEngine {
    namespace: Namespace,
    last: Value,
}

impl ScriptEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn execute(&mut self, line: &str, output: &mut TextChannel) -> Result<Value, Error> {
        if let Some((target, expr)) = line.split_once('=') {
            let target = target.trim();
            if is_identifier(target) {
                let value = self.eval(expr.trim())?;
                self.namespace.insert(target, value.clone());
                return Ok(value);
            }
        }

        let (command, rest) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };
        match command {
            "print" => {
                let mut words = Vec::new();
                for token in tokenize(rest)? {
                    words.push(self.expand(&token)?);
                }
                emit(output, &words.join(" "))?;
                Ok(Value::None)
            }
            "show" => {
                let value = self.lookup(single_name(command, rest)?)?.clone();
                emit(output, &value.to_string())?;
                Ok(value)
            }
            "vars" => {
                let names: Vec<String> = self.namespace.names().map(str::to_string).collect();
                for name in &names {
                    emit(output, name)?;
                }
                Ok(Value::list(names))
            }
            "table" => self.table(rest),
            "del" => {
                let name = single_name(command, rest)?;
                self.namespace
                    .remove(name)
                    .ok_or_else(|| undefined(name))
            }
            "fail" => Err(Error::new(ErrorKind::Engine).with_message(if rest.is_empty() {
                "fail".to_string()
            } else {
                rest.to_string()
            })),
            _ => Err(Error::new(ErrorKind::Engine)
                .with_message(format!("unknown command: {command}"))
                .with_hint("Commands: NAME = EXPR, print, show, vars, table, del, fail.")),
        }
    }

    fn table(&self, rest: &str) -> Result<Value, Error> {
        let names: Vec<&str> = rest.split_whitespace().collect();
        if names.is_empty() {
            return Err(Error::new(ErrorKind::Engine)
                .with_message("table needs at least one list variable"));
        }
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let value = self.lookup(name)?;
            if value.as_list().is_none() {
                return Err(Error::new(ErrorKind::Engine)
                    .with_message(format!("{name} is not a list")));
            }
            let column: Namespace = [("name", Value::scalar(name)), ("data", value.clone())]
                .into_iter()
                .collect();
            columns.push(Value::Namespace(column));
        }
        Ok(Value::List(columns))
    }

    fn eval(&self, expr: &str) -> Result<Value, Error> {
        if expr == "none" {
            return Ok(Value::None);
        }
        if let Some(inner) = expr.strip_prefix('[') {
            let inner = inner.strip_suffix(']').ok_or_else(|| {
                Error::new(ErrorKind::Engine).with_message(format!("unterminated list: {expr}"))
            })?;
            let mut items = Vec::new();
            for item in split_items(inner)? {
                items.push(self.eval_item(&item)?);
            }
            return Ok(Value::List(items));
        }
        self.eval_item(expr)
    }

    fn eval_item(&self, item: &str) -> Result<Value, Error> {
        if let Some(name) = item.strip_prefix('$') {
            return self.lookup(name).cloned();
        }
        if item.starts_with('"') {
            return unquote(item).map(Value::Scalar);
        }
        Ok(Value::scalar(item))
    }

    fn expand(&self, token: &Token) -> Result<String, Error> {
        match token {
            Token::Quoted(text) => Ok(text.clone()),
            Token::Bare(text) => match text.strip_prefix('$') {
                Some(name) => self.lookup(name).map(ToString::to_string),
                None => Ok(text.clone()),
            },
        }
    }

    fn lookup(&self, name: &str) -> Result<&Value, Error> {
        self.namespace.get(name).ok_or_else(|| undefined(name))
    }
}

impl Engine for ScriptEngine {
    fn run(&mut self, input: &mut TextChannel, output: &mut TextChannel) -> Result<(), Error> {
        self.last = Value::None;
        let mut line_no = 0usize;
        while let Some(line) = input.read_line() {
            line_no += 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match self.execute(line, output) {
                Ok(value) => self.last = value,
                Err(err) => {
                    let message = err.message().unwrap_or("command failed").to_string();
                    return Err(err.with_message(format!("line {line_no}: {message}")));
                }
            }
        }
        Ok(())
    }

    fn return_value(&self) -> &Value {
        &self.last
    }

    fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    fn set_namespace(&mut self, namespace: Namespace) {
        self.namespace = namespace;
    }
}

pub fn script_engine_factory() -> Arc<dyn EngineFactory> {
    Arc::new(|| Box::new(ScriptEngine::new()) as Box<dyn Engine>)
}

#[derive(Debug, Eq, PartialEq)]
enum Token {
    Bare(String),
    Quoted(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }
        if ch == '"' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some(ch) = chars.next() {
                match ch {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some(other) => text.push(other),
                        None => break,
                    },
                    other => text.push(other),
                }
            }
            if !closed {
                return Err(unterminated_string());
            }
            tokens.push(Token::Quoted(text));
        } else {
            let mut text = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_whitespace() {
                    break;
                }
                text.push(ch);
                chars.next();
            }
            tokens.push(Token::Bare(text));
        }
    }
    Ok(tokens)
}

/// Splits list items on commas outside quotes.
fn split_items(inner: &str) -> Result<Vec<String>, Error> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    for ch in inner.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => {
                current.push(ch);
                escaped = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => items.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    if in_quotes {
        return Err(unterminated_string());
    }
    items.push(current);

    let items: Vec<String> = items.into_iter().map(|item| item.trim().to_string()).collect();
    if items.len() == 1 && items[0].is_empty() {
        return Ok(Vec::new());
    }
    if items.iter().any(String::is_empty) {
        return Err(Error::new(ErrorKind::Engine).with_message("empty list item"));
    }
    Ok(items)
}

fn unquote(item: &str) -> Result<String, Error> {
    let mut tokens = tokenize(item)?;
    match (tokens.pop(), tokens.is_empty()) {
        (Some(Token::Quoted(text)), true) => Ok(text),
        _ => Err(Error::new(ErrorKind::Engine).with_message(format!("malformed string: {item}"))),
    }
}

fn single_name<'a>(command: &str, rest: &'a str) -> Result<&'a str, Error> {
    if is_identifier(rest) {
        Ok(rest)
    } else {
        Err(Error::new(ErrorKind::Engine).with_message(format!("usage: {command} NAME")))
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

fn emit(output: &mut TextChannel, text: &str) -> Result<(), Error> {
    writeln!(output, "{text}").map_err(|_| {
        Error::new(ErrorKind::Internal).with_message("failed to write engine output")
    })
}

fn undefined(name: &str) -> Error {
    Error::new(ErrorKind::Engine).with_message(format!("undefined variable: {name}"))
}

fn unterminated_string() -> Error {
    Error::new(ErrorKind::Engine).with_message("unterminated string")
}
