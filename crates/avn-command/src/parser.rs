// SPDX-License-Identifier: MIT OR Apache-2.0
//! Statement parsing and the handler chain.
//!
//! A statement is one line of intent: `save storyverse hero {"name":
//! "Aria"}`. The parser lowercases the first token into the action,
//! extracts at most one strict JSON payload starting at the first
//! unquoted `{` or `[`, and tokenizes the rest honoring single and
//! double quotes with backslash escapes.
//!
//! Registered handlers then run over the mutable parse context: the
//! global bucket first, then the action's bucket in descending
//! priority. A handler may rewrite the action; the new action's
//! handlers run next, each action visited at most once.

use avn_core::{EngineError, EventBus};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Mutable context handed to parse handlers.
#[derive(Debug)]
pub struct ParseContext {
    /// Current action; handlers may rewrite it.
    pub action: String,
    /// Positional tokens not yet consumed into parameters.
    pub tokens: Vec<String>,
    /// The extracted JSON payload, if any.
    pub payload: Option<Value>,
    /// Named parameters accumulated by handlers.
    pub parameters: BTreeMap<String, Value>,
    /// Free-form handler metadata.
    pub metadata: BTreeMap<String, Value>,
    stopped: bool,
}

impl ParseContext {
    /// Rewrite the action; its handlers run next if not yet visited.
    pub fn rewrite_action(&mut self, action: impl Into<String>) {
        self.action = action.into().to_ascii_lowercase();
    }

    /// Stop the remaining handlers of the current pass.
    pub fn stop_propagation(&mut self) {
        self.stopped = true;
    }
}

/// The parsed form of a statement.
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    /// Final action after handler rewrites.
    pub action: String,
    /// Remaining positional tokens.
    pub tokens: Vec<String>,
    /// Extracted JSON payload.
    pub payload: Option<Value>,
    /// Named parameters.
    pub parameters: BTreeMap<String, Value>,
    /// Handler metadata.
    pub metadata: BTreeMap<String, Value>,
}

type ParseHandler = Box<dyn Fn(&mut ParseContext) + Send + Sync>;

struct Registered {
    priority: i32,
    handler: ParseHandler,
}

/// Statement parser with a rewriting handler chain.
pub struct CommandParser {
    global: Vec<Registered>,
    per_action: BTreeMap<String, Vec<Registered>>,
    bus: Arc<EventBus>,
}

impl CommandParser {
    /// Build a parser publishing `command.parser.parsed` on `bus`.
    ///
    /// The key/value extraction pass (`key=value`, `--flag`,
    /// `--key=value`) is pre-registered as a global handler.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        let mut parser = Self {
            global: Vec::new(),
            per_action: BTreeMap::new(),
            bus,
        };
        parser.register_global(100, extract_key_values);
        parser
    }

    /// Register a handler for every action. Higher priority runs first.
    pub fn register_global<F>(&mut self, priority: i32, handler: F)
    where
        F: Fn(&mut ParseContext) + Send + Sync + 'static,
    {
        insert_by_priority(
            &mut self.global,
            Registered {
                priority,
                handler: Box::new(handler),
            },
        );
    }

    /// Register a handler for one action. Higher priority runs first.
    pub fn register<F>(&mut self, action: &str, priority: i32, handler: F)
    where
        F: Fn(&mut ParseContext) + Send + Sync + 'static,
    {
        insert_by_priority(
            self.per_action
                .entry(action.to_ascii_lowercase())
                .or_default(),
            Registered {
                priority,
                handler: Box::new(handler),
            },
        );
    }

    /// Parse one statement.
    ///
    /// # Errors
    ///
    /// `invalid_argument` for an empty statement, an unterminated quote,
    /// or a malformed JSON payload.
    pub fn parse(&self, statement: &str) -> Result<ParsedCommand, EngineError> {
        let statement = statement.trim();
        if statement.is_empty() {
            return Err(EngineError::invalid_argument("empty command"));
        }

        let (action_raw, rest) = match statement.split_once(char::is_whitespace) {
            Some((action, rest)) => (action, rest.trim()),
            None => (statement, ""),
        };
        let action = action_raw.to_ascii_lowercase();

        let (remainder, payload) = extract_payload(rest)?;
        let tokens = tokenize(&remainder)?;

        let mut ctx = ParseContext {
            action,
            tokens,
            payload,
            parameters: BTreeMap::new(),
            metadata: BTreeMap::new(),
            stopped: false,
        };
        self.run_handlers(&mut ctx);

        self.bus.emit(
            "command.parser.parsed",
            &json!({
                "action": ctx.action,
                "tokens": ctx.tokens.len(),
                "has_payload": ctx.payload.is_some(),
            }),
        );

        Ok(ParsedCommand {
            action: ctx.action,
            tokens: ctx.tokens,
            payload: ctx.payload,
            parameters: ctx.parameters,
            metadata: ctx.metadata,
        })
    }

    fn run_handlers(&self, ctx: &mut ParseContext) {
        // Global bucket first.
        for registered in &self.global {
            if ctx.stopped {
                break;
            }
            (registered.handler)(ctx);
        }
        ctx.stopped = false;

        // Action buckets; rewrites queue the new action's bucket, each
        // action visited at most once.
        let mut visited = BTreeSet::new();
        loop {
            let action = ctx.action.clone();
            if !visited.insert(action.clone()) {
                break;
            }
            let Some(bucket) = self.per_action.get(&action) else {
                break;
            };
            for registered in bucket {
                if ctx.stopped {
                    break;
                }
                (registered.handler)(ctx);
                if ctx.action != action {
                    break;
                }
            }
            ctx.stopped = false;
            if ctx.action == action {
                break;
            }
        }
    }
}

fn insert_by_priority(bucket: &mut Vec<Registered>, entry: Registered) {
    let position = bucket
        .iter()
        .position(|r| r.priority < entry.priority)
        .unwrap_or(bucket.len());
    bucket.insert(position, entry);
}

/// Built-in global pass: lift `key=value`, `--flag`, and `--key=value`
/// tokens into parameters. Values that parse as JSON scalars keep their
/// type; everything else stays a string.
fn extract_key_values(ctx: &mut ParseContext) {
    let mut remaining = Vec::new();
    for token in ctx.tokens.drain(..) {
        if let Some(flag) = token.strip_prefix("--") {
            match flag.split_once('=') {
                Some((key, value)) => {
                    ctx.parameters
                        .insert(key.to_ascii_lowercase(), parse_scalar(value));
                }
                None => {
                    ctx.parameters
                        .insert(flag.to_ascii_lowercase(), Value::Bool(true));
                }
            }
            continue;
        }
        match token.split_once('=') {
            Some((key, value)) if !key.is_empty() && is_bare_key(key) => {
                ctx.parameters
                    .insert(key.to_ascii_lowercase(), parse_scalar(value));
            }
            _ => remaining.push(token),
        }
    }
    ctx.tokens = remaining;
}

fn is_bare_key(key: &str) -> bool {
    key.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

fn parse_scalar(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => {
            if let Ok(n) = raw.parse::<i64>() {
                return Value::from(n);
            }
            if let Ok(f) = raw.parse::<f64>() {
                if raw.contains('.') {
                    return json!(f);
                }
            }
            Value::String(raw.to_string())
        }
    }
}

/// Find the first unquoted `{` or `[`, strictly parse one JSON value
/// from there, and return the statement with that span removed.
fn extract_payload(input: &str) -> Result<(String, Option<Value>), EngineError> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (index, ch) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (None, '\'' | '"') => quote = Some(ch),
            (None, '{' | '[') => {
                let mut stream =
                    serde_json::Deserializer::from_str(&input[index..]).into_iter::<Value>();
                let value = match stream.next() {
                    Some(Ok(value)) => value,
                    Some(Err(err)) => {
                        return Err(EngineError::invalid_argument(format!(
                            "malformed JSON payload: {err}"
                        )));
                    }
                    None => {
                        return Err(EngineError::invalid_argument("malformed JSON payload"));
                    }
                };
                let end = index + stream.byte_offset();
                let mut remainder = String::from(&input[..index]);
                remainder.push(' ');
                remainder.push_str(&input[end..]);
                return Ok((remainder, Some(value)));
            }
            _ => {}
        }
    }
    Ok((input.to_string(), None))
}

/// Whitespace tokenizer honoring `'…'` / `"…"` quotes with backslash
/// escapes.
fn tokenize(input: &str) -> Result<Vec<String>, EngineError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in input.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match (quote, ch) {
            (Some(_), '\\') => escaped = true,
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(ch);
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, '\\') => {
                escaped = true;
                in_token = true;
            }
            (None, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if quote.is_some() {
        return Err(EngineError::invalid_argument("unterminated quote"));
    }
    if escaped {
        return Err(EngineError::invalid_argument("dangling escape"));
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
