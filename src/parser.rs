// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload parsers.
//!
//! A parser turns one raw MQTT payload into a set of named field values. The
//! registry is keyed by the kind keyword of a parser spec string:
//!
//! - `string`, `bool`, `int`, `float` - the payload text becomes the value of
//!   a single field (option 1 names the field, default `value`)
//! - `rhai:<path>` - a Rhai script that evaluates to a callable; the callable
//!   receives the payload and returns a map of field names to values
//!
//! Spec resolution failures are fatal at pipeline build time. Per-message
//! parse failures are recoverable: the caller logs and drops the message.

use crate::influx::FieldValue;
use rhai::{Dynamic, Engine, FnPtr, AST};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// Field name used when a parser spec does not name one.
pub const DEFAULT_FIELD: &str = "value";

/// Parsed payload: field name to typed value.
pub type FieldSet = BTreeMap<String, FieldValue>;

/// Errors resolving a parser spec string. Always fatal to pipeline build.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("parser not supported: {0}")]
    UnsupportedKind(String),

    #[error("parser {kind}: {message}")]
    Options { kind: String, message: String },

    #[error("script {path}: {message}")]
    Script { path: String, message: String },
}

/// Per-message parse failures. Recoverable: log and drop the message.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not valid UTF-8")]
    Utf8,

    #[error("invalid boolean payload: {0:?}")]
    Bool(String),

    #[error("invalid integer payload: {0:?}")]
    Int(String),

    #[error("invalid float payload: {0:?}")]
    Float(String),

    #[error("script call failed: {0}")]
    ScriptCall(String),

    #[error("script returned {0}, expected a map of field values")]
    ScriptReturn(&'static str),

    #[error("script returned unsupported type {ty} for field {field:?}")]
    ScriptValue { field: String, ty: &'static str },
}

/// A resolved parser, ready to apply to payloads.
///
/// All variants are stateless; the scripted variant owns its interpreter and
/// compiled script, which are reentrant and may be shared across the Exports
/// of one definition.
#[derive(Debug)]
pub enum Parser {
    Text { field: String },
    Bool { field: String },
    Int { field: String },
    Float { field: String },
    Script(ScriptParser),
}

impl Parser {
    /// Resolve a parser spec string of the form `<kind>` or
    /// `<kind>:<opt1>:<opt2>...`.
    pub fn from_spec(spec: &str) -> Result<Self, SpecError> {
        let (kind, options) = match spec.split_once(':') {
            Some((kind, rest)) => (kind, rest.split(':').collect::<Vec<_>>()),
            None => (spec, Vec::new()),
        };

        match kind {
            "string" => Ok(Parser::Text {
                field: field_option(kind, &options)?,
            }),
            "bool" => Ok(Parser::Bool {
                field: field_option(kind, &options)?,
            }),
            "int" => Ok(Parser::Int {
                field: field_option(kind, &options)?,
            }),
            "float" => Ok(Parser::Float {
                field: field_option(kind, &options)?,
            }),
            "rhai" => match options.as_slice() {
                [path] => Ok(Parser::Script(ScriptParser::load(path)?)),
                _ => Err(SpecError::Options {
                    kind: kind.to_string(),
                    message: "expected exactly one option: script path".to_string(),
                }),
            },
            other => Err(SpecError::UnsupportedKind(other.to_string())),
        }
    }

    /// Parse one payload into a field set.
    pub fn parse(&self, payload: &[u8]) -> Result<FieldSet, ParseError> {
        match self {
            Parser::Script(script) => script.call(text(payload)?),
            Parser::Text { field } => Ok(single(
                field,
                FieldValue::String(text(payload)?.to_string()),
            )),
            Parser::Bool { field } => {
                let value = parse_bool(text(payload)?.trim())?;
                Ok(single(field, FieldValue::Boolean(value)))
            }
            Parser::Int { field } => {
                let payload = text(payload)?.trim();
                let value = payload
                    .parse::<i64>()
                    .map_err(|_| ParseError::Int(payload.to_string()))?;
                Ok(single(field, FieldValue::Integer(value)))
            }
            Parser::Float { field } => {
                let payload = text(payload)?.trim();
                let value = payload
                    .parse::<f64>()
                    .map_err(|_| ParseError::Float(payload.to_string()))?;
                Ok(single(field, FieldValue::Float(value)))
            }
        }
    }
}

fn field_option(kind: &str, options: &[&str]) -> Result<String, SpecError> {
    match options {
        [] => Ok(DEFAULT_FIELD.to_string()),
        [field] if !field.is_empty() => Ok(field.to_string()),
        _ => Err(SpecError::Options {
            kind: kind.to_string(),
            message: "expected at most one option: field name".to_string(),
        }),
    }
}

fn text(payload: &[u8]) -> Result<&str, ParseError> {
    std::str::from_utf8(payload).map_err(|_| ParseError::Utf8)
}

fn single(field: &str, value: FieldValue) -> FieldSet {
    let mut values = FieldSet::new();
    values.insert(field.to_string(), value);
    values
}

fn parse_bool(payload: &str) -> Result<bool, ParseError> {
    match payload {
        "1" | "t" | "T" | "true" | "True" | "TRUE" => Ok(true),
        "0" | "f" | "F" | "false" | "False" | "FALSE" => Ok(false),
        other => Err(ParseError::Bool(other.to_string())),
    }
}

/// A parser backed by a user-supplied Rhai script.
///
/// The script file is evaluated once at load time and must yield exactly one
/// callable, which is invoked per payload with the payload text and must
/// return a map of field names to values.
#[derive(Debug)]
pub struct ScriptParser {
    engine: Engine,
    ast: AST,
    callable: FnPtr,
}

impl ScriptParser {
    /// Load and compile a script file, then evaluate it to obtain the callable.
    pub fn load(path: &str) -> Result<Self, SpecError> {
        let script_error = |message: String| SpecError::Script {
            path: path.to_string(),
            message,
        };

        let mut engine = Engine::new();
        engine.set_max_operations(100_000);
        engine.on_print(|line| tracing::info!(target: "mqtt_export::script", "{}", line));

        let ast = engine
            .compile_file(PathBuf::from(path))
            .map_err(|e| script_error(e.to_string()))?;

        let result: Dynamic = engine
            .eval_ast(&ast)
            .map_err(|e| script_error(e.to_string()))?;

        let type_name = result.type_name();
        let callable = result
            .try_cast::<FnPtr>()
            .ok_or_else(|| script_error(format!("evaluated to {}, expected a function", type_name)))?;

        Ok(Self {
            engine,
            ast,
            callable,
        })
    }

    /// Call the loaded function with one payload.
    pub fn call(&self, payload: &str) -> Result<FieldSet, ParseError> {
        let result: Dynamic = self
            .callable
            .call(&self.engine, &self.ast, (payload.to_string(),))
            .map_err(|e| ParseError::ScriptCall(e.to_string()))?;

        let type_name = result.type_name();
        let map = result
            .try_cast::<rhai::Map>()
            .ok_or(ParseError::ScriptReturn(type_name))?;

        let mut values = FieldSet::new();
        for (key, value) in map {
            let field = key.to_string();
            values.insert(field.clone(), dynamic_to_value(&field, value)?);
        }
        Ok(values)
    }
}

fn dynamic_to_value(field: &str, value: Dynamic) -> Result<FieldValue, ParseError> {
    let type_name = value.type_name();
    if let Ok(v) = value.as_int() {
        Ok(FieldValue::Integer(v))
    } else if let Ok(v) = value.as_float() {
        Ok(FieldValue::Float(v))
    } else if let Ok(v) = value.as_bool() {
        Ok(FieldValue::Boolean(v))
    } else if let Ok(v) = value.into_string() {
        Ok(FieldValue::String(v))
    } else {
        Err(ParseError::ScriptValue {
            field: field.to_string(),
            ty: type_name,
        })
    }
}
