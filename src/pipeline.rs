// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipeline builder: export definitions to runnable Exports.
//!
//! Resolves parsers, compiles templates and expands topic patterns. Any
//! failure here is fatal: a partially built pipeline would silently
//! under-report, so nothing subscribes until every definition resolved.

use crate::config::Config;
use crate::export::{Export, Point, TemplateSet};
use crate::parser::{self, Parser};
use crate::pattern::expand;
use crate::template::{Template, TemplateError};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Fatal pipeline construction errors.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("export {name}: {source}")]
    Parser {
        name: String,
        source: parser::SpecError,
    },

    #[error("export {name}: invalid {what} template: {source}")]
    Template {
        name: String,
        what: String,
        source: TemplateError,
    },
}

/// Build one Export per concrete topic of every definition.
///
/// Exports of one definition share the resolved parser and compiled template
/// set; each owns independent runtime state. Returns the first fatal error
/// encountered.
pub fn build_exports(
    config: &Config,
    output: tokio::sync::mpsc::Sender<Point>,
) -> Result<Vec<Export>, BuildError> {
    let mut exports = Vec::new();

    for (name, definition) in &config.exports {
        let parser = Arc::new(Parser::from_spec(&definition.parser).map_err(|source| {
            BuildError::Parser {
                name: name.clone(),
                source,
            }
        })?);

        let metric = compile(name, "metric", &definition.metric)?;
        let field = compile(name, "field", &definition.field)?;
        let mut tags = BTreeMap::new();
        for (tag, source) in &definition.tags {
            tags.insert(
                tag.clone(),
                compile(name, &format!("tag {:?}", tag), source)?,
            );
        }

        let templates = Arc::new(TemplateSet {
            metric,
            tags,
            field,
        });

        for topic in expand(&definition.topic) {
            exports.push(Export::new(
                name.clone(),
                topic,
                parser.clone(),
                templates.clone(),
                definition.interval(),
                output.clone(),
            ));
        }
    }

    Ok(exports)
}

fn compile(name: &str, what: &str, source: &str) -> Result<Template, BuildError> {
    Template::compile(source).map_err(|source| BuildError::Template {
        name: name.to_string(),
        what: what.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn config(yaml: &str) -> Config {
        Config::from_yaml(yaml).expect("config")
    }

    const BASE: &str = r#"
mqtt:
  address: "localhost:1883"
influxdb:
  address: "localhost:8086"
  database: "db"
"#;

    #[test]
    fn test_pattern_expands_into_multiple_exports() {
        let yaml = format!(
            "{}{}",
            BASE,
            r#"
exports:
  temps:
    topic: "sensors/{a,b}"
    parser: "float"
"#
        );
        let (tx, _rx) = mpsc::channel(1);
        let exports = build_exports(&config(&yaml), tx).expect("build");

        let topics: Vec<_> = exports.iter().map(|e| e.topic().to_string()).collect();
        assert_eq!(topics, vec!["sensors/a", "sensors/b"]);
        assert!(exports.iter().all(|e| e.name() == "temps"));
    }

    #[test]
    fn test_plain_topic_yields_one_export() {
        let yaml = format!(
            "{}{}",
            BASE,
            r#"
exports:
  e:
    topic: "plain/topic"
"#
        );
        let (tx, _rx) = mpsc::channel(1);
        let exports = build_exports(&config(&yaml), tx).expect("build");
        assert_eq!(exports.len(), 1);
        assert_eq!(exports[0].topic(), "plain/topic");
    }

    #[test]
    fn test_unsupported_parser_aborts_build() {
        let yaml = format!(
            "{}{}",
            BASE,
            r#"
exports:
  bad:
    topic: "t"
    parser: "xml"
"#
        );
        let (tx, _rx) = mpsc::channel(1);
        let err = build_exports(&config(&yaml), tx).expect_err("must fail");
        assert!(matches!(err, BuildError::Parser { name, .. } if name == "bad"));
    }

    #[test]
    fn test_bad_template_aborts_build() {
        let yaml = format!(
            "{}{}",
            BASE,
            r#"
exports:
  bad:
    topic: "t"
    metric: "{{topic"
"#
        );
        let (tx, _rx) = mpsc::channel(1);
        let err = build_exports(&config(&yaml), tx).expect_err("must fail");
        assert!(matches!(err, BuildError::Template { what, .. } if what == "metric"));
    }

    #[test]
    fn test_bad_tag_template_aborts_build() {
        let yaml = format!(
            "{}{}",
            BASE,
            r#"
exports:
  bad:
    topic: "t"
    tags:
      side: "{{topic[x]}}"
"#
        );
        let (tx, _rx) = mpsc::channel(1);
        let err = build_exports(&config(&yaml), tx).expect_err("must fail");
        assert!(matches!(err, BuildError::Template { .. }));
    }
}
