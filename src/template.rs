// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metric, tag and field name templates.
//!
//! Templates are compiled once at pipeline build time and rendered once per
//! message against a [`Context`]. The syntax is literal text plus
//! placeholders:
//!
//! - `{{topic}}` - the full concrete topic
//! - `{{topic[2]}}` - a 0-based slash-delimited topic segment
//! - `{{name}}` - the value of the parsed field `name`
//!
//! Compilation failures abort startup; render failures are per-message and
//! leave the owning Export untouched.

use crate::parser::FieldSet;
use thiserror::Error;

/// Template compilation errors. Fatal at pipeline build time.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unclosed placeholder in template {0:?}")]
    Unclosed(String),

    #[error("empty placeholder in template {0:?}")]
    Empty(String),

    #[error("malformed index in placeholder {0:?}")]
    BadIndex(String),
}

/// Per-message render failures. The message is logged and dropped.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown template variable: {0}")]
    UnknownVariable(String),

    #[error("index {index} out of range for {name} ({len} segments)")]
    IndexOutOfRange {
        name: String,
        index: usize,
        len: usize,
    },

    #[error("variable {0} is not indexable")]
    NotIndexable(String),
}

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Placeholder { name: String, index: Option<usize> },
}

/// A compiled template. Rendering is side-effect-free given a context.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Compile a template source string.
    pub fn compile(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after_open = &rest[open + 2..];
            let close = after_open
                .find("}}")
                .ok_or_else(|| TemplateError::Unclosed(source.to_string()))?;

            let inner = after_open[..close].trim();
            if inner.is_empty() {
                return Err(TemplateError::Empty(source.to_string()));
            }
            segments.push(parse_placeholder(source, inner)?);

            rest = &after_open[close + 2..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// Get the source string this template was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render the template against a message context.
    pub fn render(&self, ctx: &Context<'_>) -> Result<String, RenderError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder { name, index } => {
                    out.push_str(&ctx.lookup(name, *index)?);
                }
            }
        }
        Ok(out)
    }
}

fn parse_placeholder(source: &str, inner: &str) -> Result<Segment, TemplateError> {
    if let Some(bracket) = inner.find('[') {
        if !inner.ends_with(']') {
            return Err(TemplateError::BadIndex(source.to_string()));
        }
        let name = inner[..bracket].trim();
        if name.is_empty() {
            return Err(TemplateError::Empty(source.to_string()));
        }
        let index = inner[bracket + 1..inner.len() - 1]
            .trim()
            .parse::<usize>()
            .map_err(|_| TemplateError::BadIndex(source.to_string()))?;
        Ok(Segment::Placeholder {
            name: name.to_string(),
            index: Some(index),
        })
    } else {
        Ok(Segment::Placeholder {
            name: inner.to_string(),
            index: None,
        })
    }
}

/// Per-message render context: the concrete topic and the parsed field set.
pub struct Context<'a> {
    topic: &'a str,
    segments: Vec<&'a str>,
    fields: &'a FieldSet,
}

impl<'a> Context<'a> {
    /// Build a context from the message topic and parsed values.
    pub fn new(topic: &'a str, fields: &'a FieldSet) -> Self {
        Self {
            topic,
            segments: topic.split('/').collect(),
            fields,
        }
    }

    fn lookup(&self, name: &str, index: Option<usize>) -> Result<String, RenderError> {
        if name == "topic" {
            return match index {
                None => Ok(self.topic.to_string()),
                Some(i) => self
                    .segments
                    .get(i)
                    .map(|s| s.to_string())
                    .ok_or_else(|| RenderError::IndexOutOfRange {
                        name: name.to_string(),
                        index: i,
                        len: self.segments.len(),
                    }),
            };
        }

        match self.fields.get(name) {
            Some(value) => match index {
                None => Ok(value.render()),
                Some(_) => Err(RenderError::NotIndexable(name.to_string())),
            },
            None => Err(RenderError::UnknownVariable(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::influx::FieldValue;

    fn fields(entries: &[(&str, FieldValue)]) -> FieldSet {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_literal_template() {
        let tpl = Template::compile("plain text").expect("compile");
        let values = FieldSet::new();
        let ctx = Context::new("a/b", &values);
        assert_eq!(tpl.render(&ctx).expect("render"), "plain text");
    }

    #[test]
    fn test_topic_segment_index() {
        let tpl = Template::compile("room-{{topic[1]}}").expect("compile");
        let values = FieldSet::new();
        let ctx = Context::new("sensors/kitchen/temp", &values);
        assert_eq!(tpl.render(&ctx).expect("render"), "room-kitchen");
    }

    #[test]
    fn test_full_topic_variable() {
        let tpl = Template::compile("{{topic}}").expect("compile");
        let values = FieldSet::new();
        let ctx = Context::new("sensors/kitchen/temp", &values);
        assert_eq!(tpl.render(&ctx).expect("render"), "sensors/kitchen/temp");
    }

    #[test]
    fn test_field_variable() {
        let tpl = Template::compile("{{unit}}").expect("compile");
        let values = fields(&[("unit", FieldValue::String("celsius".to_string()))]);
        let ctx = Context::new("t", &values);
        assert_eq!(tpl.render(&ctx).expect("render"), "celsius");
    }

    #[test]
    fn test_mixed_segments() {
        let tpl = Template::compile("{{topic[0]}}.{{kind}}.reading").expect("compile");
        let values = fields(&[("kind", FieldValue::String("temp".to_string()))]);
        let ctx = Context::new("house/north", &values);
        assert_eq!(tpl.render(&ctx).expect("render"), "house.temp.reading");
    }

    #[test]
    fn test_whitespace_inside_placeholder() {
        let tpl = Template::compile("{{ topic[1] }}").expect("compile");
        let values = FieldSet::new();
        let ctx = Context::new("a/b/c", &values);
        assert_eq!(tpl.render(&ctx).expect("render"), "b");
    }

    #[test]
    fn test_compile_unclosed_placeholder() {
        assert!(matches!(
            Template::compile("{{topic"),
            Err(TemplateError::Unclosed(_))
        ));
    }

    #[test]
    fn test_compile_empty_placeholder() {
        assert!(matches!(
            Template::compile("x{{}}y"),
            Err(TemplateError::Empty(_))
        ));
    }

    #[test]
    fn test_compile_bad_index() {
        assert!(matches!(
            Template::compile("{{topic[one]}}"),
            Err(TemplateError::BadIndex(_))
        ));
        assert!(matches!(
            Template::compile("{{topic[1}}"),
            Err(TemplateError::BadIndex(_))
        ));
    }

    #[test]
    fn test_render_unknown_variable() {
        let tpl = Template::compile("{{missing}}").expect("compile");
        let values = FieldSet::new();
        let ctx = Context::new("a", &values);
        assert!(matches!(
            tpl.render(&ctx),
            Err(RenderError::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_render_index_out_of_range() {
        let tpl = Template::compile("{{topic[5]}}").expect("compile");
        let values = FieldSet::new();
        let ctx = Context::new("a/b", &values);
        assert!(matches!(
            tpl.render(&ctx),
            Err(RenderError::IndexOutOfRange { index: 5, len: 2, .. })
        ));
    }

    #[test]
    fn test_render_field_not_indexable() {
        let tpl = Template::compile("{{unit[0]}}").expect("compile");
        let values = fields(&[("unit", FieldValue::String("c".to_string()))]);
        let ctx = Context::new("a", &values);
        assert!(matches!(tpl.render(&ctx), Err(RenderError::NotIndexable(_))));
    }
}
