// src/template.rs
//! Token substitution for remote HTTP correctors.
//!
//! A template is plain text with `${...}` tokens. On the request side tokens
//! are positional (`${0}`, `${%1}`); on the response side they are named
//! (`${body}`, `${h.Content-Type}`, `${j.score}`). A leading `%` encodes the
//! value on the request side and decodes it on the response side. Tokens that
//! do not resolve render as the empty string.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::errors::Result;

static TOKEN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(.+?)\}").expect("token pattern is valid"));

/// Characters escaped by form encoding. Space is handled separately.
const FORM_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'*')
    .remove(b'_')
    .remove(b' ');

/// Returns true if `text` contains at least one substitution token.
pub fn contains_token(text: &str) -> bool {
    TOKEN_PATTERN.is_match(text)
}

/// Form-style percent encoding: unreserved characters pass, space becomes `+`.
pub fn form_encode(value: &str) -> String {
    utf8_percent_encode(value, FORM_ENCODE_SET)
        .to_string()
        .replace(' ', "+")
}

/// Inverse of [`form_encode`]. Invalid escapes are kept as they are.
pub fn form_decode(value: &str) -> String {
    percent_decode_str(&value.replace('+', " "))
        .decode_utf8_lossy()
        .into_owned()
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Token { key: String, percent: bool },
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(text: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in TOKEN_PATTERN.captures_iter(text) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Literal(text[last..whole.start()].to_string()));
            }
            let expression = inner.as_str().trim();
            let (key, percent) = match expression.strip_prefix('%') {
                Some(rest) => (rest.trim().to_string(), true),
                None => (expression.to_string(), false),
            };
            segments.push(Segment::Token { key, percent });
            last = whole.end();
        }
        if last < text.len() {
            segments.push(Segment::Literal(text[last..].to_string()));
        }
        Self { source: text.to_string(), segments }
    }

    /// Returns true if rendering can change the text.
    pub fn has_tokens(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Token { .. }))
    }

    /// The unparsed template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Renders request-side tokens against positional arguments.
    pub fn render_request(&self, args: &[String]) -> String {
        self.render(|key, percent| {
            let value = key
                .parse::<usize>()
                .ok()
                .and_then(|index| args.get(index))
                .map(String::as_str)
                .unwrap_or("");
            if percent { form_encode(value) } else { value.to_string() }
        })
    }

    /// Renders response-side tokens against values taken from a response.
    pub fn render_response(&self, tokens: &ResponseTokens) -> String {
        self.render(|key, percent| {
            let value = tokens.get(key).unwrap_or("");
            if percent { form_decode(value) } else { value.to_string() }
        })
    }

    fn render(&self, resolve: impl Fn(&str, bool) -> String) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Token { key, percent } => out.push_str(&resolve(key, *percent)),
            }
        }
        out
    }
}

/// Values a response exposes to response-side tokens.
#[derive(Debug, Clone, Default)]
pub struct ResponseTokens {
    values: HashMap<String, String>,
}

impl ResponseTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value. Repeated headers are joined with commas. Header
    /// names are case-insensitive.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.values
            .entry(format!("h.{}", name.to_ascii_lowercase()))
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    pub fn set_body(&mut self, body: impl Into<String>) {
        self.values.insert("body".to_string(), body.into());
    }

    pub fn body(&self) -> &str {
        self.get("body").unwrap_or("")
    }

    /// Exposes the JSON document in `body` as `j.*` tokens. Object properties
    /// become `j.<name>`, array elements `j.<index>`, a bare scalar `j.0`.
    pub fn add_json(&mut self, body: &str) -> Result<()> {
        let json: Value = serde_json::from_str(body)?;
        match json {
            Value::Object(map) => {
                for (name, value) in map {
                    let text = match value {
                        Value::String(text) => text,
                        Value::Number(_) | Value::Bool(_) => value.to_string(),
                        other => serde_json::to_string(&other)?,
                    };
                    self.values.insert(format!("j.{}", name), text);
                }
            }
            Value::Array(items) => {
                for (index, item) in items.iter().enumerate() {
                    self.values.insert(format!("j.{}", index), serde_json::to_string(item)?);
                }
            }
            scalar => {
                self.values.insert("j.0".to_string(), serde_json::to_string(&scalar)?);
            }
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        match key.strip_prefix("h.") {
            Some(name) => self.values.get(&format!("h.{}", name.to_ascii_lowercase())),
            None => self.values.get(key),
        }
        .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Vec<String> {
        ["user 1", "tarea.zip", "4", "false", "extra&x"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_request_tokens() {
        let template = Template::parse("http://c/${0}/${%1}?n=${2}&i=${ 3 }&e=${%4}");
        assert!(template.has_tokens());
        assert_eq!(
            template.render_request(&args()),
            "http://c/user 1/tarea.zip?n=4&i=false&e=extra%26x"
        );
    }

    #[test]
    fn test_request_unknown_tokens_are_empty() {
        let template = Template::parse("[${9}][${name}][${%-1}]");
        assert_eq!(template.render_request(&args()), "[][][]");
    }

    #[test]
    fn test_literal_template_is_verbatim() {
        let text = "plain $ {not a token} text";
        let template = Template::parse(text);
        assert!(!template.has_tokens());
        assert!(!contains_token(text));
        assert_eq!(template.render_request(&args()), text);
        assert_eq!(template.render_response(&ResponseTokens::new()), text);
    }

    #[test]
    fn test_form_encoding() {
        assert_eq!(form_encode("a b+c/d.e-f*g_h~"), "a+b%2Bc%2Fd.e-f*g_h%7E");
        assert_eq!(form_encode("ñ"), "%C3%B1");
        assert_eq!(form_decode("a+b%2Bc%2Fd"), "a b+c/d");
        assert_eq!(form_decode("100%"), "100%");
    }

    #[test]
    fn test_response_tokens() {
        let mut tokens = ResponseTokens::new();
        tokens.add_header("X-Score", "80");
        tokens.add_header("Set-Cookie", "a=1");
        tokens.add_header("set-cookie", "b=2");
        tokens.set_body("Hello%20world");

        let template = Template::parse("${h.x-score}|${h.Set-Cookie}|${body}|${%body}|${h.missing}");
        assert_eq!(template.render_response(&tokens), "80|a=1,b=2|Hello%20world|Hello world|");
    }

    #[test]
    fn test_json_object_tokens() {
        let mut tokens = ResponseTokens::new();
        tokens
            .add_json(r#"{"score":"87","detail":{"x":1},"ok":true,"n":5,"none":null}"#)
            .unwrap();
        assert_eq!(tokens.get("j.score"), Some("87"));
        assert_eq!(tokens.get("j.detail"), Some(r#"{"x":1}"#));
        assert_eq!(tokens.get("j.ok"), Some("true"));
        assert_eq!(tokens.get("j.n"), Some("5"));
        assert_eq!(tokens.get("j.none"), Some("null"));
    }

    #[test]
    fn test_json_array_and_scalar_tokens() {
        let mut tokens = ResponseTokens::new();
        tokens.add_json(r#"[10, "two", {"a": [1]}]"#).unwrap();
        assert_eq!(tokens.get("j.0"), Some("10"));
        assert_eq!(tokens.get("j.1"), Some(r#""two""#));
        assert_eq!(tokens.get("j.2"), Some(r#"{"a":[1]}"#));

        let mut scalar = ResponseTokens::new();
        scalar.add_json("42").unwrap();
        assert_eq!(scalar.get("j.0"), Some("42"));

        let mut broken = ResponseTokens::new();
        assert!(broken.add_json("{not json").is_err());
        assert_eq!(broken.get("j.0"), None);
    }
}
