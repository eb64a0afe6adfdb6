//! Parser for `.http` request definition files.
//!
//! ```text
//! # comment
//! POST https://example.com/hook      <- "METHOD URI" or just "URI" (GET)
//! Content-Type: application/json     <- headers until a blank line
//!
//! {"project": "${data.project}"}     <- body until EOF
//! ```
//!
//! Placeholders are substituted before the text reaches this parser.

use std::collections::BTreeMap;
use std::str::FromStr;

use thiserror::Error;

/// Errors raised for malformed request definitions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpParseError {
    #[error("No HTTP Method or URI Found")]
    MissingRequestLine,
}

/// One HTTP request described by a definition file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericHttpRequest {
    pub method: String,
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl GenericHttpRequest {
    /// Parse a rendered definition
    pub fn parse(text: &str) -> Result<Self, HttpParseError> {
        let mut lines = text.lines().map(|l| l.strip_suffix('\r').unwrap_or(l)).peekable();

        // request line: first line that is neither blank nor a comment
        let request_line = lines
            .by_ref()
            .map(str::trim)
            .find(|l| !l.is_empty() && !is_comment(l))
            .ok_or(HttpParseError::MissingRequestLine)?;

        let mut parts = request_line.split_whitespace();
        let (method, uri) = match (parts.next(), parts.next()) {
            (Some(method), Some(uri)) => (method.to_ascii_uppercase(), uri.to_string()),
            (Some(uri), None) => ("GET".to_string(), uri.to_string()),
            _ => return Err(HttpParseError::MissingRequestLine),
        };

        // headers: until a blank line, EOF, or a line without ':'
        let mut headers = BTreeMap::new();
        while let Some(line) = lines.peek() {
            let line = line.trim();
            if is_comment(line) {
                lines.next();
                continue;
            }
            if line.is_empty() {
                lines.next();
                break;
            }
            match line.split_once(':') {
                Some((name, value)) => {
                    headers.insert(name.trim().to_string(), value.trim().to_string());
                    lines.next();
                }
                None => break,
            }
        }

        // body: remaining non-comment lines, without trailing blank lines
        let mut body_lines: Vec<&str> = lines.filter(|l| !is_comment(l)).collect();
        while body_lines.last().map_or(false, |l| l.trim().is_empty()) {
            body_lines.pop();
        }

        let mut body = String::new();
        for line in body_lines {
            body.push_str(line);
            body.push('\n');
        }

        Ok(Self {
            method,
            uri,
            headers,
            body,
        })
    }
}

impl FromStr for GenericHttpRequest {
    type Err = HttpParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn is_comment(line: &str) -> bool {
    line.starts_with('#')
}
