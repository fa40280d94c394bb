//! Textual-protobuf serialization of [`BinlogSource`].
//!
//! The CDC catalog's `source` column stores descriptors in the compact text
//! format, e.g.:
//!
//! ```text
//! keyspace:"ks" shard:"-80" filter:{rules:{match:"t1" filter:"exclude"} rules:{match:"/.*" filter:"-80"}} stop_after_copy:true
//! ```
//!
//! Running tablets parse this column, so the rendering is bit-exact:
//! fields in wire order, default values omitted, single spaces between
//! fields, `\"`/`\\`-style string escaping. The parser is more lenient than
//! the renderer — arbitrary whitespace between tokens and an optional `:`
//! before `{` — but rejects unknown field names outright.

use thiserror::Error;

use crate::source::{BinlogSource, Filter, OnDdlAction, Rule};

/// Parse failures for the `source` column text format.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TextPbError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("unexpected character {found:?} at byte {pos}")]
    UnexpectedChar { pos: usize, found: char },

    #[error("unknown field {0:?}")]
    UnknownField(String),

    #[error("invalid escape sequence at byte {0}")]
    BadEscape(usize),

    #[error("invalid boolean {0:?}")]
    BadBool(String),

    #[error("invalid enum value {0:?}")]
    BadEnum(String),
}

// ── Rendering ────────────────────────────────────────────────────────

/// Render a descriptor in the canonical compact form stored in the
/// catalog.
pub fn render_binlog_source(bls: &BinlogSource) -> String {
    let mut fields: Vec<String> = Vec::new();
    if !bls.keyspace.is_empty() {
        fields.push(format!("keyspace:{}", quote(&bls.keyspace)));
    }
    if !bls.shard.is_empty() {
        fields.push(format!("shard:{}", quote(&bls.shard)));
    }
    if !bls.filter.rules.is_empty() {
        let rules: Vec<String> = bls.filter.rules.iter().map(render_rule).collect();
        fields.push(format!("filter:{{{}}}", rules.join(" ")));
    }
    if bls.on_ddl != OnDdlAction::Ignore {
        fields.push(format!("on_ddl:{}", bls.on_ddl));
    }
    if bls.stop_after_copy {
        fields.push("stop_after_copy:true".to_string());
    }
    fields.join(" ")
}

fn render_rule(rule: &Rule) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !rule.match_.is_empty() {
        parts.push(format!("match:{}", quote(&rule.match_)));
    }
    if !rule.filter.is_empty() {
        parts.push(format!("filter:{}", quote(&rule.filter)));
    }
    format!("rules:{{{}}}", parts.join(" "))
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

// ── Parsing ──────────────────────────────────────────────────────────

/// Parse the `source` column text back into a descriptor.
pub fn parse_binlog_source(input: &str) -> Result<BinlogSource, TextPbError> {
    let mut p = Parser { input, pos: 0 };
    let mut bls = BinlogSource::default();
    loop {
        p.skip_ws();
        if p.at_eof() {
            break;
        }
        let field = p.parse_ident()?;
        match field.as_str() {
            "keyspace" => {
                p.expect(':')?;
                bls.keyspace = p.parse_string()?;
            }
            "shard" => {
                p.expect(':')?;
                bls.shard = p.parse_string()?;
            }
            "filter" => {
                bls.filter = p.parse_filter()?;
            }
            "on_ddl" => {
                p.expect(':')?;
                let name = p.parse_ident()?;
                bls.on_ddl = name.parse().map_err(|_| TextPbError::BadEnum(name))?;
            }
            "stop_after_copy" => {
                p.expect(':')?;
                bls.stop_after_copy = p.parse_bool()?;
            }
            other => return Err(TextPbError::UnknownField(other.to_string())),
        }
    }
    Ok(bls)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn at_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Result<char, TextPbError> {
        let c = self.peek().ok_or(TextPbError::UnexpectedEof)?;
        self.pos += c.len_utf8();
        Ok(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, want: char) -> Result<(), TextPbError> {
        self.skip_ws();
        let pos = self.pos;
        let found = self.bump()?;
        if found == want {
            Ok(())
        } else {
            Err(TextPbError::UnexpectedChar { pos, found })
        }
    }

    fn parse_ident(&mut self) -> Result<String, TextPbError> {
        self.skip_ws();
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        if self.pos == start {
            match self.peek() {
                Some(found) => Err(TextPbError::UnexpectedChar {
                    pos: self.pos,
                    found,
                }),
                None => Err(TextPbError::UnexpectedEof),
            }
        } else {
            Ok(self.input[start..self.pos].to_string())
        }
    }

    fn parse_string(&mut self) -> Result<String, TextPbError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            let pos = self.pos;
            match self.bump()? {
                '"' => return Ok(out),
                '\\' => match self.bump()? {
                    '"' => out.push('"'),
                    '\\' => out.push('\\'),
                    'n' => out.push('\n'),
                    'r' => out.push('\r'),
                    't' => out.push('\t'),
                    _ => return Err(TextPbError::BadEscape(pos)),
                },
                c => out.push(c),
            }
        }
    }

    fn parse_bool(&mut self) -> Result<bool, TextPbError> {
        let word = self.parse_ident()?;
        match word.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(TextPbError::BadBool(word)),
        }
    }

    /// `filter` value: optional `:`, then `{ rules:{...} rules:{...} }`.
    fn parse_filter(&mut self) -> Result<Filter, TextPbError> {
        self.open_brace()?;
        let mut filter = Filter::default();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.bump()?;
                return Ok(filter);
            }
            let field = self.parse_ident()?;
            match field.as_str() {
                "rules" => filter.rules.push(self.parse_rule()?),
                other => return Err(TextPbError::UnknownField(other.to_string())),
            }
        }
    }

    fn parse_rule(&mut self) -> Result<Rule, TextPbError> {
        self.open_brace()?;
        let mut rule = Rule::default();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.bump()?;
                return Ok(rule);
            }
            let field = self.parse_ident()?;
            match field.as_str() {
                "match" => {
                    self.expect(':')?;
                    rule.match_ = self.parse_string()?;
                }
                "filter" => {
                    self.expect(':')?;
                    rule.filter = self.parse_string()?;
                }
                other => return Err(TextPbError::UnknownField(other.to_string())),
            }
        }
    }

    /// Consume an optional `:` followed by `{`.
    fn open_brace(&mut self) -> Result<(), TextPbError> {
        self.skip_ws();
        if self.peek() == Some(':') {
            self.bump()?;
        }
        self.expect('{')
    }
}
