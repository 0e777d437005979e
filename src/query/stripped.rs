//! Query canonicalization: tokenizing, literal stripping, stable hashing.
//!
//! The stripper lifts every literal out of the query text and replaces it
//! with a positional placeholder, so that queries differing only in literal
//! values share one canonical form, one hash, and therefore one cached plan.
//! The parser consumes the stripped token stream; literal values reach
//! execution through the positional parameter map instead of the AST.

use std::collections::BTreeMap;

use xxhash_rust::xxh3::xxh3_64;

use crate::query::errors::QueryError;
use crate::query::value::TypedValue;

/// One lexed token plus its index and source span.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Index of the token in the stream; doubles as the placeholder position
    /// for stripped literals.
    pub position: usize,
    /// Byte range in the source text.
    pub span: (usize, usize),
}

#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    /// Identifier or keyword; keyword-ness is decided case-insensitively at
    /// parse time.
    Ident(String),
    /// Literal replaced by a positional placeholder. The value lives in
    /// [`StrippedQuery::literals`].
    Placeholder,
    /// `$name` parameter written by the caller.
    Param(String),
    Punct(&'static str),
    End,
}

impl TokenKind {
    pub fn is_kw(&self, kw: &str) -> bool {
        matches!(self, TokenKind::Ident(s) if s.eq_ignore_ascii_case(kw))
    }
}

/// Canonicalized query. Immutable once built.
#[derive(Clone, Debug)]
pub struct StrippedQuery {
    /// Canonical text with literals replaced by `$<position>`.
    canonical: String,
    /// Stripped token stream the parser consumes.
    tokens: Vec<Token>,
    /// Placeholder position -> extracted literal value.
    literals: BTreeMap<usize, TypedValue>,
    /// Placeholder position -> caller-supplied parameter name.
    parameters: BTreeMap<usize, String>,
    /// Token position -> original text of an unaliased RETURN/WITH item.
    named_expressions: BTreeMap<usize, String>,
    /// Stable hash of the canonical text.
    hash: u64,
}

impl StrippedQuery {
    pub fn new(source: &str) -> Result<Self, QueryError> {
        let raw = lex(source)?;

        let mut tokens = Vec::with_capacity(raw.len() + 1);
        let mut literals = BTreeMap::new();
        let mut parameters = BTreeMap::new();
        let mut canonical = String::with_capacity(source.len());

        for (position, (piece, span)) in raw.iter().enumerate() {
            let kind = match piece {
                Lexeme::Ident(name) => TokenKind::Ident(name.clone()),
                Lexeme::Punct(p) => TokenKind::Punct(p),
                Lexeme::Param(name) => {
                    parameters.insert(position, name.clone());
                    TokenKind::Param(name.clone())
                }
                Lexeme::Literal(value) => {
                    literals.insert(position, value.clone());
                    TokenKind::Placeholder
                }
            };
            if !canonical.is_empty() {
                canonical.push(' ');
            }
            match &kind {
                TokenKind::Ident(name) => canonical.push_str(name),
                TokenKind::Punct(p) => canonical.push_str(p),
                TokenKind::Param(name) => {
                    canonical.push('$');
                    canonical.push_str(name);
                }
                TokenKind::Placeholder => {
                    canonical.push('$');
                    canonical.push_str(&position.to_string());
                }
                TokenKind::End => {}
            }
            tokens.push(Token {
                kind,
                position,
                span: *span,
            });
        }
        tokens.push(Token {
            kind: TokenKind::End,
            position: raw.len(),
            span: (source.len(), source.len()),
        });

        let named_expressions = capture_named_expressions(source, &tokens);
        let hash = xxh3_64(canonical.as_bytes());
        Ok(Self {
            canonical,
            tokens,
            literals,
            parameters,
            named_expressions,
            hash,
        })
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn literals(&self) -> &BTreeMap<usize, TypedValue> {
        &self.literals
    }

    pub fn parameters(&self) -> &BTreeMap<usize, String> {
        &self.parameters
    }

    pub fn named_expressions(&self) -> &BTreeMap<usize, String> {
        &self.named_expressions
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}

#[derive(Clone, Debug)]
enum Lexeme {
    Ident(String),
    Literal(TypedValue),
    Param(String),
    Punct(&'static str),
}

const PUNCTS2: &[&str] = &["<=", ">=", "<>", "!=", "..", "+=", "->", "<-"];
const PUNCTS1: &[char] = &[
    '(', ')', '[', ']', '{', '}', ',', ';', ':', '.', '+', '-', '*', '/', '%', '=', '<', '>', '|',
    '^', '!',
];

fn lex(source: &str) -> Result<Vec<(Lexeme, (usize, usize))>, QueryError> {
    let bytes = source.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        // Comments.
        if c == '/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if c == '/' && bytes.get(i + 1) == Some(&b'*') {
            let close = source[i + 2..]
                .find("*/")
                .ok_or_else(|| QueryError::syntax(i, "unterminated block comment"))?;
            i += close + 4;
            continue;
        }
        let start = i;
        if c == '\'' || c == '"' {
            let (value, end) = lex_string(source, i, c)?;
            out.push((Lexeme::Literal(TypedValue::String(value)), (start, end)));
            i = end;
            continue;
        }
        if c.is_ascii_digit() {
            let (value, end) = lex_number(source, i)?;
            out.push((Lexeme::Literal(value), (start, end)));
            i = end;
            continue;
        }
        if c == '$' {
            let mut j = i + 1;
            while j < bytes.len()
                && ((bytes[j] as char).is_ascii_alphanumeric() || bytes[j] == b'_')
            {
                j += 1;
            }
            if j == i + 1 {
                return Err(QueryError::syntax(i, "expected parameter name after '$'"));
            }
            out.push((Lexeme::Param(source[i + 1..j].to_owned()), (start, j)));
            i = j;
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let mut j = i;
            while j < bytes.len()
                && ((bytes[j] as char).is_ascii_alphanumeric() || bytes[j] == b'_')
            {
                j += 1;
            }
            let word = &source[i..j];
            let lexeme = if word.eq_ignore_ascii_case("true") {
                Lexeme::Literal(TypedValue::Bool(true))
            } else if word.eq_ignore_ascii_case("false") {
                Lexeme::Literal(TypedValue::Bool(false))
            } else {
                Lexeme::Ident(word.to_owned())
            };
            out.push((lexeme, (start, j)));
            i = j;
            continue;
        }
        if let Some(p2) = source
            .get(i..i + 2)
            .and_then(|s| PUNCTS2.iter().copied().find(|p| *p == s))
        {
            out.push((Lexeme::Punct(p2), (start, i + 2)));
            i += 2;
            continue;
        }
        if let Some(p1) = PUNCTS1.iter().find(|p| **p == c) {
            // Single-char puncts are interned as static one-char strings.
            let text: &'static str = match *p1 {
                '(' => "(",
                ')' => ")",
                '[' => "[",
                ']' => "]",
                '{' => "{",
                '}' => "}",
                ',' => ",",
                ';' => ";",
                ':' => ":",
                '.' => ".",
                '+' => "+",
                '-' => "-",
                '*' => "*",
                '/' => "/",
                '%' => "%",
                '=' => "=",
                '<' => "<",
                '>' => ">",
                '|' => "|",
                '^' => "^",
                _ => "!",
            };
            out.push((Lexeme::Punct(text), (start, i + 1)));
            i += 1;
            continue;
        }
        return Err(QueryError::syntax(i, format!("unexpected character '{c}'")));
    }
    Ok(out)
}

fn lex_string(source: &str, start: usize, quote: char) -> Result<(String, usize), QueryError> {
    let bytes = source.as_bytes();
    let mut value = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == quote {
            return Ok((value, i + 1));
        }
        if c == '\\' {
            let escaped = bytes
                .get(i + 1)
                .ok_or_else(|| QueryError::syntax(i, "unterminated string"))?;
            value.push(match *escaped as char {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '\\' => '\\',
                '\'' => '\'',
                '"' => '"',
                other => other,
            });
            i += 2;
            continue;
        }
        // Multi-byte characters pass through unmodified.
        let ch_len = source[i..].chars().next().map(char::len_utf8).unwrap_or(1);
        value.push_str(&source[i..i + ch_len]);
        i += ch_len;
    }
    Err(QueryError::syntax(start, "unterminated string"))
}

fn lex_number(source: &str, start: usize) -> Result<(TypedValue, usize), QueryError> {
    let bytes = source.as_bytes();
    let mut i = start;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut is_float = false;
    // A '.' continues the number only when followed by a digit; `1..3` must
    // lex as 1, .., 3.
    if i < bytes.len()
        && bytes[i] == b'.'
        && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit())
    {
        is_float = true;
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            is_float = true;
            i = j;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
        }
    }
    let text = &source[start..i];
    let value = if is_float {
        TypedValue::Float(
            text.parse::<f64>()
                .map_err(|_| QueryError::syntax(start, format!("bad float literal '{text}'")))?,
        )
    } else {
        TypedValue::Int(
            text.parse::<i64>()
                .map_err(|_| QueryError::syntax(start, format!("bad integer literal '{text}'")))?,
        )
    };
    Ok((value, i))
}

/// Records the user-written text of each unaliased RETURN/WITH item, keyed by
/// the position of the item's first token. The executor prefers these texts
/// for header names.
fn capture_named_expressions(source: &str, tokens: &[Token]) -> BTreeMap<usize, String> {
    const ITEM_TERMINATORS: &[&str] = &[
        "ORDER", "SKIP", "LIMIT", "WHERE", "MATCH", "OPTIONAL", "RETURN", "WITH", "UNWIND",
        "CREATE", "MERGE", "SET", "DELETE", "DETACH", "REMOVE", "UNION", "AS",
    ];
    let mut captured = BTreeMap::new();
    let mut i = 0;
    while i < tokens.len() {
        let is_projection = tokens[i].kind.is_kw("RETURN") || tokens[i].kind.is_kw("WITH");
        if !is_projection {
            i += 1;
            continue;
        }
        i += 1;
        if i < tokens.len() && tokens[i].kind.is_kw("DISTINCT") {
            i += 1;
        }
        loop {
            let item_start = i;
            let mut depth = 0i32;
            while i < tokens.len() {
                match &tokens[i].kind {
                    TokenKind::Punct(p) if matches!(*p, "(" | "[" | "{") => depth += 1,
                    TokenKind::Punct(p) if matches!(*p, ")" | "]" | "}") => depth -= 1,
                    TokenKind::Punct(",") if depth == 0 => break,
                    TokenKind::Ident(_)
                        if depth == 0
                            && ITEM_TERMINATORS.iter().any(|t| tokens[i].kind.is_kw(t)) =>
                    {
                        break
                    }
                    TokenKind::End => break,
                    _ => {}
                }
                i += 1;
            }
            if i > item_start {
                let begin = tokens[item_start].span.0;
                let end = tokens[i - 1].span.1;
                captured.insert(
                    tokens[item_start].position,
                    source[begin..end].trim().to_owned(),
                );
            }
            // Skip an alias; the aliased symbol is named by its alias, so the
            // captured text is simply never looked up.
            if i < tokens.len() && tokens[i].kind.is_kw("AS") {
                i += 2;
            }
            if i < tokens.len() && matches!(tokens[i].kind, TokenKind::Punct(",")) {
                i += 1;
                continue;
            }
            break;
        }
    }
    captured
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_are_lifted() {
        let stripped = StrippedQuery::new("MATCH (n {age: 21, name: 'Ann'}) RETURN n").unwrap();
        let values: Vec<&TypedValue> = stripped.literals().values().collect();
        assert_eq!(values.len(), 2);
        assert!(matches!(values[0], TypedValue::Int(21)));
        assert!(matches!(values[1], TypedValue::String(s) if s == "Ann"));
        assert!(stripped.canonical().contains('$'));
    }

    #[test]
    fn hash_independent_of_literal_values() {
        let a = StrippedQuery::new("MATCH (n {age: 21}) RETURN n").unwrap();
        let b = StrippedQuery::new("MATCH (n {age: 42}) RETURN n").unwrap();
        let c = StrippedQuery::new("MATCH (n {age: 'x'}) RETURN n").unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash(), c.hash());
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn hash_sensitive_to_shape() {
        let a = StrippedQuery::new("MATCH (n) RETURN n").unwrap();
        let b = StrippedQuery::new("MATCH (n) RETURN n LIMIT 1").unwrap();
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn named_parameters_are_kept() {
        let stripped = StrippedQuery::new("MATCH (n {name: $who}) RETURN n").unwrap();
        assert_eq!(stripped.literals().len(), 0);
        let names: Vec<&String> = stripped.parameters().values().collect();
        assert_eq!(names, vec!["who"]);
        assert!(stripped.canonical().contains("$who"));
    }

    #[test]
    fn named_expressions_keep_user_text() {
        let stripped = StrippedQuery::new("MATCH (p) RETURN p.id, p.name AS name").unwrap();
        let texts: Vec<&String> = stripped.named_expressions().values().collect();
        assert_eq!(texts[0], "p.id");
        // The aliased item's text is captured but unused by the header path.
        assert_eq!(texts[1], "p.name");
    }

    #[test]
    fn range_dots_do_not_merge_with_integers() {
        let stripped = StrippedQuery::new("MATCH (a)-[*1..3]->(b) RETURN a").unwrap();
        assert_eq!(stripped.literals().len(), 2);
        assert!(stripped.canonical().contains(".."));
    }

    #[test]
    fn booleans_are_literals() {
        let a = StrippedQuery::new("MATCH (n {ok: true}) RETURN n").unwrap();
        let b = StrippedQuery::new("MATCH (n {ok: false}) RETURN n").unwrap();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn syntax_error_on_bad_character() {
        assert!(StrippedQuery::new("MATCH (n) RETURN n ~").is_err());
    }
}
