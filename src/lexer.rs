use crate::error::RenderError;
use crate::syntax::Syntax;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Text(String),
    BlockStart, // {%
    BlockEnd, // %}
    VarStart, // {{
    VarEnd, // }}

    // Keywords
    If,
    Elif,
    Else,
    EndIf,
    For,
    In,
    EndFor,
    Set,
    And,
    Or,
    Not,
    Is,
    True,
    False,
    None,

    // Symbols
    EqEq, // ==
    NotEq, // !=
    Lt, // <
    LtEq, // <=
    Gt, // >
    GtEq, // >=
    Plus, // +
    Minus, // -
    Star, // *
    Slash, // /
    SlashSlash, // //
    Percent, // %
    Tilde, // ~
    Pipe, // |
    Assign, // =
    Comma, // ,
    Colon, // :
    Dot, // .
    LBracket, // [
    RBracket, // ]
    LParen, // (
    RParen, // )
    LBrace, // {
    RBrace, // }

    // Data
    Ident(String),
    StringLit(String),
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    Var,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagKind {
    Var,
    Block,
    Comment,
}

/// Whitespace handling applied while splitting text from tags.
#[derive(Debug, Clone, Copy)]
pub struct LexOptions {
    pub trim_blocks: bool,
    pub lstrip_blocks: bool,
}

#[derive(Clone)]
pub struct Tokenizer<'a> {
    input: &'a str,
    syntax: &'a Syntax,
    options: LexOptions,
    cursor: usize,
    state: State,
    // set by a `-` before a closing delimiter
    strip_next: bool,
    // nesting of `{`/`[`/`(` inside a tag, so `}}` in a dict literal is not a tag end
    depth: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str, syntax: &'a Syntax, options: LexOptions) -> Self {
        Self {
            input,
            syntax,
            options,
            cursor: 0,
            state: State::Data,
            strip_next: false,
            depth: 0,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.cursor..]
    }

    fn advance(&mut self, n: usize) {
        self.cursor += n;
    }

    /// 1-based line of the cursor.
    pub fn line(&self) -> usize {
        self.input[..self.cursor].matches('\n').count() + 1
    }

    fn error(&self, message: impl Into<String>) -> RenderError {
        RenderError::Syntax {
            line: self.line(),
            message: message.into(),
        }
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, RenderError> {
        loop {
            if self.remaining().is_empty() {
                return match self.state {
                    State::Data => Ok(None),
                    _ => Err(self.error("unexpected end of template inside a tag")),
                };
            }
            let token = match self.state {
                State::Data => self.lex_data()?,
                State::Var | State::Block => self.lex_tag()?,
            };
            if let Some(token) = token {
                return Ok(Some(token));
            }
        }
    }

    fn find_tag(&self, rest: &str) -> Option<(usize, TagKind)> {
        let candidates = [
            (&self.syntax.comment_start, TagKind::Comment),
            (&self.syntax.block_start, TagKind::Block),
            (&self.syntax.variable_start, TagKind::Var),
        ];
        let mut best: Option<(usize, usize, TagKind)> = None;
        for (marker, kind) in candidates {
            if let Some(idx) = rest.find(marker.as_str()) {
                let better = match best {
                    None => true,
                    Some((bidx, blen, _)) => idx < bidx || (idx == bidx && marker.len() > blen),
                };
                if better {
                    best = Some((idx, marker.len(), kind));
                }
            }
        }
        best.map(|(idx, _, kind)| (idx, kind))
    }

    fn start_marker(&self, kind: TagKind) -> &'a str {
        match kind {
            TagKind::Var => &self.syntax.variable_start,
            TagKind::Block => &self.syntax.block_start,
            TagKind::Comment => &self.syntax.comment_start,
        }
    }

    /// Emits the text before the next tag, or consumes the tag opener.
    /// Returns `None` when something was consumed without producing a token.
    fn lex_data(&mut self) -> Result<Option<Token>, RenderError> {
        let rest = self.remaining();
        let at_line_start = self.cursor == 0 || self.input[..self.cursor].ends_with('\n');

        match self.find_tag(rest) {
            None => {
                let mut text = rest;
                if std::mem::take(&mut self.strip_next) {
                    text = text.trim_start();
                }
                self.advance(rest.len());
                Ok(non_empty(text))
            }
            Some((0, kind)) => {
                self.strip_next = false;
                self.open_tag(kind)
            }
            Some((idx, kind)) => {
                let after = &rest[idx + self.start_marker(kind).len()..];
                let mut text = &rest[..idx];
                if std::mem::take(&mut self.strip_next) {
                    text = text.trim_start();
                }
                if after.starts_with('-') {
                    text = text.trim_end();
                } else if self.options.lstrip_blocks
                    && kind != TagKind::Var
                    && !after.starts_with('+')
                {
                    text = lstrip_line(text, at_line_start);
                }
                self.advance(idx);
                Ok(non_empty(text))
            }
        }
    }

    fn open_tag(&mut self, kind: TagKind) -> Result<Option<Token>, RenderError> {
        let marker_len = self.start_marker(kind).len();
        match kind {
            TagKind::Comment => {
                self.advance(marker_len);
                let syntax: &'a Syntax = self.syntax;
                let end = syntax.comment_end.as_str();
                let close = self
                    .remaining()
                    .find(end)
                    .ok_or_else(|| self.error("unclosed comment"))?;
                let body = &self.remaining()[..close];
                self.advance(close + end.len());
                self.after_close(body.ends_with('-'), true);
                Ok(None)
            }
            TagKind::Block => {
                if let Some(text) = self.try_raw()? {
                    return Ok(Some(Token::Text(text)));
                }
                self.advance(marker_len);
                self.skip_modifier();
                self.state = State::Block;
                self.depth = 0;
                Ok(Some(Token::BlockStart))
            }
            TagKind::Var => {
                self.advance(marker_len);
                self.skip_modifier();
                self.state = State::Var;
                self.depth = 0;
                Ok(Some(Token::VarStart))
            }
        }
    }

    fn skip_modifier(&mut self) {
        if self.remaining().starts_with('-') || self.remaining().starts_with('+') {
            self.advance(1);
        }
    }

    /// Handles `{% raw %}...{% endraw %}` starting at the cursor.
    fn try_raw(&mut self) -> Result<Option<String>, RenderError> {
        let syntax: &'a Syntax = self.syntax;
        let start = syntax.block_start.as_str();
        let end = syntax.block_end.as_str();
        let Some(open_len) = match_keyword_tag(self.remaining(), start, end, "raw") else {
            return Ok(None);
        };
        let body_start = self.cursor + open_len;
        let input: &'a str = self.input;
        let body = &input[body_start..];
        let mut search = 0;
        while let Some(idx) = body[search..].find(start) {
            let at = search + idx;
            if let Some(close_len) = match_keyword_tag(&body[at..], start, end, "endraw") {
                let text = body[..at].to_string();
                let closing = &body[at..at + close_len];
                let strip = closing[..closing.len() - end.len()].ends_with('-');
                self.cursor = body_start + at + close_len;
                self.after_close(strip, true);
                return Ok(Some(text));
            }
            search = at + start.len();
        }
        Err(self.error("missing endraw for raw block"))
    }

    fn after_close(&mut self, strip: bool, trims: bool) {
        if strip {
            self.strip_next = true;
        } else if trims && self.options.trim_blocks {
            let after = self.remaining();
            if after.starts_with('\n') {
                self.advance(1);
            } else if after.starts_with("\r\n") {
                self.advance(2);
            }
        }
    }

    fn lex_tag(&mut self) -> Result<Option<Token>, RenderError> {
        // In tag: skip whitespace
        let rest = self.remaining();
        let rest_trimmed = rest.trim_start();
        self.advance(rest.len() - rest_trimmed.len());

        let rest = self.remaining();
        if rest.is_empty() {
            return Ok(None);
        }

        // Check tag ends
        if self.depth == 0 {
            let syntax: &'a Syntax = self.syntax;
            let (end, token) = match self.state {
                State::Block => (syntax.block_end.as_str(), Token::BlockEnd),
                _ => (syntax.variable_end.as_str(), Token::VarEnd),
            };
            let stripped = rest.starts_with('-') && rest[1..].starts_with(end);
            if stripped || rest.starts_with(end) {
                self.advance(end.len() + usize::from(stripped));
                let trims = self.state == State::Block;
                self.state = State::Data;
                self.after_close(stripped, trims);
                return Ok(Some(token));
            }
        }

        const SYMBOLS: &[(&str, Token)] = &[
            ("==", Token::EqEq),
            ("!=", Token::NotEq),
            ("<=", Token::LtEq),
            (">=", Token::GtEq),
            ("//", Token::SlashSlash),
            ("<", Token::Lt),
            (">", Token::Gt),
            ("+", Token::Plus),
            ("-", Token::Minus),
            ("*", Token::Star),
            ("/", Token::Slash),
            ("%", Token::Percent),
            ("~", Token::Tilde),
            ("|", Token::Pipe),
            ("=", Token::Assign),
            (",", Token::Comma),
            (":", Token::Colon),
            (".", Token::Dot),
        ];
        let first = rest.chars().next().unwrap_or(' ');

        if first.is_ascii_digit() {
            return self.lex_number().map(Some);
        }

        for (symbol, token) in SYMBOLS {
            if rest.starts_with(symbol) {
                self.advance(symbol.len());
                return Ok(Some(token.clone()));
            }
        }

        let bracket = match first {
            '[' => Some((Token::LBracket, true)),
            '(' => Some((Token::LParen, true)),
            '{' => Some((Token::LBrace, true)),
            ']' => Some((Token::RBracket, false)),
            ')' => Some((Token::RParen, false)),
            '}' => Some((Token::RBrace, false)),
            _ => None,
        };
        if let Some((token, opens)) = bracket {
            if opens {
                self.depth += 1;
            } else {
                self.depth = self.depth.saturating_sub(1);
            }
            self.advance(1);
            return Ok(Some(token));
        }

        // Strings
        if first == '\'' || first == '"' {
            return self.lex_string(first).map(Some);
        }

        // Identifiers / Keywords
        if first.is_alphabetic() || first == '_' {
            let ident_len: usize = rest
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .map(char::len_utf8)
                .sum();
            let ident = &rest[..ident_len];
            self.advance(ident_len);

            return Ok(Some(match ident {
                "if" => Token::If,
                "elif" => Token::Elif,
                "else" => Token::Else,
                "endif" => Token::EndIf,
                "for" => Token::For,
                "in" => Token::In,
                "endfor" => Token::EndFor,
                "set" => Token::Set,
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                "is" => Token::Is,
                "true" | "True" => Token::True,
                "false" | "False" => Token::False,
                "none" | "None" => Token::None,
                _ => Token::Ident(ident.to_string()),
            }));
        }

        Err(self.error(format!("unexpected character '{}'", first)))
    }

    fn lex_number(&mut self) -> Result<Token, RenderError> {
        let rest = self.remaining();
        let bytes = rest.as_bytes();
        let digits = |from: usize| {
            bytes[from..]
                .iter()
                .take_while(|b| b.is_ascii_digit() || **b == b'_')
                .count()
        };
        let mut len = digits(0);
        let mut is_float = false;
        if bytes.get(len) == Some(&b'.') && bytes.get(len + 1).is_some_and(u8::is_ascii_digit) {
            is_float = true;
            len += 1 + digits(len + 1);
        }
        if matches!(bytes.get(len), Some(b'e' | b'E')) {
            let mut exp = len + 1;
            if matches!(bytes.get(exp), Some(b'+' | b'-')) {
                exp += 1;
            }
            if bytes.get(exp).is_some_and(u8::is_ascii_digit) {
                is_float = true;
                len = exp + digits(exp);
            }
        }
        let literal: String = rest[..len].chars().filter(|c| *c != '_').collect();
        self.advance(len);
        if is_float {
            literal
                .parse()
                .map(Token::Float)
                .map_err(|_| self.error(format!("invalid number '{}'", literal)))
        } else {
            literal
                .parse()
                .map(Token::Int)
                .map_err(|_| self.error(format!("integer '{}' out of range", literal)))
        }
    }

    fn lex_string(&mut self, quote: char) -> Result<Token, RenderError> {
        let rest = self.remaining();
        let mut s = String::new();
        let mut chars = rest.char_indices().skip(1);
        while let Some((idx, c)) = chars.next() {
            if c == quote {
                self.advance(idx + c.len_utf8());
                return Ok(Token::StringLit(s));
            }
            if c == '\\' {
                match chars.next() {
                    Some((_, 'n')) => s.push('\n'),
                    Some((_, 't')) => s.push('\t'),
                    Some((_, 'r')) => s.push('\r'),
                    Some((_, '\\')) => s.push('\\'),
                    Some((_, '\'')) => s.push('\''),
                    Some((_, '"')) => s.push('"'),
                    // unknown escapes keep their backslash, so regex patterns survive
                    Some((_, other)) => {
                        s.push('\\');
                        s.push(other);
                    }
                    None => break,
                }
            } else {
                s.push(c);
            }
        }
        Err(self.error("unterminated string literal"))
    }
}

fn non_empty(text: &str) -> Option<Token> {
    if text.is_empty() {
        None
    } else {
        Some(Token::Text(text.to_string()))
    }
}

/// Drops spaces and tabs between the last line start and the tag.
fn lstrip_line(text: &str, starts_at_line_start: bool) -> &str {
    let line_start = match text.rfind('\n') {
        Some(idx) => idx + 1,
        None if starts_at_line_start => 0,
        None => return text,
    };
    if text[line_start..].chars().all(|c| c == ' ' || c == '\t') {
        &text[..line_start]
    } else {
        text
    }
}

/// Matches `{% keyword %}` (with optional `-` modifiers) at the start of
/// `input`, returning the length of the whole tag.
fn match_keyword_tag(input: &str, start: &str, end: &str, keyword: &str) -> Option<usize> {
    let mut rest = input.strip_prefix(start)?;
    rest = rest.strip_prefix(|c| c == '-' || c == '+').unwrap_or(rest);
    rest = rest.trim_start();
    rest = rest.strip_prefix(keyword)?;
    rest = rest.trim_start();
    rest = rest.strip_prefix('-').unwrap_or(rest);
    rest = rest.strip_prefix(end)?;
    Some(input.len() - rest.len())
}
