use crate::error::{CompileError, LexError, SyntaxError};
use crate::token::{Token, TokenKind};
use tracing::trace;

/// Pull-based scanner with one token of lookahead.
///
/// Numbers are returned as raw text; the parser decides between integer and
/// float. Strings are returned decoded.
pub struct Lexer<'a> {
    src: &'a str,
    source: &'a [u8],
    pos: usize,
    line: u32,
    cached: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Lexer {
            src,
            source: src.as_bytes(),
            pos: 0,
            line: 1,
            cached: None,
        }
    }

    /// Current line of the cursor (not of the lookahead token).
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Consume and return the next token.
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        if let Some(token) = self.cached.take() {
            return Ok(token);
        }
        let token = self.scan()?;
        trace!(kind = %token.kind, line = token.line, "scanned token");
        Ok(token)
    }

    /// Peek at the next token without consuming it.
    pub fn look_ahead(&mut self) -> Result<&Token, LexError> {
        let token = match self.cached.take() {
            Some(token) => token,
            None => self.next_token()?,
        };
        Ok(self.cached.insert(token))
    }

    /// Kind of the next token.
    pub fn peek_kind(&mut self) -> Result<TokenKind, LexError> {
        Ok(self.look_ahead()?.kind)
    }

    /// Consume the next token, failing if it is not of kind `expected`.
    pub fn next_token_of_kind(&mut self, expected: TokenKind) -> Result<Token, CompileError> {
        let token = self.next_token()?;
        if token.kind != expected {
            return Err(SyntaxError {
                line: token.line,
                near: token.to_string(),
                message: format!("'{expected}' expected"),
            }
            .into());
        }
        Ok(token)
    }

    /// Consume the next token if it is of kind `kind`.
    pub fn test_next(&mut self, kind: TokenKind) -> Result<bool, LexError> {
        if self.peek_kind()? == kind {
            self.next_token()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ---- Internal scanning ----

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn starts_with(&self, prefix: &[u8]) -> bool {
        self.source[self.pos..].starts_with(prefix)
    }

    fn advance_char(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        match ch {
            // \n\r and \r\n each count as a single line break
            b'\n' | b'\r' => {
                let pair = if ch == b'\n' { b'\r' } else { b'\n' };
                if self.peek() == Some(pair) {
                    self.pos += 1;
                }
                self.line += 1;
            }
            _ => {}
        }
        Some(ch)
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            while let Some(ch) = self.peek() {
                if is_whitespace(ch) {
                    self.advance_char();
                } else {
                    break;
                }
            }

            if !self.starts_with(b"--") {
                return Ok(());
            }
            self.pos += 2;
            if let Some(level) = self.check_long_bracket() {
                self.skip_long_opener(level);
                self.scan_long_content(level, "comment")?;
                continue;
            }
            while let Some(ch) = self.peek() {
                if ch == b'\n' || ch == b'\r' {
                    break;
                }
                self.pos += 1;
            }
        }
    }

    /// Level of a complete `[=*[` opener at the cursor.
    fn check_long_bracket(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        while self.peek_at(level + 1) == Some(b'=') {
            level += 1;
        }
        (self.peek_at(level + 1) == Some(b'[')).then_some(level)
    }

    fn skip_long_opener(&mut self, level: usize) {
        self.pos += level + 2;
        // a line break right after the opener is not part of the content
        if matches!(self.peek(), Some(b'\n' | b'\r')) {
            self.advance_char();
        }
    }

    fn symbol(&mut self, kind: TokenKind, len: usize, line: u32) -> Token {
        self.pos += len;
        Token::new(kind, line, kind.as_str())
    }

    fn scan(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace_and_comments()?;

        let line = self.line;
        let Some(ch) = self.peek() else {
            return Ok(Token::eof(line));
        };

        let token = match ch {
            b';' => self.symbol(TokenKind::Semi, 1, line),
            b',' => self.symbol(TokenKind::Comma, 1, line),
            b'(' => self.symbol(TokenKind::LParen, 1, line),
            b')' => self.symbol(TokenKind::RParen, 1, line),
            b']' => self.symbol(TokenKind::RBracket, 1, line),
            b'{' => self.symbol(TokenKind::LBrace, 1, line),
            b'}' => self.symbol(TokenKind::RBrace, 1, line),
            b'+' => self.symbol(TokenKind::Plus, 1, line),
            b'-' => self.symbol(TokenKind::Minus, 1, line),
            b'*' => self.symbol(TokenKind::Star, 1, line),
            b'^' => self.symbol(TokenKind::Caret, 1, line),
            b'%' => self.symbol(TokenKind::Percent, 1, line),
            b'&' => self.symbol(TokenKind::Ampersand, 1, line),
            b'|' => self.symbol(TokenKind::Pipe, 1, line),
            b'#' => self.symbol(TokenKind::Hash, 1, line),
            b':' if self.starts_with(b"::") => self.symbol(TokenKind::DoubleColon, 2, line),
            b':' => self.symbol(TokenKind::Colon, 1, line),
            b'~' if self.starts_with(b"~=") => self.symbol(TokenKind::NotEqual, 2, line),
            b'~' => self.symbol(TokenKind::Tilde, 1, line),
            b'<' if self.starts_with(b"<<") => self.symbol(TokenKind::ShiftLeft, 2, line),
            b'<' if self.starts_with(b"<=") => self.symbol(TokenKind::LessEq, 2, line),
            b'<' => self.symbol(TokenKind::Less, 1, line),
            b'>' if self.starts_with(b">>") => self.symbol(TokenKind::ShiftRight, 2, line),
            b'>' if self.starts_with(b">=") => self.symbol(TokenKind::GreaterEq, 2, line),
            b'>' => self.symbol(TokenKind::Greater, 1, line),
            b'/' if self.starts_with(b"//") => self.symbol(TokenKind::FloorDiv, 2, line),
            b'/' => self.symbol(TokenKind::Slash, 1, line),
            b'=' if self.starts_with(b"==") => self.symbol(TokenKind::Equal, 2, line),
            b'=' => self.symbol(TokenKind::Assign, 1, line),
            b'.' if self.starts_with(b"...") => self.symbol(TokenKind::Vararg, 3, line),
            b'.' if self.starts_with(b"..") => self.symbol(TokenKind::DotDot, 2, line),
            b'.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.scan_number(line)?
            }
            b'.' => self.symbol(TokenKind::Dot, 1, line),
            b'[' if matches!(self.peek_at(1), Some(b'[' | b'=')) => self.scan_long_string(line)?,
            b'[' => self.symbol(TokenKind::LBracket, 1, line),
            b'"' | b'\'' => self.scan_short_string(line)?,
            b'0'..=b'9' => self.scan_number(line)?,
            _ if is_ident_start(ch) => self.scan_name(line),
            _ => {
                let near = self.src[self.pos..]
                    .chars()
                    .next()
                    .map(String::from)
                    .unwrap_or_default();
                return Err(LexError::UnexpectedChar { near, line });
            }
        };
        Ok(token)
    }

    fn scan_name(&mut self, line: u32) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        let name = &self.src[start..self.pos];
        let kind = TokenKind::keyword_from_str(name).unwrap_or(TokenKind::Identifier);
        Token::new(kind, line, name)
    }

    fn skip_digits(&mut self, hex: bool) -> usize {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            let ok = if hex {
                ch.is_ascii_hexdigit()
            } else {
                ch.is_ascii_digit()
            };
            if !ok {
                break;
            }
            self.pos += 1;
        }
        self.pos - start
    }

    fn scan_number(&mut self, line: u32) -> Result<Token, LexError> {
        let start = self.pos;
        let hex = self.starts_with(b"0x") || self.starts_with(b"0X");
        if hex {
            self.pos += 2;
        }

        let mut mantissa_digits = self.skip_digits(hex);
        if self.peek() == Some(b'.') && self.peek_at(1) != Some(b'.') {
            self.pos += 1;
            mantissa_digits += self.skip_digits(hex);
        }
        let mut well_formed = mantissa_digits > 0;

        let exponent: &[u8] = if hex { b"pP" } else { b"eE" };
        if self.peek().is_some_and(|c| exponent.contains(&c)) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            well_formed &= self.skip_digits(false) > 0;
        }

        // a letter glued to the numeral makes the whole word malformed
        if self.peek().is_some_and(is_ident_continue) {
            well_formed = false;
            while self
                .peek()
                .is_some_and(|c| is_ident_continue(c) || c == b'.')
            {
                self.pos += 1;
            }
        }

        let text = &self.src[start..self.pos];
        if !well_formed {
            return Err(LexError::MalformedNumber {
                near: text.to_string(),
                line,
            });
        }
        Ok(Token::new(TokenKind::Number, line, text))
    }

    /// Source text from `start` to the cursor, for error messages.
    fn near(&self, start: usize) -> String {
        let end = self.pos.min(self.source.len());
        String::from_utf8_lossy(&self.source[start..end]).into_owned()
    }

    fn invalid_escape(&mut self, start: usize, line: u32) -> LexError {
        // include the offending character
        if self.peek().is_some_and(|c| c != b'\n' && c != b'\r') {
            self.pos += 1;
        }
        LexError::InvalidEscape {
            near: self.near(start),
            line,
        }
    }

    fn scan_short_string(&mut self, line: u32) -> Result<Token, LexError> {
        let start = self.pos;
        let quote = self.source[self.pos];
        self.pos += 1;
        let mut buf = Vec::new();

        loop {
            match self.peek() {
                None | Some(b'\n') | Some(b'\r') => {
                    return Err(LexError::UnterminatedString {
                        near: self.near(start),
                        line,
                    });
                }
                Some(ch) if ch == quote => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    self.scan_escape(&mut buf, start, line)?;
                }
                Some(ch) => {
                    self.pos += 1;
                    buf.push(ch);
                }
            }
        }

        let text = String::from_utf8(buf).map_err(|_| LexError::MalformedString { line })?;
        Ok(Token::new(TokenKind::String, line, text))
    }

    /// Decode one escape sequence; the backslash is already consumed.
    fn scan_escape(&mut self, buf: &mut Vec<u8>, start: usize, line: u32) -> Result<(), LexError> {
        let Some(ch) = self.peek() else {
            return Err(LexError::UnterminatedString {
                near: self.near(start),
                line,
            });
        };
        let simple = match ch {
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b'f' => Some(0x0C),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'v' => Some(0x0B),
            b'\\' => Some(b'\\'),
            b'"' => Some(b'"'),
            b'\'' => Some(b'\''),
            _ => None,
        };
        if let Some(byte) = simple {
            self.pos += 1;
            buf.push(byte);
            return Ok(());
        }

        match ch {
            b'\n' | b'\r' => {
                self.advance_char();
                buf.push(b'\n');
            }
            b'x' => {
                self.pos += 1;
                let mut value = 0u8;
                for _ in 0..2 {
                    match self.peek() {
                        Some(d) if d.is_ascii_hexdigit() => {
                            self.pos += 1;
                            value = (value << 4) | hex_value(d);
                        }
                        _ => return Err(self.invalid_escape(start, line)),
                    }
                }
                buf.push(value);
            }
            b'u' => {
                self.pos += 1;
                let c = self.scan_unicode_escape(start, line)?;
                let mut utf8 = [0u8; 4];
                buf.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            }
            b'z' => {
                self.pos += 1;
                while self.peek().is_some_and(is_whitespace) {
                    self.advance_char();
                }
            }
            b'0'..=b'9' => {
                let mut value: u32 = 0;
                let mut count = 0;
                while count < 3 {
                    match self.peek() {
                        Some(d) if d.is_ascii_digit() => {
                            self.pos += 1;
                            value = value * 10 + u32::from(d - b'0');
                            count += 1;
                        }
                        _ => break,
                    }
                }
                let byte = u8::try_from(value).map_err(|_| LexError::InvalidEscape {
                    near: self.near(start),
                    line,
                })?;
                buf.push(byte);
            }
            _ => return Err(self.invalid_escape(start, line)),
        }
        Ok(())
    }

    /// `\u{XXX}`: a braced hex code point that must be a Unicode scalar value.
    fn scan_unicode_escape(&mut self, start: usize, line: u32) -> Result<char, LexError> {
        if self.peek() != Some(b'{') {
            return Err(self.invalid_escape(start, line));
        }
        self.pos += 1;
        let mut code: u32 = 0;
        let mut digits = 0;
        loop {
            match self.peek() {
                Some(b'}') if digits > 0 => {
                    self.pos += 1;
                    break;
                }
                Some(d) if d.is_ascii_hexdigit() => {
                    self.pos += 1;
                    code = code.saturating_mul(16).saturating_add(u32::from(hex_value(d)));
                    digits += 1;
                    if code > 0x10FFFF {
                        return Err(self.invalid_escape(start, line));
                    }
                }
                _ => return Err(self.invalid_escape(start, line)),
            }
        }
        char::from_u32(code).ok_or_else(|| LexError::InvalidEscape {
            near: self.near(start),
            line,
        })
    }

    fn scan_long_string(&mut self, line: u32) -> Result<Token, LexError> {
        let Some(level) = self.check_long_bracket() else {
            return Err(LexError::UnterminatedLongBracket {
                what: "string",
                line,
            });
        };
        self.skip_long_opener(level);
        let content = self.scan_long_content(level, "string")?;
        let text = String::from_utf8(content).map_err(|_| LexError::MalformedString { line })?;
        Ok(Token::new(TokenKind::String, line, text))
    }

    /// Read up to and including the `]=*]` closer of the given level.
    fn scan_long_content(&mut self, level: usize, what: &'static str) -> Result<Vec<u8>, LexError> {
        let mut buf = Vec::new();
        loop {
            match self.peek() {
                None => {
                    return Err(LexError::UnterminatedLongBracket {
                        what,
                        line: self.line,
                    });
                }
                Some(b']') if self.check_closing_long_bracket(level) => {
                    self.pos += level + 2;
                    return Ok(buf);
                }
                Some(b'\n') | Some(b'\r') => {
                    self.advance_char();
                    buf.push(b'\n');
                }
                Some(ch) => {
                    self.pos += 1;
                    buf.push(ch);
                }
            }
        }
    }

    fn check_closing_long_bracket(&self, level: usize) -> bool {
        (1..=level).all(|i| self.peek_at(i) == Some(b'=')) && self.peek_at(level + 1) == Some(b']')
    }
}

/// Scan all of `source`, excluding the final end-of-file token.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        if token.kind == TokenKind::Eof {
            return Ok(tokens);
        }
        tokens.push(token);
    }
}

fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\n' | b'\r' | b'\x0B' | b'\x0C')
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

fn hex_value(ch: u8) -> u8 {
    match ch {
        b'0'..=b'9' => ch - b'0',
        b'a'..=b'f' => ch - b'a' + 10,
        b'A'..=b'F' => ch - b'A' + 10,
        _ => 0,
    }
}
