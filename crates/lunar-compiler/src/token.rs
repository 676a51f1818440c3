use std::fmt;

/// Every token kind of the Lua 5.3 grammar.
///
/// `-` and `~` have a single kind each; the parser decides between the
/// unary and binary reading from context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,

    // --- Separators ---
    Semi,        // ;
    Comma,       // ,
    Dot,         // .
    Colon,       // :
    DoubleColon, // ::
    LParen,      // (
    RParen,      // )
    LBracket,    // [
    RBracket,    // ]
    LBrace,      // {
    RBrace,      // }
    Vararg,      // ...

    // --- Operators ---
    Assign,     // =
    Minus,      // - (sub or unm)
    Tilde,      // ~ (bxor or bnot)
    Plus,       // +
    Star,       // *
    Slash,      // /
    FloorDiv,   // //
    Caret,      // ^
    Percent,    // %
    Ampersand,  // &
    Pipe,       // |
    ShiftRight, // >>
    ShiftLeft,  // <<
    DotDot,     // ..
    Less,       // <
    LessEq,     // <=
    Greater,    // >
    GreaterEq,  // >=
    Equal,      // ==
    NotEqual,   // ~=
    Hash,       // #
    And,
    Or,
    Not,

    // --- Keywords ---
    Break,
    Do,
    Else,
    ElseIf,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    // --- Literals ---
    Identifier,
    Number,
    String,
}

impl TokenKind {
    /// Re-classify a scanned identifier as a keyword.
    pub fn keyword_from_str(s: &str) -> Option<TokenKind> {
        match s {
            "and" => Some(TokenKind::And),
            "break" => Some(TokenKind::Break),
            "do" => Some(TokenKind::Do),
            "else" => Some(TokenKind::Else),
            "elseif" => Some(TokenKind::ElseIf),
            "end" => Some(TokenKind::End),
            "false" => Some(TokenKind::False),
            "for" => Some(TokenKind::For),
            "function" => Some(TokenKind::Function),
            "goto" => Some(TokenKind::Goto),
            "if" => Some(TokenKind::If),
            "in" => Some(TokenKind::In),
            "local" => Some(TokenKind::Local),
            "nil" => Some(TokenKind::Nil),
            "not" => Some(TokenKind::Not),
            "or" => Some(TokenKind::Or),
            "repeat" => Some(TokenKind::Repeat),
            "return" => Some(TokenKind::Return),
            "then" => Some(TokenKind::Then),
            "true" => Some(TokenKind::True),
            "until" => Some(TokenKind::Until),
            "while" => Some(TokenKind::While),
            _ => None,
        }
    }

    /// Fixed spelling of the kind; literals and EOF get a placeholder.
    pub fn as_str(&self) -> &'static str {
        use TokenKind::*;
        match self {
            Eof => "<eof>",
            Semi => ";",
            Comma => ",",
            Dot => ".",
            Colon => ":",
            DoubleColon => "::",
            LParen => "(",
            RParen => ")",
            LBracket => "[",
            RBracket => "]",
            LBrace => "{",
            RBrace => "}",
            Vararg => "...",
            Assign => "=",
            Minus => "-",
            Tilde => "~",
            Plus => "+",
            Star => "*",
            Slash => "/",
            FloorDiv => "//",
            Caret => "^",
            Percent => "%",
            Ampersand => "&",
            Pipe => "|",
            ShiftRight => ">>",
            ShiftLeft => "<<",
            DotDot => "..",
            Less => "<",
            LessEq => "<=",
            Greater => ">",
            GreaterEq => ">=",
            Equal => "==",
            NotEqual => "~=",
            Hash => "#",
            And => "and",
            Or => "or",
            Not => "not",
            Break => "break",
            Do => "do",
            Else => "else",
            ElseIf => "elseif",
            End => "end",
            False => "false",
            For => "for",
            Function => "function",
            Goto => "goto",
            If => "if",
            In => "in",
            Local => "local",
            Nil => "nil",
            Repeat => "repeat",
            Return => "return",
            Then => "then",
            True => "true",
            Until => "until",
            While => "while",
            Identifier => "<name>",
            Number => "<number>",
            String => "<string>",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scanned token.
///
/// `text` is the spelling for symbols and keywords, the name for
/// identifiers, the raw literal for numbers and the decoded contents for
/// strings. It is `None` only for [`TokenKind::Eof`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Line the token starts on.
    pub line: u32,
    pub text: Option<String>,
}

impl Token {
    pub fn new(kind: TokenKind, line: u32, text: impl Into<String>) -> Self {
        Token {
            kind,
            line,
            text: Some(text.into()),
        }
    }

    pub fn eof(line: u32) -> Self {
        Token {
            kind: TokenKind::Eof,
            line,
            text: None,
        }
    }

    /// Token text, or the empty string at end of input.
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Consume the token, keeping only its text.
    pub fn into_text(self) -> String {
        self.text.unwrap_or_default()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.text {
            Some(text) => f.write_str(text),
            None => f.write_str(self.kind.as_str()),
        }
    }
}
