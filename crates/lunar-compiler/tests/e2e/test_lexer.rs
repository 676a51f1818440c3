use lunar_compiler::lexer::{tokenize, Lexer};
use lunar_compiler::token::TokenKind;
use lunar_compiler::LexError;

fn kinds(source: &str) -> Vec<TokenKind> {
    tokenize(source).unwrap().iter().map(|t| t.kind).collect()
}

#[test]
fn e2e_tokenize_statement() {
    assert_eq!(
        kinds("local x = 1 + y"),
        vec![
            TokenKind::Local,
            TokenKind::Identifier,
            TokenKind::Assign,
            TokenKind::Number,
            TokenKind::Plus,
            TokenKind::Identifier
        ]
    );
}

#[test]
fn e2e_tokenize_longest_match_symbols() {
    assert_eq!(
        kinds("... .. . // / :: : == = ~= ~ <= << < >= >> >"),
        vec![
            TokenKind::Vararg,
            TokenKind::DotDot,
            TokenKind::Dot,
            TokenKind::FloorDiv,
            TokenKind::Slash,
            TokenKind::DoubleColon,
            TokenKind::Colon,
            TokenKind::Equal,
            TokenKind::Assign,
            TokenKind::NotEqual,
            TokenKind::Tilde,
            TokenKind::LessEq,
            TokenKind::ShiftLeft,
            TokenKind::Less,
            TokenKind::GreaterEq,
            TokenKind::ShiftRight,
            TokenKind::Greater
        ]
    );
}

#[test]
fn e2e_tokenize_keywords_are_reclassified() {
    assert_eq!(
        kinds("while whilst end ending"),
        vec![
            TokenKind::While,
            TokenKind::Identifier,
            TokenKind::End,
            TokenKind::Identifier
        ]
    );
}

#[test]
fn e2e_tokenize_skips_comments() {
    let src = "-- line comment\nx --[==[ long\ncomment ]==] y";
    let tokens = tokenize(src).unwrap();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0].line, 2);
    assert_eq!(tokens[1].line, 3);
}

#[test]
fn e2e_tokenize_string_escapes() {
    let tokens = tokenize(r#""a\tb\65\x41\u{48}\z
        c""#)
    .unwrap();
    assert_eq!(tokens[0].kind, TokenKind::String);
    assert_eq!(tokens[0].text(), "a\tbAAHc");
}

#[test]
fn e2e_tokenize_long_string_skips_first_newline() {
    let tokens = tokenize("[[\nfirst\nsecond]]").unwrap();
    assert_eq!(tokens[0].text(), "first\nsecond");
}

#[test]
fn e2e_line_counting_crlf() {
    let tokens = tokenize("a\r\nb\n\rc\rd").unwrap();
    let lines: Vec<u32> = tokens.iter().map(|t| t.line).collect();
    assert_eq!(lines, vec![1, 2, 3, 4]);
}

#[test]
fn e2e_lookahead_does_not_consume() {
    let mut lexer = Lexer::new("a b");
    assert_eq!(lexer.look_ahead().unwrap().text(), "a");
    assert_eq!(lexer.peek_kind().unwrap(), TokenKind::Identifier);
    assert_eq!(lexer.next_token().unwrap().text(), "a");
    assert_eq!(lexer.next_token().unwrap().text(), "b");
    assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Eof);
    assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Eof);
}

#[test]
fn e2e_lexer_errors() {
    assert!(matches!(
        tokenize("x = 'abc"),
        Err(LexError::UnterminatedString { line: 1, .. })
    ));
    assert!(matches!(
        tokenize("0x"),
        Err(LexError::MalformedNumber { .. })
    ));
    assert!(matches!(
        tokenize("'\\xZZ'"),
        Err(LexError::InvalidEscape { .. })
    ));
    assert!(matches!(
        tokenize("a\n$"),
        Err(LexError::UnexpectedChar { line: 2, .. })
    ));
}
