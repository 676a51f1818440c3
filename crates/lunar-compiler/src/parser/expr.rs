use super::Parser;
use crate::ast::{BinOp, Exp, FuncCall, TableConstructor, UnOp, UNARY_PRIORITY};
use crate::error::{CompileError, LexError};
use crate::token::TokenKind;

impl<'a> Parser<'a> {
    pub(crate) fn parse_expression(&mut self) -> Result<Exp, CompileError> {
        self.parse_exp(0)
    }

    // explist ::= exp {',' exp}
    pub(crate) fn parse_exp_list(&mut self) -> Result<Vec<Exp>, CompileError> {
        let mut exps = vec![self.parse_expression()?];
        while self.test_next(TokenKind::Comma)? {
            exps.push(self.parse_expression()?);
        }
        Ok(exps)
    }

    // exp ::= (simpleexp | unop exp) {binop exp}
    //
    // Binary operators are consumed while their left power exceeds `limit`;
    // each right operand is parsed with the operator's right power as limit.
    fn parse_exp(&mut self, limit: u8) -> Result<Exp, CompileError> {
        let mut lhs = match UnOp::from_token(self.peek()?) {
            Some(op) => {
                self.advance()?;
                Exp::unop(op, self.parse_exp(UNARY_PRIORITY)?)
            }
            None => self.parse_simple_exp()?,
        };

        while let Some(op) = BinOp::from_token(self.peek()?) {
            let (left, right) = op.priority();
            if left <= limit {
                break;
            }
            self.advance()?;
            let rhs = self.parse_exp(right)?;
            lhs = Exp::binop(op, lhs, rhs);
        }
        Ok(lhs)
    }

    // simpleexp ::= nil | false | true | Numeral | LiteralString | '...' |
    //               functiondef | prefixexp | tableconstructor
    fn parse_simple_exp(&mut self) -> Result<Exp, CompileError> {
        let exp = match self.peek()? {
            TokenKind::Nil => Exp::Nil,
            TokenKind::True => Exp::Bool(true),
            TokenKind::False => Exp::Bool(false),
            TokenKind::Vararg => Exp::Vararg,
            TokenKind::Number => {
                let token = self.advance()?;
                return parse_number(token.text()).ok_or_else(|| {
                    LexError::MalformedNumber {
                        near: token.text().to_string(),
                        line: token.line,
                    }
                    .into()
                });
            }
            TokenKind::String => return Ok(Exp::String(self.advance()?.into_text())),
            TokenKind::LBrace => return self.parse_table_constructor().map(Exp::Table),
            TokenKind::Function => {
                let line = self.advance()?.line;
                return self.parse_func_body(line).map(Exp::Function);
            }
            _ => return self.parse_prefix_exp(),
        };
        self.advance()?;
        Ok(exp)
    }

    // prefixexp ::= (Name | '(' exp ')') { '.' Name | '[' exp ']' | ':' Name args | args }
    pub(crate) fn parse_prefix_exp(&mut self) -> Result<Exp, CompileError> {
        let mut exp = match self.peek()? {
            TokenKind::Identifier => Exp::Name(self.expect_name()?),
            TokenKind::LParen => {
                let line = self.advance()?.line;
                let inner = self.parse_expression()?;
                self.expect_match(TokenKind::RParen, TokenKind::LParen, line)?;
                Exp::Paren(Box::new(inner))
            }
            _ => return Err(self.error_here("unexpected symbol")),
        };

        loop {
            match self.peek()? {
                TokenKind::Dot => {
                    self.advance()?;
                    let key = self.expect_name()?;
                    exp = Exp::index(exp, Exp::String(key));
                }
                TokenKind::LBracket => {
                    self.advance()?;
                    let key = self.parse_expression()?;
                    self.expect(TokenKind::RBracket)?;
                    exp = Exp::index(exp, key);
                }
                TokenKind::Colon => {
                    self.advance()?;
                    let method = self.expect_name()?;
                    let mut args = self.parse_args()?;
                    args.insert(0, exp.clone());
                    exp = Exp::Call(FuncCall {
                        callee: Box::new(Exp::index(exp, Exp::String(method))),
                        args,
                        method: true,
                    });
                }
                TokenKind::LParen | TokenKind::String | TokenKind::LBrace => {
                    let args = self.parse_args()?;
                    exp = Exp::Call(FuncCall {
                        callee: Box::new(exp),
                        args,
                        method: false,
                    });
                }
                _ => return Ok(exp),
            }
        }
    }

    // args ::= '(' [explist] ')' | tableconstructor | LiteralString
    fn parse_args(&mut self) -> Result<Vec<Exp>, CompileError> {
        match self.peek()? {
            TokenKind::LParen => {
                let line = self.advance()?.line;
                let args = if self.peek()? == TokenKind::RParen {
                    Vec::new()
                } else {
                    self.parse_exp_list()?
                };
                self.expect_match(TokenKind::RParen, TokenKind::LParen, line)?;
                Ok(args)
            }
            TokenKind::LBrace => Ok(vec![Exp::Table(self.parse_table_constructor()?)]),
            TokenKind::String => Ok(vec![Exp::String(self.advance()?.into_text())]),
            _ => Err(self.error_here("function arguments expected")),
        }
    }

    // tableconstructor ::= '{' [field {fieldsep field} [fieldsep]] '}'
    // field ::= '[' exp ']' '=' exp | Name '=' exp | exp
    fn parse_table_constructor(&mut self) -> Result<TableConstructor, CompileError> {
        let line = self.expect(TokenKind::LBrace)?.line;
        let mut table = TableConstructor::default();

        while self.peek()? != TokenKind::RBrace {
            let (key, value) = self.parse_field()?;
            table.keys.push(key);
            table.values.push(value);
            if !self.test_next(TokenKind::Comma)? && !self.test_next(TokenKind::Semi)? {
                break;
            }
        }

        self.expect_match(TokenKind::RBrace, TokenKind::LBrace, line)?;
        Ok(table)
    }

    fn parse_field(&mut self) -> Result<(Option<Exp>, Exp), CompileError> {
        if self.test_next(TokenKind::LBracket)? {
            let key = self.parse_expression()?;
            self.expect(TokenKind::RBracket)?;
            self.expect(TokenKind::Assign)?;
            return Ok((Some(key), self.parse_expression()?));
        }

        let value = self.parse_expression()?;
        // `Name = exp` parses as a name first; an `=` turns it into a key
        if let Exp::Name(name) = &value {
            if self.test_next(TokenKind::Assign)? {
                let key = Exp::String(name.clone());
                return Ok((Some(key), self.parse_expression()?));
            }
        }
        Ok((None, value))
    }
}

/// Convert a numeral to an integer or float constant.
///
/// A numeral is a float when it has a fraction, or an exponent (`e` for
/// decimal, `p` for hex). Hex integers wrap modulo 2^64; decimal integers
/// that overflow `i64` become floats.
pub fn parse_number(text: &str) -> Option<Exp> {
    let hex_digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"));

    if let Some(digits) = hex_digits {
        if digits.contains(['.', 'p', 'P']) {
            return parse_hex_float(digits).map(Exp::Float);
        }
        if digits.is_empty() {
            return None;
        }
        let mut value: u64 = 0;
        for ch in digits.bytes() {
            value = value.wrapping_mul(16).wrapping_add(u64::from(hex_digit(ch)?));
        }
        return Some(Exp::Integer(value as i64));
    }

    if text.contains(['.', 'e', 'E']) {
        return text.parse::<f64>().ok().map(Exp::Float);
    }
    match text.parse::<i64>() {
        Ok(i) => Some(Exp::Integer(i)),
        Err(_) => text.parse::<f64>().ok().map(Exp::Float),
    }
}

/// Hex float mantissa and binary exponent, without the `0x` prefix.
fn parse_hex_float(text: &str) -> Option<f64> {
    let (mantissa, exponent) = match text.find(['p', 'P']) {
        Some(p) => (&text[..p], parse_binary_exponent(&text[p + 1..])?),
        None => (text, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }

    let mut value = 0.0f64;
    for ch in int_part.bytes() {
        value = value * 16.0 + f64::from(hex_digit(ch)?);
    }
    let mut place = 1.0 / 16.0;
    for ch in frac_part.bytes() {
        value += f64::from(hex_digit(ch)?) * place;
        place /= 16.0;
    }
    Some(scale_by_pow2(value, exponent))
}

/// Exponents past the f64 range saturate; any of them already yields inf or 0.
const MAX_BINARY_EXPONENT: i64 = 100_000;

fn parse_binary_exponent(text: &str) -> Option<i64> {
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty() {
        return None;
    }
    let mut exponent = 0i64;
    for ch in digits.bytes() {
        let digit = (ch as char).to_digit(10)?;
        exponent = (exponent * 10 + i64::from(digit)).min(MAX_BINARY_EXPONENT);
    }
    Some(if negative { -exponent } else { exponent })
}

/// `value * 2^exponent`, stepping so intermediate powers stay representable.
fn scale_by_pow2(mut value: f64, mut exponent: i64) -> f64 {
    const STEP: i64 = 1000;
    while exponent > STEP && value != 0.0 && value.is_finite() {
        value *= 2f64.powi(STEP as i32);
        exponent -= STEP;
    }
    while exponent < -STEP && value != 0.0 {
        value *= 2f64.powi(-STEP as i32);
        exponent += STEP;
    }
    let exponent = exponent.clamp(-STEP, STEP) as i32;
    value * 2f64.powi(exponent)
}

fn hex_digit(ch: u8) -> Option<u8> {
    (ch as char).to_digit(16).map(|d| d as u8)
}
