//! Recursive-descent parser producing the [`crate::ast`] tree.
//!
//! Statements live here; expressions, including precedence climbing and
//! numeral conversion, live in [`expr`].

mod expr;

use crate::ast::{Block, Exp, FuncDef, Stat, StatKind};
use crate::error::{CompileError, SyntaxError};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};

pub use expr::parse_number;

/// Parser over a single chunk. Consumed by [`Parser::parse`].
pub struct Parser<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Parser {
            lexer: Lexer::new(source),
        }
    }

    /// Parse the whole chunk; anything after the top-level block is an error.
    pub fn parse(mut self) -> Result<Block, CompileError> {
        let block = self.parse_block()?;
        self.lexer.next_token_of_kind(TokenKind::Eof)?;
        Ok(block)
    }

    // ---- Token helpers ----

    fn peek(&mut self) -> Result<TokenKind, CompileError> {
        Ok(self.lexer.peek_kind()?)
    }

    fn peek_line(&mut self) -> Result<u32, CompileError> {
        Ok(self.lexer.look_ahead()?.line)
    }

    fn advance(&mut self) -> Result<Token, CompileError> {
        Ok(self.lexer.next_token()?)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, CompileError> {
        self.lexer.next_token_of_kind(kind)
    }

    fn expect_name(&mut self) -> Result<String, CompileError> {
        Ok(self.expect(TokenKind::Identifier)?.into_text())
    }

    fn test_next(&mut self, kind: TokenKind) -> Result<bool, CompileError> {
        Ok(self.lexer.test_next(kind)?)
    }

    /// Syntax error at the lookahead token.
    fn error_here(&mut self, message: impl Into<String>) -> CompileError {
        match self.lexer.look_ahead() {
            Ok(token) => SyntaxError {
                line: token.line,
                near: token.to_string(),
                message: message.into(),
            }
            .into(),
            Err(e) => e.into(),
        }
    }

    /// Expect the closer of a construct opened on `line`.
    fn expect_match(&mut self, what: TokenKind, who: TokenKind, line: u32) -> Result<(), CompileError> {
        if self.test_next(what)? {
            return Ok(());
        }
        let current = self.peek_line()?;
        let message = if current == line {
            format!("'{what}' expected")
        } else {
            format!("'{what}' expected (to close '{who}' at line {line})")
        };
        Err(self.error_here(message))
    }

    // ---- Blocks ----

    pub(crate) fn parse_block(&mut self) -> Result<Block, CompileError> {
        let mut stats = Vec::new();
        loop {
            match self.peek()? {
                TokenKind::Return => {
                    stats.push(self.parse_return()?);
                    break;
                }
                kind if is_block_end(kind) => break,
                _ => stats.push(self.parse_stat()?),
            }
        }
        Ok(Block { stats })
    }

    // retstat ::= return [explist] [';']
    fn parse_return(&mut self) -> Result<Stat, CompileError> {
        let line = self.expect(TokenKind::Return)?.line;
        let exps = match self.peek()? {
            kind if is_block_end(kind) => Vec::new(),
            TokenKind::Semi => Vec::new(),
            _ => self.parse_exp_list()?,
        };
        self.test_next(TokenKind::Semi)?;
        Ok(Stat {
            kind: StatKind::Return(exps),
            line,
        })
    }

    // ---- Statements ----

    fn parse_stat(&mut self) -> Result<Stat, CompileError> {
        let line = self.peek_line()?;
        let kind = match self.peek()? {
            TokenKind::Semi => {
                self.advance()?;
                StatKind::Empty
            }
            TokenKind::Break => {
                self.advance()?;
                StatKind::Break
            }
            TokenKind::DoubleColon => {
                self.advance()?;
                let name = self.expect_name()?;
                self.expect(TokenKind::DoubleColon)?;
                StatKind::Label(name)
            }
            TokenKind::Goto => {
                self.advance()?;
                StatKind::Goto(self.expect_name()?)
            }
            TokenKind::Do => {
                self.advance()?;
                let body = self.parse_block()?;
                self.expect_match(TokenKind::End, TokenKind::Do, line)?;
                StatKind::Do(body)
            }
            TokenKind::While => self.parse_while(line)?,
            TokenKind::Repeat => self.parse_repeat(line)?,
            TokenKind::If => self.parse_if(line)?,
            TokenKind::For => self.parse_for(line)?,
            TokenKind::Function => self.parse_function_stat(line)?,
            TokenKind::Local => self.parse_local()?,
            _ => self.parse_assign_or_call()?,
        };
        Ok(Stat { kind, line })
    }

    // while exp do block end
    fn parse_while(&mut self, line: u32) -> Result<StatKind, CompileError> {
        self.expect(TokenKind::While)?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::Do)?;
        let body = self.parse_block()?;
        self.expect_match(TokenKind::End, TokenKind::While, line)?;
        Ok(StatKind::While { cond, body })
    }

    // repeat block until exp
    fn parse_repeat(&mut self, line: u32) -> Result<StatKind, CompileError> {
        self.expect(TokenKind::Repeat)?;
        let body = self.parse_block()?;
        self.expect_match(TokenKind::Until, TokenKind::Repeat, line)?;
        let cond = self.parse_expression()?;
        Ok(StatKind::Repeat { body, cond })
    }

    // if exp then block {elseif exp then block} [else block] end
    fn parse_if(&mut self, line: u32) -> Result<StatKind, CompileError> {
        let mut conds = Vec::new();
        let mut blocks = Vec::new();

        self.expect(TokenKind::If)?;
        conds.push(self.parse_expression()?);
        self.expect(TokenKind::Then)?;
        blocks.push(self.parse_block()?);

        while self.test_next(TokenKind::ElseIf)? {
            conds.push(self.parse_expression()?);
            self.expect(TokenKind::Then)?;
            blocks.push(self.parse_block()?);
        }

        if self.test_next(TokenKind::Else)? {
            conds.push(Exp::Bool(true));
            blocks.push(self.parse_block()?);
        }

        self.expect_match(TokenKind::End, TokenKind::If, line)?;
        Ok(StatKind::If { conds, blocks })
    }

    fn parse_for(&mut self, line: u32) -> Result<StatKind, CompileError> {
        self.expect(TokenKind::For)?;
        let first = self.expect_name()?;
        if self.test_next(TokenKind::Assign)? {
            self.parse_numeric_for(first, line)
        } else {
            self.parse_generic_for(first, line)
        }
    }

    // for Name '=' exp ',' exp [',' exp] do block end
    fn parse_numeric_for(&mut self, var: String, line: u32) -> Result<StatKind, CompileError> {
        let init = self.parse_expression()?;
        self.expect(TokenKind::Comma)?;
        let limit = self.parse_expression()?;
        let step = if self.test_next(TokenKind::Comma)? {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(TokenKind::Do)?;
        let body = self.parse_block()?;
        self.expect_match(TokenKind::End, TokenKind::For, line)?;
        Ok(StatKind::NumericFor {
            var,
            init,
            limit,
            step,
            body,
        })
    }

    // for namelist in explist do block end
    fn parse_generic_for(&mut self, first: String, line: u32) -> Result<StatKind, CompileError> {
        let mut names = vec![first];
        while self.test_next(TokenKind::Comma)? {
            names.push(self.expect_name()?);
        }
        self.expect(TokenKind::In)?;
        let exps = self.parse_exp_list()?;
        self.expect(TokenKind::Do)?;
        let body = self.parse_block()?;
        self.expect_match(TokenKind::End, TokenKind::For, line)?;
        Ok(StatKind::GenericFor { names, exps, body })
    }

    // function funcname funcbody
    // funcname ::= Name {'.' Name} [':' Name]
    fn parse_function_stat(&mut self, line: u32) -> Result<StatKind, CompileError> {
        self.expect(TokenKind::Function)?;
        let mut target = Exp::Name(self.expect_name()?);
        while self.test_next(TokenKind::Dot)? {
            let key = self.expect_name()?;
            target = Exp::index(target, Exp::String(key));
        }
        let is_method = self.test_next(TokenKind::Colon)?;
        if is_method {
            let key = self.expect_name()?;
            target = Exp::index(target, Exp::String(key));
        }

        let mut func = self.parse_func_body(line)?;
        if is_method {
            func.params.insert(0, "self".to_string());
        }
        Ok(StatKind::Assign {
            targets: vec![target],
            values: vec![Exp::Function(func)],
        })
    }

    // local function Name funcbody | local namelist ['=' explist]
    fn parse_local(&mut self) -> Result<StatKind, CompileError> {
        let line = self.expect(TokenKind::Local)?.line;
        if self.test_next(TokenKind::Function)? {
            let name = self.expect_name()?;
            let func = self.parse_func_body(line)?;
            return Ok(StatKind::LocalFunction { name, func });
        }

        let mut names = vec![self.expect_name()?];
        while self.test_next(TokenKind::Comma)? {
            names.push(self.expect_name()?);
        }
        let exps = if self.test_next(TokenKind::Assign)? {
            self.parse_exp_list()?
        } else {
            Vec::new()
        };
        Ok(StatKind::LocalDecl { names, exps })
    }

    // varlist '=' explist | functioncall
    fn parse_assign_or_call(&mut self) -> Result<StatKind, CompileError> {
        let first = self.parse_prefix_exp()?;
        match self.peek()? {
            TokenKind::Assign | TokenKind::Comma => {}
            _ => {
                return match first {
                    Exp::Call(call) => Ok(StatKind::Call(call)),
                    _ => Err(self.error_here("syntax error")),
                };
            }
        }

        let mut targets = vec![first];
        while self.test_next(TokenKind::Comma)? {
            targets.push(self.parse_prefix_exp()?);
        }
        if !targets.iter().all(Exp::is_var) {
            return Err(self.error_here("syntax error"));
        }
        self.expect(TokenKind::Assign)?;
        let values = self.parse_exp_list()?;
        Ok(StatKind::Assign { targets, values })
    }

    // funcbody ::= '(' [parlist] ')' block end
    // parlist ::= namelist [',' '...'] | '...'
    pub(crate) fn parse_func_body(&mut self, line: u32) -> Result<FuncDef, CompileError> {
        self.expect(TokenKind::LParen)?;
        let mut params = Vec::new();
        let mut is_vararg = false;
        if self.peek()? != TokenKind::RParen {
            loop {
                match self.peek()? {
                    TokenKind::Identifier => params.push(self.expect_name()?),
                    TokenKind::Vararg => {
                        self.advance()?;
                        is_vararg = true;
                        break;
                    }
                    _ => return Err(self.error_here("<name> expected")),
                }
                if !self.test_next(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;
        let body = self.parse_block()?;
        self.expect_match(TokenKind::End, TokenKind::Function, line)?;
        Ok(FuncDef {
            params,
            is_vararg,
            body,
        })
    }
}

fn is_block_end(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Return
            | TokenKind::Eof
            | TokenKind::End
            | TokenKind::Else
            | TokenKind::ElseIf
            | TokenKind::Until
    )
}
