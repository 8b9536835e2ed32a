//! qbscript Parser
//!
//! Recursive descent parser for qbscript. Blocks are introduced by `:` and
//! either continue on the same line (`if x: y = 1`) or as an indented suite.
//! There is no error recovery: the first problem aborts the parse.

use crate::error::{Result, ScriptError};
use crate::lang::ast::*;
use crate::lang::lexer::{tokenize, Token, TokenKind};
use std::sync::Arc;

/// Deepest nesting of expressions and blocks a script may use
pub const MAX_NESTING: usize = 64;

/// Tokenize and parse a script in one step
pub fn parse_source(source: &str) -> Result<Program> {
    Parser::new(tokenize(source)).parse()
}

/// qbscript parser
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    depth: usize,
}

impl Parser {
    /// Create a new parser over a token stream
    pub fn new(mut tokens: Vec<Token>) -> Self {
        let needs_eof = tokens.last().map_or(true, |t| t.kind != TokenKind::Eof);
        if needs_eof {
            let (line, column) = tokens.last().map_or((1, 1), |t| (t.line, t.column));
            tokens.push(Token {
                kind: TokenKind::Eof,
                text: String::new(),
                line,
                column,
            });
        }
        Self {
            tokens,
            current: 0,
            depth: 0,
        }
    }

    /// Parse a whole program
    pub fn parse(&mut self) -> Result<Program> {
        if let Some(bad) = self.tokens.iter().find(|t| matches!(t.kind, TokenKind::Error(_))) {
            if let TokenKind::Error(message) = &bad.kind {
                return Err(ScriptError::parse(message.clone(), bad.line, bad.column));
            }
        }

        let mut statements = Vec::new();

        loop {
            self.skip_separators();
            if self.check(&TokenKind::Eof) {
                break;
            }
            if self.check(&TokenKind::Indent) {
                return Err(self.error("Unexpected indentation"));
            }
            statements.push(self.statement()?);
        }

        Ok(Program::new(statements))
    }

    /// Parse a statement
    fn statement(&mut self) -> Result<Stmt> {
        match self.peek_kind() {
            TokenKind::If => self.if_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Return => {
                let stmt = self.return_statement()?;
                self.end_simple_statement()?;
                Ok(stmt)
            }
            TokenKind::Identifier(_) if self.at_function_header() => self.function_declaration(),
            _ => {
                let stmt = self.simple_statement()?;
                self.end_simple_statement()?;
                Ok(stmt)
            }
        }
    }

    /// Parse a function declaration: `name(a, b):` followed by a block
    fn function_declaration(&mut self) -> Result<Stmt> {
        let line = self.peek().line;
        let name = self.identifier("Expected function name")?;

        self.consume(&TokenKind::LParen, "Expected '(' after function name")?;
        let mut params = Vec::new();

        if !self.check(&TokenKind::RParen) {
            loop {
                let param = self.identifier("Expected parameter name")?;
                if params.contains(&param) {
                    return Err(self.error(&format!("Duplicate parameter '{}'", param)));
                }
                params.push(param);

                if !self.match_token(&TokenKind::Comma) || self.check(&TokenKind::RParen) {
                    break;
                }
            }
        }

        self.consume(&TokenKind::RParen, "Expected ')' after parameters")?;
        let body = self.block()?;

        Ok(Stmt::new(
            StmtKind::Function(Arc::new(Function {
                name,
                params,
                body,
                line,
            })),
            line,
        ))
    }

    /// Parse an if / else if / else chain
    fn if_statement(&mut self) -> Result<Stmt> {
        let line = self.peek().line;
        self.consume(&TokenKind::If, "Expected 'if'")?;

        let mut branches = Vec::new();
        let condition = self.expression()?;
        let body = self.block()?;
        branches.push(ConditionalBranch { condition, body });

        let mut else_body = None;
        while self.check(&TokenKind::Else) {
            self.advance();
            if self.match_token(&TokenKind::If) {
                let condition = self.expression()?;
                let body = self.block()?;
                branches.push(ConditionalBranch { condition, body });
            } else {
                else_body = Some(self.block()?);
                break;
            }
        }

        Ok(Stmt::new(StmtKind::If { branches, else_body }, line))
    }

    /// Parse a `for name in iterable:` loop
    fn for_statement(&mut self) -> Result<Stmt> {
        let line = self.peek().line;
        self.consume(&TokenKind::For, "Expected 'for'")?;

        let var = self.identifier("Expected loop variable after 'for'")?;
        self.consume(&TokenKind::In, "Expected 'in' after loop variable")?;
        let iterable = self.expression()?;
        let body = self.block()?;

        Ok(Stmt::new(StmtKind::For { var, iterable, body }, line))
    }

    /// Parse a return statement
    fn return_statement(&mut self) -> Result<Stmt> {
        let line = self.peek().line;
        self.consume(&TokenKind::Return, "Expected 'return'")?;

        let value = if self.at_statement_end() {
            None
        } else {
            Some(self.expression()?)
        };

        Ok(Stmt::new(StmtKind::Return(value), line))
    }

    /// Parse `:` followed by an indented suite or a same-line statement list
    fn block(&mut self) -> Result<Vec<Stmt>> {
        self.nested(Self::suite)
    }

    fn suite(&mut self) -> Result<Vec<Stmt>> {
        self.consume(&TokenKind::Colon, "Expected ':' before block")?;

        if self.match_token(&TokenKind::Newline) {
            if !self.match_token(&TokenKind::Indent) {
                return Err(self.error("Expected an indented block"));
            }

            let mut statements = Vec::new();
            loop {
                self.skip_separators();
                if self.match_token(&TokenKind::Dedent) {
                    break;
                }
                if self.check(&TokenKind::Eof) {
                    return Err(self.error("Unterminated block"));
                }
                statements.push(self.statement()?);
            }
            return Ok(statements);
        }

        // Inline suite: simple statements separated by ';' up to end of line
        let mut statements = Vec::new();
        loop {
            let stmt = if self.check(&TokenKind::Return) {
                self.return_statement()?
            } else {
                self.simple_statement()?
            };
            statements.push(stmt);

            if self.match_token(&TokenKind::Semicolon) && !self.at_statement_end() {
                continue;
            }
            break;
        }
        self.end_simple_statement()?;

        Ok(statements)
    }

    /// Parse an expression or assignment statement
    fn simple_statement(&mut self) -> Result<Stmt> {
        let line = self.peek().line;
        let expr = self.expression()?;

        let op = if self.check(&TokenKind::Assign) {
            None
        } else if let Some(op) = BinaryOp::from_compound_assign(self.peek_kind()) {
            Some(op)
        } else {
            return Ok(Stmt::new(StmtKind::Expr(expr), line));
        };

        let target = match expr {
            Expr::Variable(name) => AssignTarget::Variable(name),
            Expr::Index { object, index } => AssignTarget::Index {
                object: *object,
                index: *index,
            },
            _ => return Err(self.error("Invalid assignment target")),
        };
        self.advance();

        let value = self.expression()?;
        Ok(Stmt::new(StmtKind::Assign { target, op, value }, line))
    }

    /// Require a statement terminator after a simple statement
    fn end_simple_statement(&mut self) -> Result<()> {
        match self.peek_kind() {
            TokenKind::Newline | TokenKind::Semicolon => {
                self.advance();
                Ok(())
            }
            TokenKind::Eof | TokenKind::Dedent => Ok(()),
            _ => Err(self.error("Expected end of statement")),
        }
    }

    /// Parse an expression
    fn expression(&mut self) -> Result<Expr> {
        self.nested(Self::or)
    }

    /// Parse logical OR
    fn or(&mut self) -> Result<Expr> {
        let mut expr = self.and()?;

        while self.match_token(&TokenKind::Or) {
            let right = self.and()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                op: LogicalOp::Or,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    /// Parse logical AND
    fn and(&mut self) -> Result<Expr> {
        let mut expr = self.comparison()?;

        while self.match_token(&TokenKind::And) {
            let right = self.comparison()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                op: LogicalOp::And,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    /// Parse comparison and equality
    fn comparison(&mut self) -> Result<Expr> {
        let mut expr = self.term()?;

        while let Some(op) = self.match_binary(&[
            BinaryOp::Equal,
            BinaryOp::NotEqual,
            BinaryOp::Greater,
            BinaryOp::GreaterEqual,
            BinaryOp::Less,
            BinaryOp::LessEqual,
        ]) {
            let right = self.term()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    /// Parse term
    fn term(&mut self) -> Result<Expr> {
        let mut expr = self.factor()?;

        while let Some(op) = self.match_binary(&[BinaryOp::Add, BinaryOp::Sub]) {
            let right = self.factor()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    /// Parse factor
    fn factor(&mut self) -> Result<Expr> {
        let mut expr = self.unary()?;

        while let Some(op) = self.match_binary(&[
            BinaryOp::Mul,
            BinaryOp::Div,
            BinaryOp::FloorDiv,
            BinaryOp::Mod,
        ]) {
            let right = self.unary()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }

        Ok(expr)
    }

    /// Parse unary expression
    fn unary(&mut self) -> Result<Expr> {
        let op = match self.peek_kind() {
            TokenKind::Minus => Some(UnaryOp::Negate),
            TokenKind::Not => Some(UnaryOp::Not),
            _ => None,
        };

        if let Some(op) = op {
            self.advance();
            let operand = self.nested(Self::unary)?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }

        self.power()
    }

    /// Parse exponentiation (right-associative, tighter than unary)
    fn power(&mut self) -> Result<Expr> {
        let base = self.call()?;

        if self.match_token(&TokenKind::StarStar) {
            let exponent = self.nested(Self::unary)?;
            return Ok(Expr::Binary {
                left: Box::new(base),
                op: BinaryOp::Pow,
                right: Box::new(exponent),
            });
        }

        Ok(base)
    }

    /// Parse function call, index or member access
    fn call(&mut self) -> Result<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.match_token(&TokenKind::LParen) {
                let args = self.expression_list(&TokenKind::RParen)?;
                self.consume(&TokenKind::RParen, "Expected ')' after arguments")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.match_token(&TokenKind::Dot) {
                let name = self.identifier("Expected property name after '.'")?;
                expr = Expr::GetProp {
                    object: Box::new(expr),
                    name,
                };
            } else if self.match_token(&TokenKind::LBracket) {
                let index = self.expression()?;
                self.consume(&TokenKind::RBracket, "Expected ']' after index")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Parse primary expression
    fn primary(&mut self) -> Result<Expr> {
        let kind = self.peek_kind().clone();

        match kind {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }

            TokenKind::String(s) => {
                self.advance();
                Ok(Expr::String(s))
            }

            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }

            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }

            TokenKind::Null => {
                self.advance();
                Ok(Expr::Null)
            }

            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Variable(name))
            }

            TokenKind::LParen => {
                self.advance();
                let expr = self.expression()?;
                self.consume(&TokenKind::RParen, "Expected ')' after expression")?;
                Ok(expr)
            }

            TokenKind::LBracket => {
                self.advance();
                let elems = self.expression_list(&TokenKind::RBracket)?;
                self.consume(&TokenKind::RBracket, "Expected ']' after array elements")?;
                Ok(Expr::Array(elems))
            }

            TokenKind::LBrace => {
                self.advance();
                let mut entries = Vec::new();

                while !self.check(&TokenKind::RBrace) {
                    let key = match self.peek_kind().clone() {
                        TokenKind::Identifier(key) | TokenKind::String(key) => {
                            self.advance();
                            key
                        }
                        _ => return Err(self.error("Expected map key")),
                    };
                    self.consume(&TokenKind::Colon, "Expected ':' after map key")?;
                    let value = self.expression()?;
                    entries.push((key, value));

                    if !self.match_token(&TokenKind::Comma) {
                        break;
                    }
                }

                self.consume(&TokenKind::RBrace, "Expected '}' after map entries")?;
                Ok(Expr::Map(entries))
            }

            _ => Err(self.error("Unexpected token")),
        }
    }

    /// Comma-separated expressions up to (not including) `close`;
    /// a trailing comma is allowed
    fn expression_list(&mut self, close: &TokenKind) -> Result<Vec<Expr>> {
        let mut items = Vec::new();

        while !self.check(close) {
            items.push(self.expression()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }

        Ok(items)
    }

    /// Whether the tokens at the cursor form `name(params):`
    fn at_function_header(&self) -> bool {
        if self.peek_kind_at(1) != Some(&TokenKind::LParen) {
            return false;
        }

        let mut depth = 0usize;
        for (offset, token) in self.tokens[self.current + 1..].iter().enumerate() {
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return self.peek_kind_at(offset + 2) == Some(&TokenKind::Colon);
                    }
                }
                TokenKind::Newline | TokenKind::Eof => return false,
                _ => {}
            }
        }

        false
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::Newline | TokenKind::Semicolon | TokenKind::Eof | TokenKind::Dedent
        )
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek_kind(), TokenKind::Newline | TokenKind::Semicolon) {
            self.advance();
        }
    }

    fn identifier(&mut self, message: &str) -> Result<String> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(message)),
        }
    }

    /// Match any of the given binary operators and advance
    fn match_binary(&mut self, ops: &[BinaryOp]) -> Option<BinaryOp> {
        let op = BinaryOp::from_token(self.peek_kind())?;
        if ops.contains(&op) {
            self.advance();
            Some(op)
        } else {
            None
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.current + offset).map(|t| &t.kind)
    }

    /// Check if current token matches
    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek_kind()) == std::mem::discriminant(kind)
    }

    /// Match token and advance
    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            return true;
        }
        false
    }

    /// Consume a specific token or error
    fn consume(&mut self, kind: &TokenKind, message: &str) -> Result<()> {
        if self.check(kind) {
            self.advance();
            return Ok(());
        }

        Err(self.error(message))
    }

    /// Advance to next token; `Eof` is never stepped past
    fn advance(&mut self) {
        if self.current + 1 < self.tokens.len() {
            self.current += 1;
        }
    }

    /// Run `parse` one nesting level deeper
    fn nested<T>(&mut self, parse: fn(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(&format!("Nesting deeper than {} levels", MAX_NESTING)));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn error(&self, message: &str) -> ScriptError {
        let token = self.peek();
        let found = match &token.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Indent => "indent".to_string(),
            TokenKind::Dedent => "dedent".to_string(),
            _ => format!("'{}'", token.text),
        };
        ScriptError::parse(format!("{}, found {}", message, found), token.line, token.column)
    }
}
