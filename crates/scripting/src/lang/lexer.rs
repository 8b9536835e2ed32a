//! qbscript Lexer and Tokenizer
//!
//! Lexical analysis for qbscript. Tokenizing never fails: characters the
//! lexer does not understand become [`TokenKind::Error`] tokens, which the
//! parser reports with their position.

use std::collections::VecDeque;
use std::iter::Peekable;
use std::str::Chars;

/// Columns a tab advances indentation by
const TAB_WIDTH: usize = 4;

/// qbscript token types
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Number(f64),
    String(String),
    Identifier(String),

    // Keywords
    If,
    Else,
    For,
    In,
    Return,
    And,
    Or,
    Not,
    True,
    False,
    Null,

    // Operators
    Plus,           // +
    Minus,          // -
    Star,           // *
    StarStar,       // **
    Slash,          // /
    SlashSlash,     // //
    Percent,        // %

    // Comparison
    Equal,          // ==
    NotEqual,       // !=
    Less,           // <
    Greater,        // >
    LessEqual,      // <=
    GreaterEqual,   // >=

    // Assignment
    Assign,         // =
    PlusEqual,      // +=
    MinusEqual,     // -=
    StarEqual,      // *=
    SlashEqual,     // /=

    // Delimiters
    LParen,         // (
    RParen,         // )
    LBrace,         // {
    RBrace,         // }
    LBracket,       // [
    RBracket,       // ]
    Semicolon,      // ;
    Comma,          // ,
    Dot,            // .
    Colon,          // :

    // Layout
    Newline,
    Indent,
    Dedent,

    /// Unrecognized input, carried to the parser
    Error(String),

    // End of file
    Eof,
}

/// A token with its source text and 1-based position
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
}

/// Tokenize a whole script
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).tokenize()
}

/// qbscript lexer
pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    column: usize,
    ch: Option<char>,
    indent_stack: Vec<usize>,
    bracket_depth: usize,
    at_line_start: bool,
    pending: VecDeque<Token>,
    emitted_any: bool,
    last_was_newline: bool,
    finished: bool,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer
    pub fn new(input: &'a str) -> Self {
        let mut chars = input.chars().peekable();
        let ch = chars.next();
        Self {
            input: chars,
            line: 1,
            column: 1,
            ch,
            indent_stack: vec![0],
            bracket_depth: 0,
            at_line_start: true,
            pending: VecDeque::new(),
            emitted_any: false,
            last_was_newline: false,
            finished: false,
        }
    }

    /// Consume the lexer and collect every token up to and including `Eof`
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Token {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return self.emit(token);
            }

            if self.at_line_start && self.bracket_depth == 0 {
                self.at_line_start = false;
                if let Some(token) = self.read_indentation() {
                    return self.emit(token);
                }
                if let Some(token) = self.pending.pop_front() {
                    return self.emit(token);
                }
            }

            self.skip_whitespace();

            let (line, column) = (self.line, self.column);
            let Some(ch) = self.ch else {
                return self.finish(line, column);
            };

            let token = match ch {
                '\n' => {
                    self.advance();
                    if self.bracket_depth > 0 {
                        continue;
                    }
                    self.at_line_start = true;
                    if !self.emitted_any || self.last_was_newline {
                        continue;
                    }
                    self.make(TokenKind::Newline, "\\n", line, column)
                }

                '#' => {
                    self.skip_comment();
                    continue;
                }

                // Line continuation
                '\\' if self.check_char('\n') => {
                    self.advance();
                    self.advance();
                    continue;
                }

                '0'..='9' => self.read_number(line, column),
                '.' if self.peek_is_digit() => self.read_number(line, column),

                c if c.is_alphabetic() || c == '_' => self.read_identifier(line, column),

                '"' | '\'' => self.read_string(ch, line, column),

                _ => self.read_operator(ch, line, column),
            };

            return self.emit(token);
        }
    }

    /// Measure leading whitespace of a fresh line and queue layout tokens.
    /// Blank and comment-only lines are skipped entirely.
    fn read_indentation(&mut self) -> Option<Token> {
        loop {
            let mut width = 0;
            while let Some(ch) = self.ch {
                match ch {
                    ' ' => width += 1,
                    '\t' => width += TAB_WIDTH - width % TAB_WIDTH,
                    '\r' => {}
                    _ => break,
                }
                self.advance();
            }

            match self.ch {
                None => return None,
                Some('\n') => {
                    self.advance();
                    continue;
                }
                Some('#') => {
                    self.skip_comment();
                    continue;
                }
                _ => {}
            }

            let (line, column) = (self.line, self.column);
            let current = self.current_indent();

            if width > current {
                self.indent_stack.push(width);
                return Some(self.make(TokenKind::Indent, "", line, column));
            }

            while width < self.current_indent() {
                self.indent_stack.pop();
                let dedent = self.make(TokenKind::Dedent, "", line, column);
                self.pending.push_back(dedent);
            }

            if width != self.current_indent() {
                let error = self.make(
                    TokenKind::Error("inconsistent indentation".into()),
                    "",
                    line,
                    column,
                );
                self.pending.push_back(error);
            }

            return None;
        }
    }

    /// Close the stream: trailing newline, open dedents, then `Eof`
    fn finish(&mut self, line: usize, column: usize) -> Token {
        if !self.finished {
            self.finished = true;
            if self.emitted_any && !self.last_was_newline {
                let newline = self.make(TokenKind::Newline, "", line, column);
                self.pending.push_back(newline);
            }
            while self.indent_stack.len() > 1 {
                self.indent_stack.pop();
                let dedent = self.make(TokenKind::Dedent, "", line, column);
                self.pending.push_back(dedent);
            }
            if let Some(token) = self.pending.pop_front() {
                return self.emit(token);
            }
        }
        self.make(TokenKind::Eof, "", line, column)
    }

    /// Read a number literal
    fn read_number(&mut self, line: usize, column: usize) -> Token {
        let mut num_str = String::new();
        let mut seen_dot = false;

        while let Some(ch) = self.ch {
            if ch.is_ascii_digit() {
                num_str.push(ch);
                self.advance();
            } else if ch == '.' && !seen_dot && self.peek_is_digit() {
                seen_dot = true;
                num_str.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        match num_str.parse::<f64>() {
            Ok(value) => self.make(TokenKind::Number(value), &num_str, line, column),
            Err(_) => self.make(
                TokenKind::Error(format!("Invalid number: {}", num_str)),
                &num_str,
                line,
                column,
            ),
        }
    }

    /// Read an identifier or keyword
    fn read_identifier(&mut self, line: usize, column: usize) -> Token {
        let mut ident = String::new();

        while let Some(ch) = self.ch {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }

        let kind = match ident.as_str() {
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "return" => TokenKind::Return,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => TokenKind::Identifier(ident.clone()),
        };

        self.make(kind, &ident, line, column)
    }

    /// Read a string literal delimited by `quote`
    fn read_string(&mut self, quote: char, line: usize, column: usize) -> Token {
        self.advance(); // Skip opening quote

        let mut s = String::new();

        while let Some(ch) = self.ch {
            if ch == quote {
                self.advance();
                let text = format!("{}{}{}", quote, s, quote);
                return self.make(TokenKind::String(s), &text, line, column);
            } else if ch == '\n' {
                break;
            } else if ch == '\\' {
                self.advance();
                if let Some(escaped) = self.ch {
                    match escaped {
                        'n' => s.push('\n'),
                        't' => s.push('\t'),
                        'r' => s.push('\r'),
                        _ => s.push(escaped),
                    }
                    self.advance();
                }
            } else {
                s.push(ch);
                self.advance();
            }
        }

        self.make(
            TokenKind::Error("Unterminated string".into()),
            &s,
            line,
            column,
        )
    }

    /// Read an operator or punctuation character
    fn read_operator(&mut self, ch: char, line: usize, column: usize) -> Token {
        self.advance();

        let (kind, text) = match ch {
            '+' if self.eat('=') => (TokenKind::PlusEqual, "+="),
            '+' => (TokenKind::Plus, "+"),
            '-' if self.eat('=') => (TokenKind::MinusEqual, "-="),
            '-' => (TokenKind::Minus, "-"),
            '*' if self.eat('*') => (TokenKind::StarStar, "**"),
            '*' if self.eat('=') => (TokenKind::StarEqual, "*="),
            '*' => (TokenKind::Star, "*"),
            '/' if self.eat('/') => (TokenKind::SlashSlash, "//"),
            '/' if self.eat('=') => (TokenKind::SlashEqual, "/="),
            '/' => (TokenKind::Slash, "/"),
            '%' => (TokenKind::Percent, "%"),
            '=' if self.eat('=') => (TokenKind::Equal, "=="),
            '=' => (TokenKind::Assign, "="),
            '!' if self.eat('=') => (TokenKind::NotEqual, "!="),
            '!' => (TokenKind::Not, "!"),
            '<' if self.eat('=') => (TokenKind::LessEqual, "<="),
            '<' => (TokenKind::Less, "<"),
            '>' if self.eat('=') => (TokenKind::GreaterEqual, ">="),
            '>' => (TokenKind::Greater, ">"),
            '&' if self.eat('&') => (TokenKind::And, "&&"),
            '|' if self.eat('|') => (TokenKind::Or, "||"),
            '(' => {
                self.bracket_depth += 1;
                (TokenKind::LParen, "(")
            }
            ')' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                (TokenKind::RParen, ")")
            }
            '[' => {
                self.bracket_depth += 1;
                (TokenKind::LBracket, "[")
            }
            ']' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                (TokenKind::RBracket, "]")
            }
            '{' => {
                self.bracket_depth += 1;
                (TokenKind::LBrace, "{")
            }
            '}' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                (TokenKind::RBrace, "}")
            }
            ';' => (TokenKind::Semicolon, ";"),
            ',' => (TokenKind::Comma, ","),
            '.' => (TokenKind::Dot, "."),
            ':' => (TokenKind::Colon, ":"),
            _ => {
                return self.make(
                    TokenKind::Error(format!("Unexpected character: {}", ch)),
                    &ch.to_string(),
                    line,
                    column,
                );
            }
        };

        self.make(kind, text, line, column)
    }

    fn make(&self, kind: TokenKind, text: &str, line: usize, column: usize) -> Token {
        Token {
            kind,
            text: text.to_string(),
            line,
            column,
        }
    }

    fn emit(&mut self, token: Token) -> Token {
        match token.kind {
            TokenKind::Newline => self.last_was_newline = true,
            TokenKind::Indent | TokenKind::Dedent | TokenKind::Eof => {}
            _ => {
                self.emitted_any = true;
                self.last_was_newline = false;
            }
        }
        token
    }

    fn current_indent(&self) -> usize {
        self.indent_stack.last().copied().unwrap_or(0)
    }

    /// Consume the current char if the *next* char is `ch`
    fn eat(&mut self, ch: char) -> bool {
        if self.ch == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Check if the next character matches
    fn check_char(&mut self, ch: char) -> bool {
        match self.input.peek() {
            Some(&c) => c == ch,
            None => false,
        }
    }

    fn peek_is_digit(&mut self) -> bool {
        matches!(self.input.peek(), Some(c) if c.is_ascii_digit())
    }

    /// Advance to the next character
    fn advance(&mut self) {
        if self.ch == Some('\n') {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.ch = self.input.next();
    }

    /// Skip whitespace other than newlines
    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.ch {
            if ch.is_whitespace() && ch != '\n' {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Skip a `#` comment up to (not including) the newline
    fn skip_comment(&mut self) {
        while self.ch.is_some() && self.ch != Some('\n') {
            self.advance();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_long_runs_of_skipped_lines() {
        let bracketed = format!("[{}1]", "\n".repeat(100_000));
        assert_eq!(
            kinds(&bracketed),
            vec![
                TokenKind::LBracket,
                TokenKind::Number(1.0),
                TokenKind::RBracket,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );

        let commented = format!("x{}", " # note\n".repeat(50_000));
        assert_eq!(kinds(&commented), vec![TokenKind::Identifier("x".into()), TokenKind::Newline, TokenKind::Eof]);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("123 45.67"),
            vec![
                TokenKind::Number(123.0),
                TokenKind::Number(45.67),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_identifiers_and_keywords() {
        assert_eq!(
            kinds("if else for in return and or not true false null foo_bar"),
            vec![
                TokenKind::If,
                TokenKind::Else,
                TokenKind::For,
                TokenKind::In,
                TokenKind::Return,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Not,
                TokenKind::True,
                TokenKind::False,
                TokenKind::Null,
                TokenKind::Identifier("foo_bar".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("** // / * += == != <= >= && || !"),
            vec![
                TokenKind::StarStar,
                TokenKind::SlashSlash,
                TokenKind::Slash,
                TokenKind::Star,
                TokenKind::PlusEqual,
                TokenKind::Equal,
                TokenKind::NotEqual,
                TokenKind::LessEqual,
                TokenKind::GreaterEqual,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Not,
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_strings_both_quotes() {
        assert_eq!(
            kinds(r#""hello world" 'it\'s'"#),
            vec![
                TokenKind::String("hello world".into()),
                TokenKind::String("it's".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_indentation_blocks() {
        let source = "if x > 50:\n    y = 1\n    z = 2\nw = 3\n";
        assert_eq!(
            kinds(source),
            vec![
                TokenKind::If,
                TokenKind::Identifier("x".into()),
                TokenKind::Greater,
                TokenKind::Number(50.0),
                TokenKind::Colon,
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Identifier("y".into()),
                TokenKind::Assign,
                TokenKind::Number(1.0),
                TokenKind::Newline,
                TokenKind::Identifier("z".into()),
                TokenKind::Assign,
                TokenKind::Number(2.0),
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Identifier("w".into()),
                TokenKind::Assign,
                TokenKind::Number(3.0),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_blank_and_comment_lines_ignored() {
        let source = "a = 1\n\n   # note\nb = 2";
        let tokens = kinds(source);
        assert!(!tokens.contains(&TokenKind::Indent));
        assert_eq!(tokens.iter().filter(|k| **k == TokenKind::Newline).count(), 2);
    }

    #[test]
    fn test_open_blocks_closed_at_eof() {
        let tokens = kinds("f():\n  if a:\n    return 1");
        let dedents = tokens.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(tokens.last(), Some(&TokenKind::Eof));
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let tokens = kinds("arr = [1,\n    2,\n    3]");
        assert!(!tokens.contains(&TokenKind::Indent));
        assert_eq!(tokens.iter().filter(|k| **k == TokenKind::Newline).count(), 1);
    }

    #[test]
    fn test_unknown_character_becomes_error_token() {
        let tokens = tokenize("a = 1 @ 2");
        let error = tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::Error(_)))
            .unwrap();
        assert_eq!(error.line, 1);
        assert_eq!(error.column, 7);
        assert_eq!(error.text, "@");
    }

    #[test]
    fn test_unterminated_string_is_error_token() {
        let tokens = kinds("msg = 'oops");
        assert!(tokens.contains(&TokenKind::Error("Unterminated string".into())));
    }

    #[test]
    fn test_inconsistent_dedent() {
        let tokens = kinds("if a:\n    b = 1\n  c = 2");
        assert!(tokens.contains(&TokenKind::Error("inconsistent indentation".into())));
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("a\n  bb");
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        let bb = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Identifier("bb".into()))
            .unwrap();
        assert_eq!((bb.line, bb.column), (2, 3));
    }
}
