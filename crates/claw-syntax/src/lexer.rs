//! Lexer for Claw source code.

use claw_common::Span;

use crate::token::{Token, TokenKind};

/// Lexer for Claw source code.
pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    ch: Option<char>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given input.
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Self {
            input,
            pos: 0,
            ch: None,
            line: 1,
            column: 0,
        };
        lexer.read_char();
        lexer
    }

    /// Tokenize the entire input, ending with an Eof token.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    /// Read the next character.
    fn read_char(&mut self) {
        if self.ch == Some('\n') {
            self.line += 1;
            self.column = 0;
        }
        self.ch = self.input[self.pos..].chars().next();
        if let Some(c) = self.ch {
            self.pos += c.len_utf8();
            self.column += 1;
        }
    }

    /// Peek at the next character without consuming.
    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    /// Byte offset of the current character.
    fn cur_offset(&self) -> usize {
        match self.ch {
            Some(c) => self.pos - c.len_utf8(),
            None => self.pos,
        }
    }

    /// Skip whitespace and comments.
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.ch {
            if c.is_whitespace() {
                self.read_char();
            } else if c == '/' && self.peek_char() == Some('/') {
                while self.ch.is_some() && self.ch != Some('\n') {
                    self.read_char();
                }
            } else if c == '/' && self.peek_char() == Some('*') {
                self.read_char(); // consume /
                self.read_char(); // consume *
                while self.ch.is_some() {
                    if self.ch == Some('*') && self.peek_char() == Some('/') {
                        self.read_char(); // consume *
                        self.read_char(); // consume /
                        break;
                    }
                    self.read_char();
                }
            } else {
                break;
            }
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let start = self.cur_offset() as u32;
        let line = self.line;
        let column = self.column;

        let kind = match self.ch {
            None => TokenKind::Eof,
            Some(c) if c.is_ascii_digit() => self.read_number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.read_ident(),
            Some('"') => self.read_string(),
            Some(c) => {
                self.read_char();
                self.read_operator(c)
            }
        };

        let end = self.cur_offset() as u32;
        Token::new(kind, Span::new(start, end), line, column.max(1))
    }

    /// Read an identifier or keyword.
    fn read_ident(&mut self) -> TokenKind {
        let start = self.cur_offset();
        while let Some(c) = self.ch {
            if c.is_alphanumeric() || c == '_' {
                self.read_char();
            } else {
                break;
            }
        }
        let text = &self.input[start..self.cur_offset()];
        Self::lookup_ident(text)
    }

    fn lookup_ident(text: &str) -> TokenKind {
        match text {
            "let" => TokenKind::Let,
            "fn" => TokenKind::Fn,
            "print" => TokenKind::Print,
            "if" => TokenKind::If,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "return" => TokenKind::Return,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "nil" => TokenKind::Nil,
            _ => TokenKind::Ident(text.to_string()),
        }
    }

    /// Read a number literal. A dot is consumed only when followed by a digit,
    /// so `x.foo` on a number variable still lexes as member access.
    fn read_number(&mut self) -> TokenKind {
        let start = self.cur_offset();
        let mut is_float = false;
        while let Some(c) = self.ch {
            if c.is_ascii_digit() {
                self.read_char();
            } else if c == '.' && !is_float {
                match self.peek_char() {
                    Some(next) if next.is_ascii_digit() => {
                        is_float = true;
                        self.read_char(); // consume .
                    }
                    _ => break,
                }
            } else {
                break;
            }
        }
        let text = &self.input[start..self.cur_offset()];
        TokenKind::Number(text.parse().unwrap_or(0.0))
    }

    /// Read a string literal with escape sequences.
    fn read_string(&mut self) -> TokenKind {
        self.read_char(); // consume opening quote
        let mut value = String::new();
        loop {
            match self.ch {
                None => return TokenKind::UnterminatedString,
                Some('"') => {
                    self.read_char();
                    return TokenKind::Str(value);
                }
                Some('\\') => {
                    self.read_char();
                    match self.ch {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some('r') => value.push('\r'),
                        Some('\\') => value.push('\\'),
                        Some('"') => value.push('"'),
                        Some('0') => value.push('\0'),
                        Some(c) => value.push(c),
                        None => return TokenKind::UnterminatedString,
                    }
                    self.read_char();
                }
                Some(c) => {
                    value.push(c);
                    self.read_char();
                }
            }
        }
    }

    /// Read an operator or delimiter; `c` has already been consumed.
    fn read_operator(&mut self, c: char) -> TokenKind {
        match c {
            '+' => match self.ch {
                Some('+') => self.consume(TokenKind::PlusPlus),
                Some('=') => self.consume(TokenKind::PlusEq),
                _ => TokenKind::Plus,
            },
            '-' => match self.ch {
                Some('-') => self.consume(TokenKind::MinusMinus),
                Some('=') => self.consume(TokenKind::MinusEq),
                _ => TokenKind::Minus,
            },
            '*' => match self.ch {
                Some('=') => self.consume(TokenKind::StarEq),
                _ => TokenKind::Star,
            },
            '/' => match self.ch {
                Some('=') => self.consume(TokenKind::SlashEq),
                _ => TokenKind::Slash,
            },
            '&' => match self.ch {
                Some('&') => self.consume(TokenKind::AmpAmp),
                Some('=') => self.consume(TokenKind::AmpEq),
                _ => TokenKind::Amp,
            },
            '|' => match self.ch {
                Some('|') => self.consume(TokenKind::PipePipe),
                Some('=') => self.consume(TokenKind::PipeEq),
                _ => TokenKind::Pipe,
            },
            '^' => match self.ch {
                Some('=') => self.consume(TokenKind::CaretEq),
                _ => TokenKind::Caret,
            },
            '<' => match self.ch {
                Some('<') => {
                    self.read_char();
                    match self.ch {
                        Some('=') => self.consume(TokenKind::ShlEq),
                        _ => TokenKind::Shl,
                    }
                }
                Some('=') => self.consume(TokenKind::LtEq),
                _ => TokenKind::Lt,
            },
            '>' => match self.ch {
                Some('>') => {
                    self.read_char();
                    match self.ch {
                        Some('=') => self.consume(TokenKind::ShrEq),
                        _ => TokenKind::Shr,
                    }
                }
                Some('=') => self.consume(TokenKind::GtEq),
                _ => TokenKind::Gt,
            },
            '=' => match self.ch {
                Some('=') => self.consume(TokenKind::EqEq),
                _ => TokenKind::Eq,
            },
            '!' => match self.ch {
                Some('=') => self.consume(TokenKind::BangEq),
                _ => TokenKind::Bang,
            },
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            ':' => TokenKind::Colon,
            '?' => TokenKind::Question,
            ';' => TokenKind::Semi,
            other => TokenKind::Invalid(other),
        }
    }

    fn consume(&mut self, kind: TokenKind) -> TokenKind {
        self.read_char();
        kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input).tokenize().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1 2.5 42"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Number(2.5),
                TokenKind::Number(42.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_number_then_dot_member() {
        assert_eq!(
            kinds("x.len"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Dot,
                TokenKind::Ident("len".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_and_idents() {
        assert_eq!(
            kinds("let foo = fn"),
            vec![
                TokenKind::Let,
                TokenKind::Ident("foo".into()),
                TokenKind::Eq,
                TokenKind::Fn,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""a\nb""#),
            vec![TokenKind::Str("a\nb".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string() {
        assert_eq!(
            kinds("\"abc"),
            vec![TokenKind::UnterminatedString, TokenKind::Eof]
        );
    }

    #[test]
    fn test_compound_operators() {
        assert_eq!(
            kinds("+= -= *= /= &= |= ^= <<= >>= << >> && || ++ --"),
            vec![
                TokenKind::PlusEq,
                TokenKind::MinusEq,
                TokenKind::StarEq,
                TokenKind::SlashEq,
                TokenKind::AmpEq,
                TokenKind::PipeEq,
                TokenKind::CaretEq,
                TokenKind::ShlEq,
                TokenKind::ShrEq,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::AmpAmp,
                TokenKind::PipePipe,
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            kinds("1 // comment\n2 /* block\ncomment */ 3"),
            vec![
                TokenKind::Number(1.0),
                TokenKind::Number(2.0),
                TokenKind::Number(3.0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_line_tracking() {
        let tokens = Lexer::new("a\n  b").tokenize();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
        assert_eq!(tokens[1].column, 3);
    }
}
