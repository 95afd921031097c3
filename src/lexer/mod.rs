//! Lazy token-stream scanner.
//!
//! Mirrors `original_source/Scanner.cpp`'s character-at-a-time advance:
//! whitespace and both comment styles are skipped before each token, `line`
//! increments on every newline consumed (including inside block comments and
//! string literals), and the scanner is a forward-only cursor with no
//! restart other than re-construction.

mod token;

pub use token::{Token, TokenKind};

pub struct Lexer<'src> {
    source: &'src str,
    bytes: &'src [u8],
    start: usize,
    current: usize,
    line: u32,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Self {
        Lexer { source, bytes: source.as_bytes(), start: 0, current: 0, line: 1 }
    }

    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();

        if is_alpha(c) {
            return self.identifier();
        }
        if c.is_ascii_digit() {
            return self.number();
        }

        match c {
            b'(' => self.make_token(TokenKind::LeftParen),
            b')' => self.make_token(TokenKind::RightParen),
            b'{' => self.make_token(TokenKind::LeftBrace),
            b'}' => self.make_token(TokenKind::RightBrace),
            b'[' => self.make_token(TokenKind::LeftBracket),
            b']' => self.make_token(TokenKind::RightBracket),
            b',' => self.make_token(TokenKind::Comma),
            b'.' => {
                let kind = if self.match_byte(b'.') { TokenKind::DotDot } else { TokenKind::Dot };
                self.make_token(kind)
            }
            b';' => self.make_token(TokenKind::Semicolon),
            b':' => self.make_token(TokenKind::Colon),
            b'-' => {
                let kind = if self.match_byte(b'-') { TokenKind::MinusMinus } else { TokenKind::Minus };
                self.make_token(kind)
            }
            b'+' => {
                let kind = if self.match_byte(b'+') { TokenKind::PlusPlus } else { TokenKind::Plus };
                self.make_token(kind)
            }
            b'*' => self.make_token(TokenKind::Star),
            b'%' => self.make_token(TokenKind::Percent),
            b'!' => {
                let kind = if self.match_byte(b'=') { TokenKind::BangEqual } else { TokenKind::Bang };
                self.make_token(kind)
            }
            b'=' => {
                let kind = if self.match_byte(b'=') { TokenKind::EqualEqual } else { TokenKind::Equal };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.match_byte(b'=') { TokenKind::LessEqual } else { TokenKind::Less };
                self.make_token(kind)
            }
            b'>' => {
                let kind = if self.match_byte(b'=') { TokenKind::GreaterEqual } else { TokenKind::Greater };
                self.make_token(kind)
            }
            b'/' => self.make_token(TokenKind::Slash),
            b'"' => self.string(),
            _ => self.error_token("Unexpected character."),
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.advance();
                }
                b'\n' => {
                    self.line += 1;
                    self.advance();
                }
                b'/' => {
                    if self.peek_next() == b'/' {
                        while self.peek() != b'\n' && !self.is_at_end() {
                            self.advance();
                        }
                    } else if self.peek_next() == b'*' {
                        self.advance();
                        self.advance();
                        self.block_comment();
                    } else {
                        return;
                    }
                }
                _ => return,
            }
        }
    }

    fn block_comment(&mut self) {
        while !(self.peek() == b'*' && self.peek_next() == b'/') && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.advance();
        }
        self.advance();
        self.advance();
    }

    fn identifier(&mut self) -> Token<'src> {
        while is_alpha_numeric(self.peek()) {
            self.advance();
        }
        let kind = keyword_kind(self.lexeme_str()).unwrap_or(TokenKind::Identifier);
        self.make_token(kind)
    }

    fn number(&mut self) -> Token<'src> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        self.make_token(TokenKind::Number)
    }

    fn string(&mut self) -> Token<'src> {
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
            }
            self.advance();
        }
        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }
        self.advance();
        self.make_token(TokenKind::String)
    }

    fn advance(&mut self) -> u8 {
        let b = self.bytes[self.current];
        self.current += 1;
        b
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.bytes[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() { 0 } else { self.bytes[self.current] }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.bytes.len() { 0 } else { self.bytes[self.current + 1] }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn lexeme_str(&self) -> &'src str {
        &self.source[self.start..self.current]
    }

    fn make_token(&self, kind: TokenKind) -> Token<'src> {
        Token { kind, lexeme: self.lexeme_str(), line: self.line }
    }

    fn error_token(&self, message: &'static str) -> Token<'src> {
        Token { kind: TokenKind::Error, lexeme: message, line: self.line }
    }
}

fn is_alpha(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_alpha_numeric(c: u8) -> bool {
    is_alpha(c) || c.is_ascii_digit()
}

fn keyword_kind(text: &str) -> Option<TokenKind> {
    Some(match text {
        "and" => TokenKind::And,
        "class" => TokenKind::Class,
        "else" => TokenKind::Else,
        "false" => TokenKind::False,
        "fun" => TokenKind::Fun,
        "for" => TokenKind::For,
        "if" => TokenKind::If,
        "nil" => TokenKind::Nil,
        "or" => TokenKind::Or,
        "print" => TokenKind::Print,
        "return" => TokenKind::Return,
        "super" => TokenKind::Super,
        "this" => TokenKind::This,
        "true" => TokenKind::True,
        "var" => TokenKind::Var,
        "const" => TokenKind::Const,
        "while" => TokenKind::While,
        "match" => TokenKind::Match,
        "case" => TokenKind::Case,
        "break" => TokenKind::Break,
        "continue" => TokenKind::Continue,
        "in" => TokenKind::In,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            let tok = lexer.scan_token();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn scans_operators_and_keywords() {
        use TokenKind::*;
        assert_eq!(kinds("var x = 1..5;"), vec![Var, Identifier, Equal, Number, DotDot, Number, Semicolon, Eof]);
    }

    #[test]
    fn skips_line_and_block_comments() {
        let toks = kinds("// a comment\n/* block\ncomment */ nil");
        assert_eq!(toks, vec![TokenKind::Nil, TokenKind::Eof]);
    }

    #[test]
    fn tracks_line_numbers_across_block_comments() {
        let mut lexer = Lexer::new("/* a\nb\nc */ nil");
        let tok = lexer.scan_token();
        assert_eq!(tok.kind, TokenKind::Nil);
        assert_eq!(tok.line, 3);
    }

    #[test]
    fn reports_unterminated_string() {
        let mut lexer = Lexer::new("\"abc");
        let tok = lexer.scan_token();
        assert_eq!(tok.kind, TokenKind::Error);
    }

    #[test]
    fn plus_plus_and_minus_minus_are_distinct_tokens() {
        assert_eq!(kinds("++ --"), vec![TokenKind::PlusPlus, TokenKind::MinusMinus, TokenKind::Eof]);
    }
}
