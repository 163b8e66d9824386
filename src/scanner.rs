use crate::error::{CompilationError, ErrorCode};
use crate::token::{Pos, Token, TokenKind};

/// Turns c0 source text into tokens.
///
/// Block comments that never close, stray characters, malformed numbers and
/// literals above `i32::MAX` are reported at the position where the
/// offending lexeme starts.
pub fn scan(input: &str) -> Result<Vec<Token>, CompilationError> {
    let mut scanner = Scanner::new(input);
    let mut out = Vec::new();
    while let Some(token) = scanner.next_token()? {
        out.push(token);
    }
    Ok(out)
}

struct Scanner<'a> {
    input: &'a str,
    bytes: &'a [u8],
    i: usize,
    line: usize,
    column: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            i: 0,
            line: 1,
            column: 1,
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, CompilationError> {
        self.skip_trivia()?;
        let Some(c) = self.peek() else {
            return Ok(None);
        };
        let start = self.pos();
        let from = self.i;

        let kind = match c {
            b'+' => self.single(TokenKind::Plus),
            b'-' => self.single(TokenKind::Minus),
            b'*' => self.single(TokenKind::Star),
            b'/' => self.single(TokenKind::Slash),
            b';' => self.single(TokenKind::Semi),
            b',' => self.single(TokenKind::Comma),
            b'(' => self.single(TokenKind::LParen),
            b')' => self.single(TokenKind::RParen),
            b'{' => self.single(TokenKind::LBrace),
            b'}' => self.single(TokenKind::RBrace),
            b'=' => self.with_eq(TokenKind::Assign, TokenKind::EqEq),
            b'<' => self.with_eq(TokenKind::Lt, TokenKind::Le),
            b'>' => self.with_eq(TokenKind::Gt, TokenKind::Ge),
            b'!' => {
                self.bump();
                if self.peek() != Some(b'=') {
                    return Err(CompilationError::new(ErrorCode::InvalidInput, start));
                }
                self.bump();
                TokenKind::Ne
            }
            d if d.is_ascii_digit() => {
                let value = self.integer(start)?;
                let text = &self.input[from..self.i];
                return Ok(Some(Token::integer(text, value, start, self.pos())));
            }
            a if a.is_ascii_alphabetic() => {
                while self.peek().is_some_and(|b| b.is_ascii_alphanumeric()) {
                    self.bump();
                }
                TokenKind::keyword(&self.input[from..self.i]).unwrap_or(TokenKind::Ident)
            }
            _ => return Err(CompilationError::new(ErrorCode::InvalidInput, start)),
        };

        Ok(Some(Token::new(
            kind,
            &self.input[from..self.i],
            start,
            self.pos(),
        )))
    }

    fn skip_trivia(&mut self) -> Result<(), CompilationError> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_ascii_whitespace() => self.bump(),
                (Some(b'/'), Some(b'/')) => {
                    while self.peek().is_some_and(|b| b != b'\n') {
                        self.bump();
                    }
                }
                (Some(b'/'), Some(b'*')) => {
                    let start = self.pos();
                    self.bump();
                    self.bump();
                    loop {
                        match (self.peek(), self.peek_at(1)) {
                            (Some(b'*'), Some(b'/')) => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            (Some(_), _) => self.bump(),
                            (None, _) => {
                                return Err(CompilationError::new(
                                    ErrorCode::UnterminatedComment,
                                    start,
                                ))
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn integer(&mut self, start: Pos) -> Result<i32, CompilationError> {
        let radix = if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.bump();
            self.bump();
            16
        } else {
            10
        };

        let digits_from = self.i;
        let mut value: i64 = 0;
        let mut overflow = false;
        while let Some(d) = self.peek().and_then(|b| (b as char).to_digit(radix)) {
            value = value * i64::from(radix) + i64::from(d);
            if value > i64::from(i32::MAX) {
                overflow = true;
                value = 0;
            }
            self.bump();
        }
        let digits = &self.input[digits_from..self.i];

        if digits.is_empty() || (radix == 10 && digits.len() > 1 && digits.starts_with('0')) {
            return Err(CompilationError::new(ErrorCode::InvalidInput, start));
        }
        if self.peek().is_some_and(|b| b.is_ascii_alphanumeric()) {
            return Err(CompilationError::new(ErrorCode::InvalidInput, start));
        }
        if overflow {
            return Err(CompilationError::new(ErrorCode::IntegerOverflow, start));
        }
        Ok(value as i32)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        kind
    }

    fn with_eq(&mut self, plain: TokenKind, with_eq: TokenKind) -> TokenKind {
        self.bump();
        if self.peek() == Some(b'=') {
            self.bump();
            with_eq
        } else {
            plain
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.i).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.i + ahead).copied()
    }

    fn bump(&mut self) {
        if let Some(b) = self.peek() {
            self.i += 1;
            if b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
    }

    fn pos(&self) -> Pos {
        Pos::new(self.line, self.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        scan(src).expect("scan").into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scanner_recognizes_core_tokens() {
        let got = kinds("const int x = 1; void main() { if (x <= 2) print(x); }");
        assert_eq!(
            got,
            vec![
                TokenKind::KwConst,
                TokenKind::KwInt,
                TokenKind::Ident,
                TokenKind::Assign,
                TokenKind::Integer,
                TokenKind::Semi,
                TokenKind::KwVoid,
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::LBrace,
                TokenKind::KwIf,
                TokenKind::LParen,
                TokenKind::Ident,
                TokenKind::Le,
                TokenKind::Integer,
                TokenKind::RParen,
                TokenKind::KwPrint,
                TokenKind::LParen,
                TokenKind::Ident,
                TokenKind::RParen,
                TokenKind::Semi,
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn two_char_operators() {
        assert_eq!(
            kinds("== != < <= > >= ="),
            vec![
                TokenKind::EqEq,
                TokenKind::Ne,
                TokenKind::Lt,
                TokenKind::Le,
                TokenKind::Gt,
                TokenKind::Ge,
                TokenKind::Assign,
            ]
        );
    }

    #[test]
    fn integers_decimal_and_hex() {
        let tokens = scan("0 42 0x1F 0XfF 2147483647").expect("scan");
        let values: Vec<_> = tokens.iter().map(|t| t.value).collect();
        assert_eq!(
            values,
            vec![Some(0), Some(42), Some(31), Some(255), Some(i32::MAX)]
        );
    }

    #[test]
    fn integer_overflow_is_reported_at_literal_start() {
        let err = scan("int x = 2147483648;").expect_err("must fail");
        assert_eq!(err.code, ErrorCode::IntegerOverflow);
        assert_eq!(err.pos(), Pos::new(1, 9));
    }

    #[test]
    fn leading_zero_is_invalid() {
        let err = scan("012").expect_err("must fail");
        assert_eq!(err.code, ErrorCode::InvalidInput);
        let err = scan("0x").expect_err("must fail");
        assert_eq!(err.code, ErrorCode::InvalidInput);
        let err = scan("12ab").expect_err("must fail");
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn comments_are_skipped_and_positions_tracked() {
        let src = "// header\n/* multi\n line */ int\n  x";
        let tokens = scan(src).expect("scan");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].kind, TokenKind::KwInt);
        assert_eq!(tokens[0].start, Pos::new(3, 10));
        assert_eq!(tokens[0].end, Pos::new(3, 13));
        assert_eq!(tokens[1].start, Pos::new(4, 3));
    }

    #[test]
    fn unterminated_comment_fails() {
        let err = scan("int /* never closed").expect_err("must fail");
        assert_eq!(err.code, ErrorCode::UnterminatedComment);
        assert_eq!(err.pos(), Pos::new(1, 5));
    }

    #[test]
    fn lone_bang_and_stray_chars_are_invalid() {
        assert_eq!(
            scan("!x").expect_err("must fail").code,
            ErrorCode::InvalidInput
        );
        assert_eq!(
            scan("x # y").expect_err("must fail").code,
            ErrorCode::InvalidInput
        );
    }

    #[test]
    fn unsupported_c0_keywords_are_reserved() {
        assert_eq!(
            kinds("for double x1"),
            vec![TokenKind::Reserved, TokenKind::Reserved, TokenKind::Ident]
        );
    }
}
