use crate::token::{Pos, Token, TokenKind};

/// Sequential access over a scanned token vector with one token of
/// lookahead and single-step pushback.
///
/// `pos()` is the start of the token most recently returned by `next`, or
/// the end of the last token once input has run out. Errors raised by the
/// analyzer are reported there.
#[derive(Debug, Clone)]
pub struct TokenCursor {
    tokens: Vec<Token>,
    idx: usize,
    pos: Pos,
}

impl TokenCursor {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            idx: 0,
            pos: Pos::new(1, 1),
        }
    }

    pub fn next(&mut self) -> Option<Token> {
        match self.tokens.get(self.idx) {
            Some(t) => {
                self.pos = t.start;
                self.idx += 1;
                Some(t.clone())
            }
            None => {
                self.pos = self.eof_pos();
                None
            }
        }
    }

    pub fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.idx)
    }

    pub fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    /// Steps back over the token returned by the last `next`.
    pub fn unread(&mut self) {
        debug_assert!(self.idx > 0, "unread before any token was read");
        self.idx = self.idx.saturating_sub(1);
        self.pos = match self.idx.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some(t) => t.start,
            None => Pos::new(1, 1),
        };
    }

    /// Consumes the next token when it has the given kind.
    pub fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.peek_kind() == Some(kind) {
            self.next()
        } else {
            None
        }
    }

    pub fn pos(&self) -> Pos {
        self.pos
    }

    /// Where the next token starts, or the end of input.
    pub fn next_pos(&self) -> Pos {
        self.peek().map(|t| t.start).unwrap_or_else(|| self.eof_pos())
    }

    fn eof_pos(&self) -> Pos {
        self.tokens.last().map(|t| t.end).unwrap_or(Pos::new(1, 1))
    }
}
