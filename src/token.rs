use serde::Serialize;

/// 1-based source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Pos {
    pub line: usize,
    pub column: usize,
}

impl Pos {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl core::fmt::Display for Pos {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TokenKind {
    Integer,
    Ident,
    KwConst,
    KwVoid,
    KwInt,
    KwIf,
    KwElse,
    KwWhile,
    KwReturn,
    KwPrint,
    KwScan,
    /// c0 keyword this front end does not implement (`char`, `for`, ...).
    Reserved,
    Plus,
    Minus,
    Star,
    Slash,
    Assign,
    EqEq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Semi,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,
}

impl TokenKind {
    pub fn keyword(text: &str) -> Option<Self> {
        let kind = match text {
            "const" => TokenKind::KwConst,
            "void" => TokenKind::KwVoid,
            "int" => TokenKind::KwInt,
            "if" => TokenKind::KwIf,
            "else" => TokenKind::KwElse,
            "while" => TokenKind::KwWhile,
            "return" => TokenKind::KwReturn,
            "print" => TokenKind::KwPrint,
            "scan" => TokenKind::KwScan,
            "char" | "double" | "struct" | "switch" | "case" | "default" | "for" | "do"
            | "break" | "continue" => TokenKind::Reserved,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Integer => "INTEGER",
            TokenKind::Ident => "IDENTIFIER",
            TokenKind::KwConst => "CONST",
            TokenKind::KwVoid => "VOID",
            TokenKind::KwInt => "INT",
            TokenKind::KwIf => "IF",
            TokenKind::KwElse => "ELSE",
            TokenKind::KwWhile => "WHILE",
            TokenKind::KwReturn => "RETURN",
            TokenKind::KwPrint => "PRINT",
            TokenKind::KwScan => "SCAN",
            TokenKind::Reserved => "RESERVED",
            TokenKind::Plus => "PLUS",
            TokenKind::Minus => "MINUS",
            TokenKind::Star => "MULTIPLY",
            TokenKind::Slash => "DIVIDE",
            TokenKind::Assign => "ASSIGN",
            TokenKind::EqEq => "EQUAL",
            TokenKind::Ne => "NOT_EQUAL",
            TokenKind::Lt => "LESS",
            TokenKind::Le => "LESS_EQUAL",
            TokenKind::Gt => "GREATER",
            TokenKind::Ge => "GREATER_EQUAL",
            TokenKind::Semi => "SEMICOLON",
            TokenKind::Comma => "COMMA",
            TokenKind::LParen => "LEFT_PAREN",
            TokenKind::RParen => "RIGHT_PAREN",
            TokenKind::LBrace => "LEFT_BRACE",
            TokenKind::RBrace => "RIGHT_BRACE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Decoded value of an `Integer` token.
    pub value: Option<i32>,
    pub start: Pos,
    pub end: Pos,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, start: Pos, end: Pos) -> Self {
        Self {
            kind,
            text: text.into(),
            value: None,
            start,
            end,
        }
    }

    pub fn integer(text: impl Into<String>, value: i32, start: Pos, end: Pos) -> Self {
        Self {
            kind: TokenKind::Integer,
            text: text.into(),
            value: Some(value),
            start,
            end,
        }
    }
}

impl core::fmt::Display for Token {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:<14} {:<12} {}-{}",
            self.kind.name(),
            self.text,
            self.start,
            self.end
        )
    }
}
