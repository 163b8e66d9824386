use crate::token::Pos;
use thiserror::Error;

/// Every way a compilation can fail.
///
/// Codes are grouped by range: lexical (E0xx), structural (E1xx),
/// declaration (E2xx), reference (E3xx), control flow and function
/// contracts (E4xx), generic (E5xx).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Error)]
pub enum ErrorCode {
    // Lexical errors (E001-E099)
    #[error("invalid input")]
    InvalidInput,
    #[error("integer literal overflows a 32-bit int")]
    IntegerOverflow,
    #[error("unterminated block comment")]
    UnterminatedComment,

    // Structural errors (E100-E199)
    #[error("need an identifier here")]
    NeedIdentifier,
    #[error("missing ';'")]
    NoSemicolon,
    #[error("missing parenthesis")]
    NoBracket,
    #[error("missing brace")]
    NoBigBracket,
    #[error("need a type specifier here")]
    NoTypeSpecifier,
    #[error("incomplete expression")]
    IncompleteExpression,

    // Declaration errors (E200-E299)
    #[error("duplicate declaration")]
    DuplicateDeclaration,
    #[error("constant needs a value")]
    ConstantNeedValue,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("invalid variable declaration")]
    InvalidVariableDeclaration,
    #[error("too many parameters")]
    TooManyParameters,
    #[error("too many functions")]
    TooManyFunctions,

    // Reference errors (E300-E399)
    #[error("identifier not declared")]
    NotDeclared,
    #[error("identifier is not a function")]
    FunctionNotDeclared,
    #[error("function name is shadowed by a variable")]
    FunctionShadowed,
    #[error("incorrect number of arguments")]
    IncorrectParamCount,
    #[error("assignment to constant")]
    AssignToConstant,
    #[error("variable used before initialization")]
    NotInitialized,
    #[error("incorrect type")]
    IncorrectType,

    // Control flow and function contract errors (E400-E499)
    #[error("no main function in this program")]
    NoMainFunction,
    #[error("no return statement in this function")]
    NoReturnStatement,
    #[error("incorrect return type")]
    IncorrectReturnType,

    // Generic errors (E500-E599)
    #[error("unexpected token")]
    Unexpected,
    #[error("invalid statement")]
    InvalidStatement,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "E001",
            ErrorCode::IntegerOverflow => "E002",
            ErrorCode::UnterminatedComment => "E003",
            ErrorCode::NeedIdentifier => "E101",
            ErrorCode::NoSemicolon => "E102",
            ErrorCode::NoBracket => "E103",
            ErrorCode::NoBigBracket => "E104",
            ErrorCode::NoTypeSpecifier => "E105",
            ErrorCode::IncompleteExpression => "E106",
            ErrorCode::DuplicateDeclaration => "E201",
            ErrorCode::ConstantNeedValue => "E202",
            ErrorCode::InvalidParameter => "E203",
            ErrorCode::InvalidVariableDeclaration => "E204",
            ErrorCode::TooManyParameters => "E205",
            ErrorCode::TooManyFunctions => "E206",
            ErrorCode::NotDeclared => "E301",
            ErrorCode::FunctionNotDeclared => "E302",
            ErrorCode::FunctionShadowed => "E303",
            ErrorCode::IncorrectParamCount => "E304",
            ErrorCode::AssignToConstant => "E305",
            ErrorCode::NotInitialized => "E306",
            ErrorCode::IncorrectType => "E307",
            ErrorCode::NoMainFunction => "E401",
            ErrorCode::NoReturnStatement => "E402",
            ErrorCode::IncorrectReturnType => "E403",
            ErrorCode::Unexpected => "E501",
            ErrorCode::InvalidStatement => "E502",
        }
    }
}

/// The single error a failed compilation reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}, column {column}: {code} [{}]", .code.as_str())]
pub struct CompilationError {
    pub code: ErrorCode,
    pub line: usize,
    pub column: usize,
}

impl CompilationError {
    pub fn new(code: ErrorCode, pos: Pos) -> Self {
        Self {
            code,
            line: pos.line,
            column: pos.column,
        }
    }

    pub fn pos(&self) -> Pos {
        Pos::new(self.line, self.column)
    }
}
