use crate::cursor::TokenCursor;
use crate::error::{CompilationError, ErrorCode};
use crate::function::{DeclareError, FunctionRegistry, ReturnKind};
use crate::instruction::{CodeBuffer, Opcode, PatchHandle};
use crate::program::{Constant, FunctionEntry, Program, FUNCTION_LEVEL};
use crate::scope::{ScopeRegistry, Symbol, SymbolKind, GLOBAL_LEVEL};
use crate::token::{Pos, Token, TokenKind};
use tracing::debug;

pub const C0_EBNF: &str = r#"
program        = { declaration } { function } ;
declaration    = [ "const" ] "int" init_decl { "," init_decl } ";" ;
init_decl      = IDENT [ "=" expression ] ;
function       = ( "int" | "void" ) IDENT "(" [ param { "," param } ] ")" compound ;
param          = [ "const" ] "int" IDENT ;
compound       = "{" { declaration } { statement } "}" ;
statement      = compound | if | while | return | scan | print
               | IDENT "=" expression ";" | call ";" | ";" ;
if             = "if" "(" condition ")" statement [ "else" statement ] ;
while          = "while" "(" condition ")" statement ;
return         = "return" [ expression ] ";" ;
scan           = "scan" "(" IDENT ")" ";" ;
print          = "print" "(" [ expression { "," expression } ] ")" ";" ;
condition      = expression [ ( "<" | "<=" | ">" | ">=" | "==" | "!=" ) expression ] ;
expression     = term { ( "+" | "-" ) term } ;
term           = unary { ( "*" | "/" ) unary } ;
unary          = [ "+" | "-" ] primary ;
primary        = "(" expression ")" | IDENT | INTEGER | call ;
call           = IDENT "(" [ expression { "," expression } ] ")" ;
"#;

/// Level of a function body; blocks nested deeper release their slots with
/// `popn` when they close.
const FUNCTION_BODY_LEVEL: u32 = 2;

/// Parses, checks and emits code for a whole token stream.
pub fn analyze(tokens: Vec<Token>) -> Result<Program, CompilationError> {
    Analyzer::new(tokens).run()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatementKind {
    Block,
    If,
    While,
    Return,
    Scan,
    Print,
    Identifier,
    Empty,
}

impl StatementKind {
    fn classify(kind: TokenKind) -> Option<Self> {
        match kind {
            TokenKind::LBrace => Some(StatementKind::Block),
            TokenKind::KwIf => Some(StatementKind::If),
            TokenKind::KwWhile => Some(StatementKind::While),
            TokenKind::KwReturn => Some(StatementKind::Return),
            TokenKind::KwScan => Some(StatementKind::Scan),
            TokenKind::KwPrint => Some(StatementKind::Print),
            TokenKind::Ident => Some(StatementKind::Identifier),
            TokenKind::Semi => Some(StatementKind::Empty),
            _ => None,
        }
    }
}

/// Per-function state while its body is analyzed.
#[derive(Debug, Clone, Copy)]
struct FunctionContext {
    return_kind: ReturnKind,
    has_value_return: bool,
    entry: usize,
}

/// Single-pass recursive-descent analyzer. One instance compiles one
/// program; `run` consumes it.
pub struct Analyzer {
    cursor: TokenCursor,
    scopes: ScopeRegistry,
    functions: FunctionRegistry,
    code: CodeBuffer,
    constants: Vec<Constant>,
    level: u32,
    current: FunctionContext,
}

impl Analyzer {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            cursor: TokenCursor::new(tokens),
            scopes: ScopeRegistry::new(),
            functions: FunctionRegistry::new(),
            code: CodeBuffer::new(),
            constants: Vec::new(),
            level: GLOBAL_LEVEL,
            current: FunctionContext {
                return_kind: ReturnKind::Void,
                has_value_return: false,
                entry: 0,
            },
        }
    }

    pub fn run(mut self) -> Result<Program, CompilationError> {
        self.analyze_program()?;
        if self.functions.lookup("main").is_none() {
            return Err(CompilationError::new(
                ErrorCode::NoMainFunction,
                self.cursor.next_pos(),
            ));
        }
        debug!(
            globals = self.scopes.global_slot_count(),
            functions = self.functions.len(),
            instructions = self.code.len(),
            "analysis complete"
        );
        // Constant i holds the name of function i.
        let functions = self
            .functions
            .into_vec()
            .into_iter()
            .map(|f| FunctionEntry {
                name_index: f.index,
                param_count: f.param_count,
                level: FUNCTION_LEVEL,
                entry: f.entry,
            })
            .collect();
        Ok(Program {
            instructions: self.code.finish(),
            constants: self.constants,
            functions,
        })
    }

    fn analyze_program(&mut self) -> Result<(), CompilationError> {
        let mut seen_function = false;
        while let Some(token) = self.cursor.next() {
            match token.kind {
                TokenKind::KwConst => {
                    if seen_function {
                        return Err(self.err(ErrorCode::Unexpected));
                    }
                    self.analyze_constant_declaration()?;
                }
                TokenKind::KwInt | TokenKind::KwVoid => {
                    let name = self.expect_ident()?;
                    match self.cursor.next() {
                        Some(t) if t.kind == TokenKind::LParen => {
                            seen_function = true;
                            let return_kind = if token.kind == TokenKind::KwInt {
                                ReturnKind::Int
                            } else {
                                ReturnKind::Void
                            };
                            self.analyze_function(return_kind, name)?;
                            continue;
                        }
                        Some(_) => self.cursor.unread(),
                        None => {}
                    }
                    if seen_function {
                        return Err(CompilationError::new(ErrorCode::Unexpected, token.start));
                    }
                    if token.kind == TokenKind::KwVoid {
                        return Err(CompilationError::new(
                            ErrorCode::InvalidVariableDeclaration,
                            token.start,
                        ));
                    }
                    self.analyze_init_declarators(SymbolKind::Var, name)?;
                }
                _ => return Err(self.err(ErrorCode::Unexpected)),
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Declarations
    // ---------------------------------------------------------------

    /// After `const`: `int` and the declarator list.
    fn analyze_constant_declaration(&mut self) -> Result<(), CompilationError> {
        match self.cursor.next() {
            Some(t) if t.kind == TokenKind::KwInt => {}
            Some(t) if t.kind == TokenKind::KwVoid => {
                return Err(self.err(ErrorCode::InvalidVariableDeclaration))
            }
            _ => return Err(self.err(ErrorCode::NoTypeSpecifier)),
        }
        let name = self.expect_ident()?;
        self.analyze_init_declarators(SymbolKind::Const, name)
    }

    /// Declarations at the head of a compound statement.
    fn analyze_local_declarations(&mut self) -> Result<(), CompilationError> {
        while let Some(kind) = self.cursor.peek_kind() {
            match kind {
                TokenKind::KwConst => {
                    self.cursor.next();
                    self.analyze_constant_declaration()?;
                }
                TokenKind::KwInt => {
                    self.cursor.next();
                    let name = self.expect_ident()?;
                    self.analyze_init_declarators(SymbolKind::Var, name)?;
                }
                TokenKind::KwVoid => {
                    self.cursor.next();
                    return Err(self.err(ErrorCode::InvalidVariableDeclaration));
                }
                _ => return Ok(()),
            }
        }
        Ok(())
    }

    fn analyze_init_declarators(
        &mut self,
        kind: SymbolKind,
        first: Token,
    ) -> Result<(), CompilationError> {
        let mut name = first;
        loop {
            self.analyze_init_declarator(kind, &name)?;
            match self.cursor.next() {
                Some(t) if t.kind == TokenKind::Comma => name = self.expect_ident()?,
                Some(t) if t.kind == TokenKind::Semi => return Ok(()),
                _ => return Err(self.err(ErrorCode::NoSemicolon)),
            }
        }
    }

    /// The slot of a new symbol is whatever its initializer leaves on the
    /// stack, so the symbol is declared only after that code is emitted.
    fn analyze_init_declarator(
        &mut self,
        kind: SymbolKind,
        name: &Token,
    ) -> Result<(), CompilationError> {
        let duplicate = self.scopes.lookup_at_level(&name.text, self.level).is_some()
            || (self.level == GLOBAL_LEVEL && self.functions.lookup(&name.text).is_some());
        if duplicate {
            return Err(CompilationError::new(
                ErrorCode::DuplicateDeclaration,
                name.start,
            ));
        }

        let has_value = if self.cursor.eat(TokenKind::Assign).is_some() {
            self.analyze_expression()?;
            true
        } else if kind == SymbolKind::Const {
            return Err(CompilationError::new(
                ErrorCode::ConstantNeedValue,
                self.cursor.next_pos(),
            ));
        } else if self.level == GLOBAL_LEVEL {
            self.code.emit(Opcode::Ipush, &[0]);
            false
        } else {
            self.code.emit(Opcode::Snew, &[1]);
            false
        };

        // Globals start out zeroed and may be written by any function.
        let initialized = has_value || self.level == GLOBAL_LEVEL;
        self.scopes
            .declare(&name.text, kind, self.level, initialized)
            .map_err(|_| CompilationError::new(ErrorCode::DuplicateDeclaration, name.start))?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Functions
    // ---------------------------------------------------------------

    /// After `type name (`.
    fn analyze_function(
        &mut self,
        return_kind: ReturnKind,
        name: Token,
    ) -> Result<(), CompilationError> {
        let taken = self.functions.lookup(&name.text).is_some()
            || self
                .scopes
                .lookup_at_level(&name.text, GLOBAL_LEVEL)
                .is_some();
        if taken {
            return Err(CompilationError::new(
                ErrorCode::DuplicateDeclaration,
                name.start,
            ));
        }

        self.scopes.begin_frame();
        self.level += 1;
        let param_count = self.analyze_parameters()?;

        let entry = self.code.begin_function();
        self.constants.push(Constant::string(name.text.as_str()));
        self.functions
            .declare(&name.text, param_count, return_kind, entry)
            .map_err(|e| {
                let code = match e {
                    DeclareError::Duplicate => ErrorCode::DuplicateDeclaration,
                    DeclareError::TableFull => ErrorCode::TooManyFunctions,
                };
                CompilationError::new(code, name.start)
            })?;
        self.current = FunctionContext {
            return_kind,
            has_value_return: false,
            entry,
        };
        debug!(function = %name.text, params = param_count, entry, "function begin");

        let close = self.analyze_compound()?;
        self.finish_function(close)?;

        self.scopes.close_level(self.level);
        self.level -= 1;
        debug!(
            function = %name.text,
            instructions = self.code.since(entry).len(),
            "function end"
        );
        Ok(())
    }

    /// After `(`, through the closing `)`.
    fn analyze_parameters(&mut self) -> Result<u16, CompilationError> {
        if self.cursor.eat(TokenKind::RParen).is_some() {
            return Ok(0);
        }
        let mut count = 0u16;
        loop {
            let kind = if self.cursor.eat(TokenKind::KwConst).is_some() {
                SymbolKind::Const
            } else {
                SymbolKind::Var
            };
            match self.cursor.next() {
                Some(t) if t.kind == TokenKind::KwInt => {}
                Some(t) if t.kind == TokenKind::KwVoid => {
                    return Err(self.err(ErrorCode::InvalidParameter))
                }
                _ => return Err(self.err(ErrorCode::NoTypeSpecifier)),
            }
            let name = self.expect_ident()?;
            self.scopes
                .declare(&name.text, kind, self.level, true)
                .map_err(|_| CompilationError::new(ErrorCode::DuplicateDeclaration, name.start))?;
            count = count.checked_add(1).ok_or_else(|| {
                CompilationError::new(ErrorCode::TooManyParameters, name.start)
            })?;
            match self.cursor.next() {
                Some(t) if t.kind == TokenKind::Comma => {}
                Some(t) if t.kind == TokenKind::RParen => return Ok(count),
                _ => return Err(self.err(ErrorCode::NoBracket)),
            }
        }
    }

    /// Checks the return contract and appends an epilogue when control can
    /// fall off the end of the body.
    fn finish_function(&mut self, close: Pos) -> Result<(), CompilationError> {
        let ctx = self.current;
        if ctx.return_kind == ReturnKind::Int && !ctx.has_value_return {
            return Err(CompilationError::new(ErrorCode::NoReturnStatement, close));
        }
        if self.end_is_reachable(ctx.entry) {
            match ctx.return_kind {
                ReturnKind::Void => {
                    self.code.emit(Opcode::Ret, &[]);
                }
                ReturnKind::Int => {
                    self.code.emit(Opcode::Ipush, &[0]);
                    self.code.emit(Opcode::Iret, &[]);
                }
            }
        }
        Ok(())
    }

    fn end_is_reachable(&self, entry: usize) -> bool {
        let run = self.code.since(entry);
        let end = self.code.next_offset() as i32;
        let falls_through = run.last().map_or(true, |i| !i.opcode.is_return());
        falls_through
            || run
                .iter()
                .any(|i| i.opcode.is_jump() && i.operands.first() == Some(&end))
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    /// `{ declarations statements }`. Returns the position of the closing
    /// brace.
    fn analyze_compound(&mut self) -> Result<Pos, CompilationError> {
        if self.cursor.eat(TokenKind::LBrace).is_none() {
            return Err(CompilationError::new(
                ErrorCode::NoBigBracket,
                self.cursor.next_pos(),
            ));
        }
        self.level += 1;
        self.analyze_local_declarations()?;

        let close = loop {
            match self.cursor.peek_kind() {
                Some(TokenKind::RBrace) => {
                    self.cursor.next();
                    break self.cursor.pos();
                }
                Some(_) => self.analyze_statement()?,
                None => {
                    return Err(CompilationError::new(
                        ErrorCode::NoBigBracket,
                        self.cursor.next_pos(),
                    ))
                }
            }
        };

        let released = self.scopes.close_level(self.level);
        if self.level > FUNCTION_BODY_LEVEL && released > 0 {
            self.code.emit(Opcode::Popn, &[released as i32]);
        }
        self.level -= 1;
        Ok(close)
    }

    fn analyze_statement(&mut self) -> Result<(), CompilationError> {
        let Some(stmt) = self.cursor.peek_kind().and_then(StatementKind::classify) else {
            self.cursor.next();
            return Err(self.err(ErrorCode::InvalidStatement));
        };
        match stmt {
            StatementKind::Block => {
                self.analyze_compound()?;
            }
            StatementKind::If => self.analyze_if()?,
            StatementKind::While => self.analyze_while()?,
            StatementKind::Return => self.analyze_return()?,
            StatementKind::Scan => self.analyze_scan()?,
            StatementKind::Print => self.analyze_print()?,
            StatementKind::Identifier => self.analyze_identifier_statement()?,
            StatementKind::Empty => {
                self.cursor.next();
            }
        }
        Ok(())
    }

    fn analyze_if(&mut self) -> Result<(), CompilationError> {
        self.cursor.next();
        self.expect(TokenKind::LParen, ErrorCode::NoBracket)?;
        let on_false = self.analyze_condition()?;
        self.expect(TokenKind::RParen, ErrorCode::NoBracket)?;
        self.analyze_statement()?;

        if self.cursor.eat(TokenKind::KwElse).is_some() {
            let skip_else = self.code.emit_jump(Opcode::Jmp);
            let else_start = self.code.next_offset();
            self.code.patch(on_false, else_start);
            self.analyze_statement()?;
            let end = self.code.next_offset();
            self.code.patch(skip_else, end);
        } else {
            let end = self.code.next_offset();
            self.code.patch(on_false, end);
        }
        Ok(())
    }

    fn analyze_while(&mut self) -> Result<(), CompilationError> {
        self.cursor.next();
        let condition = self.code.next_offset();
        self.expect(TokenKind::LParen, ErrorCode::NoBracket)?;
        let on_exit = self.analyze_condition()?;
        self.expect(TokenKind::RParen, ErrorCode::NoBracket)?;
        self.analyze_statement()?;
        self.code.emit(Opcode::Jmp, &[condition as i32]);
        let end = self.code.next_offset();
        self.code.patch(on_exit, end);
        Ok(())
    }

    /// Emits the condition and the jump taken when it is false.
    fn analyze_condition(&mut self) -> Result<PatchHandle, CompilationError> {
        self.analyze_expression()?;
        let Some(branch) = self.cursor.peek_kind().and_then(branch_if_false) else {
            return Ok(self.code.emit_jump(Opcode::Je));
        };
        self.cursor.next();
        self.analyze_expression()?;
        self.code.emit(Opcode::Icmp, &[]);
        Ok(self.code.emit_jump(branch))
    }

    fn analyze_return(&mut self) -> Result<(), CompilationError> {
        self.cursor.next();
        if self.cursor.eat(TokenKind::Semi).is_some() {
            if self.current.return_kind == ReturnKind::Int {
                return Err(self.err(ErrorCode::IncorrectReturnType));
            }
            self.code.emit(Opcode::Ret, &[]);
            return Ok(());
        }

        if self.current.return_kind == ReturnKind::Void {
            return Err(CompilationError::new(
                ErrorCode::IncorrectReturnType,
                self.cursor.next_pos(),
            ));
        }
        self.analyze_expression()?;
        self.code.emit(Opcode::Iret, &[]);
        self.current.has_value_return = true;
        self.expect(TokenKind::Semi, ErrorCode::NoSemicolon)?;
        Ok(())
    }

    fn analyze_scan(&mut self) -> Result<(), CompilationError> {
        self.cursor.next();
        self.expect(TokenKind::LParen, ErrorCode::NoBracket)?;
        let name = self.expect_ident()?;
        let address = self.assignment_target(&name)?;
        self.code.emit(Opcode::Loada, &address);
        self.code.emit(Opcode::Iscan, &[]);
        self.code.emit(Opcode::Istore, &[]);
        self.scopes.mark_initialized(&name.text);
        self.expect(TokenKind::RParen, ErrorCode::NoBracket)?;
        self.expect(TokenKind::Semi, ErrorCode::NoSemicolon)?;
        Ok(())
    }

    fn analyze_print(&mut self) -> Result<(), CompilationError> {
        self.cursor.next();
        self.expect(TokenKind::LParen, ErrorCode::NoBracket)?;
        if self.cursor.eat(TokenKind::RParen).is_none() {
            loop {
                self.analyze_expression()?;
                self.code.emit(Opcode::Iprint, &[]);
                match self.cursor.next() {
                    Some(t) if t.kind == TokenKind::Comma => {
                        self.code.emit(Opcode::Bipush, &[i32::from(b' ')]);
                        self.code.emit(Opcode::Cprint, &[]);
                    }
                    Some(t) if t.kind == TokenKind::RParen => break,
                    _ => return Err(self.err(ErrorCode::NoBracket)),
                }
            }
        }
        self.code.emit(Opcode::Printl, &[]);
        self.expect(TokenKind::Semi, ErrorCode::NoSemicolon)?;
        Ok(())
    }

    /// Assignment or call statement.
    fn analyze_identifier_statement(&mut self) -> Result<(), CompilationError> {
        let name = self.expect_ident()?;
        match self.cursor.next() {
            Some(t) if t.kind == TokenKind::Assign => {
                let address = self.assignment_target(&name)?;
                self.code.emit(Opcode::Loada, &address);
                self.analyze_expression()?;
                self.code.emit(Opcode::Istore, &[]);
                self.scopes.mark_initialized(&name.text);
            }
            Some(t) if t.kind == TokenKind::LParen => {
                if self.analyze_call(&name)? == ReturnKind::Int {
                    self.code.emit(Opcode::Pop, &[]);
                }
            }
            _ => return Err(self.err(ErrorCode::InvalidStatement)),
        }
        self.expect(TokenKind::Semi, ErrorCode::NoSemicolon)?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn analyze_expression(&mut self) -> Result<(), CompilationError> {
        self.analyze_term()?;
        while let Some(op) = self.cursor.peek_kind().and_then(additive) {
            self.cursor.next();
            self.analyze_term()?;
            self.code.emit(op, &[]);
        }
        Ok(())
    }

    fn analyze_term(&mut self) -> Result<(), CompilationError> {
        self.analyze_unary()?;
        while let Some(op) = self.cursor.peek_kind().and_then(multiplicative) {
            self.cursor.next();
            self.analyze_unary()?;
            self.code.emit(op, &[]);
        }
        Ok(())
    }

    fn analyze_unary(&mut self) -> Result<(), CompilationError> {
        let negate = match self.cursor.peek_kind() {
            Some(TokenKind::Plus) => {
                self.cursor.next();
                false
            }
            Some(TokenKind::Minus) => {
                self.cursor.next();
                true
            }
            _ => false,
        };
        self.analyze_primary()?;
        if negate {
            self.code.emit(Opcode::Ineg, &[]);
        }
        Ok(())
    }

    fn analyze_primary(&mut self) -> Result<(), CompilationError> {
        let Some(token) = self.cursor.next() else {
            return Err(self.err(ErrorCode::IncompleteExpression));
        };
        match (token.kind, token.value) {
            (TokenKind::LParen, _) => {
                self.analyze_expression()?;
                self.expect(TokenKind::RParen, ErrorCode::NoBracket)?;
            }
            (TokenKind::Integer, Some(value)) => {
                self.code.emit(Opcode::Ipush, &[value]);
            }
            (TokenKind::Ident, _) => {
                if self.cursor.eat(TokenKind::LParen).is_some() {
                    if self.analyze_call(&token)? == ReturnKind::Void {
                        return Err(CompilationError::new(ErrorCode::IncorrectType, token.start));
                    }
                } else {
                    self.load_symbol(&token)?;
                }
            }
            _ => return Err(self.err(ErrorCode::IncompleteExpression)),
        }
        Ok(())
    }

    /// After `name (`: arguments, arity check and the `call`.
    fn analyze_call(&mut self, name: &Token) -> Result<ReturnKind, CompilationError> {
        let Some(function) = self.functions.lookup(&name.text) else {
            return Err(CompilationError::new(
                ErrorCode::FunctionNotDeclared,
                name.start,
            ));
        };
        let (index, param_count, return_kind) =
            (function.index, function.param_count, function.return_kind);
        if self.scopes.lookup(&name.text).is_some() {
            return Err(CompilationError::new(
                ErrorCode::FunctionShadowed,
                name.start,
            ));
        }

        let mut args = 0u16;
        if self.cursor.eat(TokenKind::RParen).is_none() {
            loop {
                self.analyze_expression()?;
                // No function takes more than u16::MAX parameters.
                args = args
                    .checked_add(1)
                    .ok_or_else(|| self.err(ErrorCode::IncorrectParamCount))?;
                match self.cursor.next() {
                    Some(t) if t.kind == TokenKind::Comma => {}
                    Some(t) if t.kind == TokenKind::RParen => break,
                    _ => return Err(self.err(ErrorCode::NoBracket)),
                }
            }
        }
        if args != param_count {
            return Err(self.err(ErrorCode::IncorrectParamCount));
        }
        self.code.emit(Opcode::Call, &[i32::from(index)]);
        Ok(return_kind)
    }

    fn load_symbol(&mut self, name: &Token) -> Result<(), CompilationError> {
        let Some(symbol) = self.scopes.lookup(&name.text) else {
            return Err(CompilationError::new(ErrorCode::NotDeclared, name.start));
        };
        if !symbol.initialized {
            return Err(CompilationError::new(
                ErrorCode::NotInitialized,
                name.start,
            ));
        }
        let address = self.address_of(symbol);
        self.code.emit(Opcode::Loada, &address);
        self.code.emit(Opcode::Iload, &[]);
        Ok(())
    }

    fn assignment_target(&self, name: &Token) -> Result<[i32; 2], CompilationError> {
        if let Some(symbol) = self.scopes.lookup_variable(&name.text) {
            return Ok(self.address_of(symbol));
        }
        let code = if self.scopes.lookup_constant(&name.text).is_some() {
            ErrorCode::AssignToConstant
        } else {
            ErrorCode::NotDeclared
        };
        Err(CompilationError::new(code, name.start))
    }

    /// `loada` operands: level difference and slot.
    fn address_of(&self, symbol: &Symbol) -> [i32; 2] {
        let level_diff = i32::from(symbol.is_global() && self.level > GLOBAL_LEVEL);
        [level_diff, symbol.slot as i32]
    }

    // ---------------------------------------------------------------
    // Token helpers
    // ---------------------------------------------------------------

    fn expect(&mut self, kind: TokenKind, code: ErrorCode) -> Result<Token, CompilationError> {
        match self.cursor.next() {
            Some(t) if t.kind == kind => Ok(t),
            _ => Err(self.err(code)),
        }
    }

    fn expect_ident(&mut self) -> Result<Token, CompilationError> {
        self.expect(TokenKind::Ident, ErrorCode::NeedIdentifier)
    }

    fn err(&self, code: ErrorCode) -> CompilationError {
        CompilationError::new(code, self.cursor.pos())
    }
}

/// Jump taken when `lhs <op> rhs` is false, after `icmp`.
fn branch_if_false(op: TokenKind) -> Option<Opcode> {
    match op {
        TokenKind::Lt => Some(Opcode::Jge),
        TokenKind::Le => Some(Opcode::Jg),
        TokenKind::Gt => Some(Opcode::Jle),
        TokenKind::Ge => Some(Opcode::Jl),
        TokenKind::EqEq => Some(Opcode::Jne),
        TokenKind::Ne => Some(Opcode::Je),
        _ => None,
    }
}

fn additive(op: TokenKind) -> Option<Opcode> {
    match op {
        TokenKind::Plus => Some(Opcode::Iadd),
        TokenKind::Minus => Some(Opcode::Isub),
        _ => None,
    }
}

fn multiplicative(op: TokenKind) -> Option<Opcode> {
    match op {
        TokenKind::Star => Some(Opcode::Imul),
        TokenKind::Slash => Some(Opcode::Idiv),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;
    use crate::scanner::scan;

    fn compile(src: &str) -> Result<Program, CompilationError> {
        analyze(scan(src).expect("scan"))
    }

    fn ops(code: &[Instruction]) -> Vec<(Opcode, Vec<i32>)> {
        code.iter().map(|i| (i.opcode, i.operands.clone())).collect()
    }

    fn fail(src: &str) -> CompilationError {
        compile(src).expect_err("must fail")
    }

    #[test]
    fn arithmetic_print_and_return() {
        let p = compile("int main() { int x = 1 + 2 * 3; print(x); return 0; }").expect("compile");
        let main = p.function_code(0).expect("main");
        assert_eq!(
            ops(main),
            vec![
                (Opcode::Ipush, vec![1]),
                (Opcode::Ipush, vec![2]),
                (Opcode::Ipush, vec![3]),
                (Opcode::Imul, vec![]),
                (Opcode::Iadd, vec![]),
                (Opcode::Loada, vec![0, 0]),
                (Opcode::Iload, vec![]),
                (Opcode::Iprint, vec![]),
                (Opcode::Printl, vec![]),
                (Opcode::Ipush, vec![0]),
                (Opcode::Iret, vec![]),
            ]
        );
        let offsets: Vec<u32> = main.iter().map(|i| i.offset).collect();
        assert_eq!(offsets, (0..11).collect::<Vec<u32>>());
    }

    #[test]
    fn trivial_void_main_with_constant_globals() {
        let p = compile("const int a = 1, b = 2; void main() {}").expect("compile");
        let sentinels = p
            .instructions
            .iter()
            .filter(|i| i.opcode == Opcode::Boundary)
            .count();
        assert_eq!(sentinels, 1);
        assert_eq!(ops(p.start()), vec![(Opcode::Ipush, vec![1]), (Opcode::Ipush, vec![2])]);
        assert_eq!(p.functions.len(), 1);
        assert_eq!(p.functions[0].entry, 3);
        assert_eq!(p.functions[0].level, 1);
        assert_eq!(ops(p.function_code(0).expect("main")), vec![(Opcode::Ret, vec![])]);
        assert_eq!(p.constants, vec![Constant::string("main")]);
    }

    #[test]
    fn int_main_ends_with_iret_and_no_epilogue() {
        let p = compile("int main() { return 7; }").expect("compile");
        assert_eq!(
            ops(p.function_code(0).expect("main")),
            vec![(Opcode::Ipush, vec![7]), (Opcode::Iret, vec![])]
        );
    }

    #[test]
    fn duplicate_declaration_reported_at_second_name() {
        let err = fail("void main() {\n int x;\n const int x = 1;\n}");
        assert_eq!(err.code, ErrorCode::DuplicateDeclaration);
        assert_eq!(err.pos(), Pos::new(3, 12));
    }

    #[test]
    fn nested_block_symbols_do_not_leak() {
        let err = fail("void main() { { int y = 1; } print(y); }");
        assert_eq!(err.code, ErrorCode::NotDeclared);

        let p = compile("void main() { int x = 1; { int x = 2; print(x); } print(x); }")
            .expect("compile");
        let main = ops(p.function_code(0).expect("main"));
        assert_eq!(main[1], (Opcode::Ipush, vec![2]));
        assert_eq!(main[2], (Opcode::Loada, vec![0, 1]));
        assert_eq!(main[6], (Opcode::Popn, vec![1]));
        assert_eq!(main[7], (Opcode::Loada, vec![0, 0]));
    }

    #[test]
    fn if_else_jumps_skip_exactly_one_arm() {
        let p = compile("void main() { int x = 1; if (x < 2) print(1); else print(2); print(3); }")
            .expect("compile");
        let main = ops(p.function_code(0).expect("main"));
        // 0 ipush 1 | 1 loada | 2 iload | 3 ipush 2 | 4 icmp | 5 jge 10
        // 6 ipush 1 | 7 iprint | 8 printl | 9 jmp 13
        // 10 ipush 2 | 11 iprint | 12 printl | 13 ipush 3 ...
        assert_eq!(main[4], (Opcode::Icmp, vec![]));
        assert_eq!(main[5], (Opcode::Jge, vec![10]));
        assert_eq!(main[9], (Opcode::Jmp, vec![13]));
        assert_eq!(main[13], (Opcode::Ipush, vec![3]));
        assert_eq!(main.last(), Some(&(Opcode::Ret, vec![])));
    }

    #[test]
    fn if_without_else_targets_next_instruction() {
        let p = compile("void main() { if (1) print(1); print(2); }").expect("compile");
        let main = ops(p.function_code(0).expect("main"));
        assert_eq!(main[1], (Opcode::Je, vec![5]));
        assert_eq!(main[5], (Opcode::Ipush, vec![2]));
    }

    #[test]
    fn while_jumps_back_to_condition() {
        let p = compile("void main() { int i = 0; while (i != 3) i = i + 1; }").expect("compile");
        let main = ops(p.function_code(0).expect("main"));
        // 1 loada | 2 iload | 3 ipush 3 | 4 icmp | 5 je 13 | 6..11 body | 12 jmp 1 | 13 ret
        assert_eq!(main[5], (Opcode::Je, vec![13]));
        assert_eq!(main[12], (Opcode::Jmp, vec![1]));
        assert_eq!(main[13], (Opcode::Ret, vec![]));
    }

    #[test]
    fn relational_operators_branch_on_negation() {
        for (op, branch) in [
            ("<", Opcode::Jge),
            ("<=", Opcode::Jg),
            (">", Opcode::Jle),
            (">=", Opcode::Jl),
            ("==", Opcode::Jne),
            ("!=", Opcode::Je),
        ] {
            let src = format!("void main() {{ if (1 {} 2) ; }}", op);
            let p = compile(&src).expect("compile");
            let main = p.function_code(0).expect("main");
            assert_eq!(main[3].opcode, branch, "operator {}", op);
        }
    }

    #[test]
    fn return_contracts() {
        assert_eq!(
            fail("void f() { return 5; } void main() {}").code,
            ErrorCode::IncorrectReturnType
        );
        assert_eq!(
            fail("int f() { return; } void main() {}").code,
            ErrorCode::IncorrectReturnType
        );
        let err = fail("int g() {}\nvoid main() {}");
        assert_eq!(err.code, ErrorCode::NoReturnStatement);
        assert_eq!(err.pos(), Pos::new(1, 10));
    }

    #[test]
    fn reachable_end_of_int_function_gets_epilogue() {
        let p = compile("int f(int x) { if (x) return 1; } void main() {}").expect("compile");
        let f = ops(p.function_code(0).expect("f"));
        assert_eq!(
            &f[f.len() - 2..],
            &[(Opcode::Ipush, vec![0]), (Opcode::Iret, vec![])]
        );
    }

    #[test]
    fn missing_main_is_reported_at_end_of_input() {
        let err = fail("int g;\nvoid f() {}");
        assert_eq!(err.code, ErrorCode::NoMainFunction);
        assert_eq!(err.pos(), Pos::new(2, 12));
    }

    #[test]
    fn calls_check_arity_and_emit_index() {
        let p = compile(
            "int add(int a, int b) { return a + b; } void main() { add(1, 2); print(add(3, 4)); }",
        )
        .expect("compile");
        let main = ops(p.function_code(1).expect("main"));
        assert_eq!(main[2], (Opcode::Call, vec![0]));
        assert_eq!(main[3], (Opcode::Pop, vec![]));
        assert_eq!(main[6], (Opcode::Call, vec![0]));
        assert_eq!(p.functions[0].param_count, 2);

        assert_eq!(
            fail("void f(int a) {} void main() { f(); }").code,
            ErrorCode::IncorrectParamCount
        );
        assert_eq!(fail("void main() { g(); }").code, ErrorCode::FunctionNotDeclared);
    }

    #[test]
    fn recursion_resolves_during_own_body() {
        let p = compile("int fact(int n) { if (n <= 1) return 1; return n * fact(n - 1); } void main() {}")
            .expect("compile");
        assert!(p
            .function_code(0)
            .expect("fact")
            .iter()
            .any(|i| i.opcode == Opcode::Call && i.operands == vec![0]));
    }

    #[test]
    fn void_call_inside_expression_is_rejected() {
        let err = fail("void f() {} void main() { int x = f(); }");
        assert_eq!(err.code, ErrorCode::IncorrectType);
    }

    #[test]
    fn shadowed_function_name_cannot_be_called() {
        let err = fail("void f() {} void main() { int f = 1; f(); }");
        assert_eq!(err.code, ErrorCode::FunctionShadowed);
    }

    #[test]
    fn constants_cannot_be_written() {
        assert_eq!(
            fail("const int c = 1; void main() { c = 2; }").code,
            ErrorCode::AssignToConstant
        );
        assert_eq!(
            fail("void main() { const int c = 1; scan(c); }").code,
            ErrorCode::AssignToConstant
        );
        assert_eq!(
            fail("void main() { const int c; }").code,
            ErrorCode::ConstantNeedValue
        );
    }

    #[test]
    fn globals_are_addressed_one_level_up() {
        let p = compile("int g; void main() { g = 5; print(g); }").expect("compile");
        assert_eq!(ops(p.start()), vec![(Opcode::Ipush, vec![0])]);
        let main = ops(p.function_code(0).expect("main"));
        assert_eq!(main[0], (Opcode::Loada, vec![1, 0]));
        assert_eq!(main[3], (Opcode::Loada, vec![1, 0]));
    }

    #[test]
    fn scan_stores_through_address() {
        let p = compile("void main() { int x; scan(x); print(x); }").expect("compile");
        let main = ops(p.function_code(0).expect("main"));
        assert_eq!(
            &main[..4],
            &[
                (Opcode::Snew, vec![1]),
                (Opcode::Loada, vec![0, 0]),
                (Opcode::Iscan, vec![]),
                (Opcode::Istore, vec![]),
            ]
        );
    }

    #[test]
    fn uninitialized_local_read_is_rejected() {
        let err = fail("void main() { int x; print(x); }");
        assert_eq!(err.code, ErrorCode::NotInitialized);
        compile("int g; void main() { print(g); }").expect("globals are zeroed");
    }

    #[test]
    fn print_separates_items_with_spaces() {
        let p = compile("void main() { print(1, 2); }").expect("compile");
        let main = ops(p.function_code(0).expect("main"));
        assert_eq!(
            main,
            vec![
                (Opcode::Ipush, vec![1]),
                (Opcode::Iprint, vec![]),
                (Opcode::Bipush, vec![32]),
                (Opcode::Cprint, vec![]),
                (Opcode::Ipush, vec![2]),
                (Opcode::Iprint, vec![]),
                (Opcode::Printl, vec![]),
                (Opcode::Ret, vec![]),
            ]
        );
    }

    #[test]
    fn unary_minus_negates_after_operand() {
        let p = compile("int main() { return -(2 + 3); }").expect("compile");
        let main = ops(p.function_code(0).expect("main"));
        assert_eq!(main[3], (Opcode::Ineg, vec![]));
    }

    #[test]
    fn structural_errors() {
        assert_eq!(fail("void main() { print(1) }").code, ErrorCode::NoSemicolon);
        assert_eq!(fail("void main() { print(1;").code, ErrorCode::NoBracket);
        assert_eq!(fail("void main() { int x = ; }").code, ErrorCode::IncompleteExpression);
        assert_eq!(fail("void main() { ").code, ErrorCode::NoBigBracket);
        assert_eq!(fail("int 3;").code, ErrorCode::NeedIdentifier);
        assert_eq!(fail("void main() { for }").code, ErrorCode::InvalidStatement);
        assert_eq!(fail("void main() { x; }").code, ErrorCode::InvalidStatement);
        assert_eq!(fail("void x; void main() {}").code, ErrorCode::InvalidVariableDeclaration);
        assert_eq!(fail("void f(void) {} void main() {}").code, ErrorCode::InvalidParameter);
        assert_eq!(fail("void f(x) {} void main() {}").code, ErrorCode::NoTypeSpecifier);
        assert_eq!(fail("void main() {} int late;").code, ErrorCode::Unexpected);
        assert_eq!(fail("void main() {} void main() {}").code, ErrorCode::DuplicateDeclaration);
    }

    #[test]
    fn parameter_count_past_u16_is_rejected() {
        let mut src = String::from("void f(");
        for i in 0..u16::MAX {
            src.push_str(&format!("int p{i}, "));
        }
        src.push_str("\nint last) {} void main() {}");
        let err = fail(&src);
        assert_eq!(err.code, ErrorCode::TooManyParameters);
        assert_eq!(err.pos(), Pos::new(2, 5));
    }

    #[test]
    fn argument_count_past_u16_is_rejected() {
        let mut src = String::from("void f() {} void main() { f(");
        src.push_str(&"1, ".repeat(usize::from(u16::MAX)));
        src.push_str("\n7); }");
        let err = fail(&src);
        assert_eq!(err.code, ErrorCode::IncorrectParamCount);
        assert_eq!(err.pos(), Pos::new(2, 1));
    }

    #[test]
    fn function_clashing_with_global_is_duplicate() {
        let err = fail("int f; void f() {} void main() {}");
        assert_eq!(err.code, ErrorCode::DuplicateDeclaration);
        assert_eq!(err.pos(), Pos::new(1, 13));
    }
}
