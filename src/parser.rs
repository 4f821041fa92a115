//! Parser for BSQ
//!
//! A recursive descent parser that converts tokens into an AST. Besides the
//! grammar proper it resolves local variables, infers which subroutines are
//! functions (an assignment targets the subroutine's own name), registers
//! built-in subroutines on first reference, and patches forward references
//! to subroutines defined later in the file.

use crate::ast::{
    identifier_type, names_equal, Apply, DataType, Expr, ExprKind, Operation, Program, Statement,
    SubId, Subroutine, VarId,
};
use crate::lexer::Lexer;
use crate::token::{Token, TokenKind};
use thiserror::Error;

/// Built-in subroutines, matched by exact name
const BUILTINS: &[(&str, &[&str])] = &[
    ("SQR", &["a"]),
    ("MID$", &["a$", "b", "c"]),
    ("STR$", &["a"]),
];

/// Parser errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("expected {expected}, got {found}")]
    UnexpectedToken { expected: String, found: String },

    #[error("{0} — subroutine with this name is already defined")]
    NameAlreadyDefined(String),

    #[error("{0} — variable not defined")]
    UndefinedVariable(String),

    #[error("subroutine name used as an rvalue")]
    SubroutineNameAsRvalue,

    #[error("{}", unresolved_report(.0))]
    UnresolvedReferences(Vec<String>),
}

fn unresolved_report(names: &[String]) -> String {
    names
        .iter()
        .map(|n| format!("{} — unresolved subroutine reference", n))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse result
pub type ParseResult<T> = Result<T, ParseError>;

/// The parser for BSQ
pub struct Parser<'src> {
    lexer: Lexer<'src>,
    current: Token,
    program: Program,
    /// Index of the subroutine currently being parsed
    current_sub: SubId,
}

impl<'src> Parser<'src> {
    /// Create a new parser for one source file
    pub fn new(source: &'src str, filename: impl Into<String>) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            program: Program::new(filename),
            current_sub: 0,
        }
    }

    /// Parse the whole file into a program
    pub fn parse(mut self) -> ParseResult<Program> {
        self.parse_program()?;

        let unresolved: Vec<String> = self
            .program
            .subs
            .iter()
            .filter(|s| !s.is_defined)
            .map(|s| s.name.clone())
            .collect();
        if !unresolved.is_empty() {
            return Err(ParseError::UnresolvedReferences(unresolved));
        }

        Ok(self.program)
    }

    // ============ Token plumbing ============

    fn advance(&mut self) -> Token {
        let previous = self.current.clone();
        self.current = self.lexer.next_token();
        previous
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    /// Consume the current token if it matches, otherwise error
    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::UnexpectedToken {
                expected: kind.to_string(),
                found: self.current_text().to_string(),
            })
        }
    }

    fn current_text(&self) -> &'src str {
        if self.current.kind == TokenKind::Eof {
            "end of file"
        } else {
            self.current.text(self.lexer.source())
        }
    }

    /// The current token's text with string-literal quotes stripped
    fn literal_text(&self) -> &'src str {
        let text = self.current.text(self.lexer.source());
        &text[1..text.len() - 1]
    }

    // ============ Grammar ============

    /// Program = [NewLines] { Subroutine NewLines } EOF
    fn parse_program(&mut self) -> ParseResult<()> {
        if self.check(TokenKind::Newline) {
            self.parse_newlines()?;
        }
        while !self.check(TokenKind::Eof) {
            self.parse_subroutine()?;
            self.parse_newlines()?;
        }
        self.expect(TokenKind::Eof)?;
        Ok(())
    }

    /// Subroutine = 'SUB' IDENT ['(' [IdentList] ')'] Statements 'END' 'SUB'
    fn parse_subroutine(&mut self) -> ParseResult<()> {
        self.expect(TokenKind::Sub)?;
        let name = self.current_text().to_string();
        self.expect(TokenKind::Ident)?;

        let mut parameters = Vec::new();
        if self.check(TokenKind::LParen) {
            self.expect(TokenKind::LParen)?;
            if self.check(TokenKind::Ident) {
                parameters.push(self.current_text().to_string());
                self.expect(TokenKind::Ident)?;
                while self.check(TokenKind::Comma) {
                    self.expect(TokenKind::Comma)?;
                    parameters.push(self.current_text().to_string());
                    self.expect(TokenKind::Ident)?;
                }
            }
            self.expect(TokenKind::RParen)?;
        }

        // A placeholder created by an earlier forward reference is adopted
        // in place so every Apply pointing at it stays valid.
        self.current_sub = match self.program.find_sub(&name) {
            Some(id) if self.program.subs[id].is_defined => {
                return Err(ParseError::NameAlreadyDefined(name));
            }
            Some(id) => {
                let sub = &mut self.program.subs[id];
                *sub = Subroutine::new(name, parameters);
                id
            }
            None => {
                self.program.subs.push(Subroutine::new(name, parameters));
                self.program.subs.len() - 1
            }
        };
        self.program.subs[self.current_sub].is_defined = true;

        let body = self.parse_statements()?;
        self.program.subs[self.current_sub].body = body;

        self.expect(TokenKind::End)?;
        self.expect(TokenKind::Sub)?;
        Ok(())
    }

    /// Statements = NewLines { Statement NewLines }
    fn parse_statements(&mut self) -> ParseResult<Statement> {
        self.parse_newlines()?;

        let mut items = Vec::new();
        loop {
            let statement = match self.current.kind {
                TokenKind::Let => self.parse_let()?,
                TokenKind::Dim => self.parse_dim()?,
                TokenKind::Input => self.parse_input()?,
                TokenKind::Print => self.parse_print()?,
                TokenKind::If => self.parse_if()?,
                TokenKind::While => self.parse_while()?,
                TokenKind::For => self.parse_for()?,
                TokenKind::Call => self.parse_call()?,
                _ => break,
            };
            items.push(statement);
            self.parse_newlines()?;
        }

        Ok(Statement::Seq(items))
    }

    /// Let = 'LET' IDENT ['(' Expression ')'] '=' Expression
    fn parse_let(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::Let)?;
        let name = self.current_text().to_string();
        self.expect(TokenKind::Ident)?;

        let mut index = None;
        if self.check(TokenKind::LParen) {
            self.expect(TokenKind::LParen)?;
            index = Some(self.parse_expression()?);
            self.expect(TokenKind::RParen)?;
        }

        self.expect(TokenKind::Eq)?;
        let value = self.parse_expression()?;

        // The target is created only after the right-hand side has been
        // parsed, so a fresh variable cannot appear in its own initializer.
        let var = self.create_or_get_local(&name, false)?;

        if index.is_none() && names_equal(&name, &self.program.subs[self.current_sub].name) {
            self.program.subs[self.current_sub].is_returning_value = true;
        }

        Ok(Statement::Let { var, index, value })
    }

    /// Dim = 'DIM' IDENT '(' NUMBER ')'
    fn parse_dim(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::Dim)?;
        let name = self.current_text().to_string();
        self.expect(TokenKind::Ident)?;
        self.expect(TokenKind::LParen)?;
        let size = self.parse_number_literal()?;
        self.expect(TokenKind::RParen)?;

        let var = self.create_or_get_local(&name, false)?;
        Ok(Statement::Dim { var, size })
    }

    /// Input = 'INPUT' [TEXT ','] IDENT ['(' Expression ')']
    fn parse_input(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::Input)?;

        let mut prompt = String::from("?");
        if self.check(TokenKind::Text) {
            prompt = self.literal_text().to_string();
            self.expect(TokenKind::Text)?;
            self.expect(TokenKind::Comma)?;
        }

        let name = self.current_text().to_string();
        self.expect(TokenKind::Ident)?;

        let mut index = None;
        if self.check(TokenKind::LParen) {
            self.expect(TokenKind::LParen)?;
            index = Some(self.parse_expression()?);
            self.expect(TokenKind::RParen)?;
        }

        let var = self.create_or_get_local(&name, false)?;
        Ok(Statement::Input { prompt, var, index })
    }

    /// Print = 'PRINT' Expression
    fn parse_print(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::Print)?;
        let expression = self.parse_expression()?;
        Ok(Statement::Print(expression))
    }

    /// If = 'IF' Expression 'THEN' Statements
    ///   {'ELSEIF' Expression 'THEN' Statements}
    ///   ['ELSE' Statements] 'END' 'IF'
    fn parse_if(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::If)?;
        let cond = self.parse_expression()?;
        self.expect(TokenKind::Then)?;
        let then = Box::new(self.parse_statements()?);

        // Collect the chain first, then fold it right-to-left into the
        // `otherwise` slots.
        let mut arms = Vec::new();
        while self.check(TokenKind::ElseIf) {
            self.expect(TokenKind::ElseIf)?;
            let chained_cond = self.parse_expression()?;
            self.expect(TokenKind::Then)?;
            let chained_then = self.parse_statements()?;
            arms.push((chained_cond, chained_then));
        }

        let mut otherwise = None;
        if self.check(TokenKind::Else) {
            self.expect(TokenKind::Else)?;
            otherwise = Some(Box::new(self.parse_statements()?));
        }

        self.expect(TokenKind::End)?;
        self.expect(TokenKind::If)?;

        for (cond, then) in arms.into_iter().rev() {
            otherwise = Some(Box::new(Statement::If {
                cond,
                then: Box::new(then),
                otherwise,
            }));
        }

        Ok(Statement::If {
            cond,
            then,
            otherwise,
        })
    }

    /// While = 'WHILE' Expression Statements 'END' 'WHILE'
    fn parse_while(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::While)?;
        let cond = self.parse_expression()?;
        let body = Box::new(self.parse_statements()?);
        self.expect(TokenKind::End)?;
        self.expect(TokenKind::While)?;
        Ok(Statement::While { cond, body })
    }

    /// For = 'FOR' IDENT '=' Expression 'TO' Expression
    ///   ['STEP' ['-'] NUMBER] Statements 'END' 'FOR'
    fn parse_for(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::For)?;
        let name = self.current_text().to_string();
        self.expect(TokenKind::Ident)?;
        self.expect(TokenKind::Eq)?;
        let begin = self.parse_expression()?;
        self.expect(TokenKind::To)?;
        let end = self.parse_expression()?;

        let mut step = 1.0;
        if self.check(TokenKind::Step) {
            self.expect(TokenKind::Step)?;
            let mut is_negative = false;
            if self.check(TokenKind::Minus) {
                self.expect(TokenKind::Minus)?;
                is_negative = true;
            }
            step = self.parse_number_literal()?;
            if is_negative {
                step = -step;
            }
        }

        let var = self.create_or_get_local(&name, false)?;
        let body = Box::new(self.parse_statements()?);
        self.expect(TokenKind::End)?;
        self.expect(TokenKind::For)?;

        Ok(Statement::For {
            var,
            begin,
            end,
            step,
            body,
        })
    }

    /// Call = 'CALL' IDENT [ExpressionList]
    fn parse_call(&mut self) -> ParseResult<Statement> {
        self.expect(TokenKind::Call)?;
        let name = self.current_text().to_string();
        self.expect(TokenKind::Ident)?;

        let mut args = Vec::new();
        if self.current.kind.starts_expression() {
            args.push(self.parse_expression()?);
            while self.check(TokenKind::Comma) {
                self.expect(TokenKind::Comma)?;
                args.push(self.parse_expression()?);
            }
        }

        let callee = self.resolve_callee(&name);
        Ok(Statement::Call(Apply {
            callee,
            args,
            ty: identifier_type(&name),
        }))
    }

    /// Expression = Addition [RelOp Addition]
    ///
    /// Comparisons do not chain.
    fn parse_expression(&mut self) -> ParseResult<Expr> {
        let mut result = self.parse_addition()?;
        if let Some(op) = self.relational_operation() {
            self.advance();
            let rhs = self.parse_addition()?;
            result = binary(op, result, rhs);
        }
        Ok(result)
    }

    /// Addition = Multiplication {('+' | '-' | '&' | 'OR') Multiplication}
    fn parse_addition(&mut self) -> ParseResult<Expr> {
        let mut result = self.parse_multiplication()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Add => Operation::Add,
                TokenKind::Minus => Operation::Sub,
                TokenKind::Amp => Operation::Conc,
                TokenKind::Or => Operation::Or,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplication()?;
            result = binary(op, result, rhs);
        }
        Ok(result)
    }

    /// Multiplication = Power {('*' | '/' | '\' | 'AND') Power}
    fn parse_multiplication(&mut self) -> ParseResult<Expr> {
        let mut result = self.parse_power()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Star => Operation::Mul,
                TokenKind::Slash => Operation::Div,
                TokenKind::Mod => Operation::Mod,
                TokenKind::And => Operation::And,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_power()?;
            result = binary(op, result, rhs);
        }
        Ok(result)
    }

    /// Power = Factor ['^' Power], right-associative
    fn parse_power(&mut self) -> ParseResult<Expr> {
        let result = self.parse_factor()?;
        if self.check(TokenKind::Caret) {
            self.expect(TokenKind::Caret)?;
            let rhs = self.parse_power()?;
            return Ok(binary(Operation::Pow, result, rhs));
        }
        Ok(result)
    }

    /// Factor = 'TRUE' | 'FALSE' | NUMBER | TEXT
    ///        | ('-' | 'NOT') Factor
    ///        | IDENT ['(' [ExpressionList] ')']
    ///        | '(' Expression ')'
    fn parse_factor(&mut self) -> ParseResult<Expr> {
        match self.current.kind {
            TokenKind::True => {
                self.advance();
                Ok(Expr::boolean(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::boolean(false))
            }
            TokenKind::Number => {
                let value = self.parse_number_literal()?;
                Ok(Expr::number(value))
            }
            TokenKind::Text => {
                let value = self.literal_text().to_string();
                self.advance();
                Ok(Expr::text(value))
            }
            TokenKind::Minus | TokenKind::Not => {
                let op = if self.check(TokenKind::Minus) {
                    Operation::Sub
                } else {
                    Operation::Not
                };
                self.advance();
                let operand = Box::new(self.parse_factor()?);
                Ok(Expr::new(ExprKind::Unary { op, operand }, DataType::Void))
            }
            TokenKind::Ident => {
                let name = self.current_text().to_string();
                self.advance();
                if self.check(TokenKind::LParen) {
                    return self.parse_indexed_or_apply(&name);
                }
                let var = self.create_or_get_local(&name, true)?;
                let ty = self.program.subs[self.current_sub].locals[var].ty;
                Ok(Expr::new(ExprKind::Variable(var), ty))
            }
            TokenKind::LParen => {
                self.expect(TokenKind::LParen)?;
                let expression = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(expression)
            }
            _ => Err(ParseError::UnexpectedToken {
                expected: "NUMBER, TEXT, '-', NOT, IDENT or '('".to_string(),
                found: self.current_text().to_string(),
            }),
        }
    }

    /// `IDENT (` is an array element when IDENT names a local, a call
    /// otherwise. The enclosing subroutine's own name is always a call:
    /// its return slot shares the name, but a recursive call is meant.
    fn parse_indexed_or_apply(&mut self, name: &str) -> ParseResult<Expr> {
        let sub = &self.program.subs[self.current_sub];
        let array = if names_equal(&sub.name, name) {
            None
        } else {
            sub.find_local(name)
        };
        if let Some(array) = array {
            self.expect(TokenKind::LParen)?;
            let index = Box::new(self.parse_expression()?);
            self.expect(TokenKind::RParen)?;
            return Ok(Expr::new(
                ExprKind::Item { array, index },
                DataType::Numeric,
            ));
        }

        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if self.current.kind.starts_expression() {
            args.push(self.parse_expression()?);
            while self.check(TokenKind::Comma) {
                self.expect(TokenKind::Comma)?;
                args.push(self.parse_expression()?);
            }
        }
        self.expect(TokenKind::RParen)?;

        let callee = self.resolve_callee(name);
        Ok(Expr::new(
            ExprKind::Apply(Apply {
                callee,
                args,
                ty: identifier_type(name),
            }),
            identifier_type(name),
        ))
    }

    /// NewLines = NEWLINE { NEWLINE }
    fn parse_newlines(&mut self) -> ParseResult<()> {
        self.expect(TokenKind::Newline)?;
        while self.check(TokenKind::Newline) {
            self.expect(TokenKind::Newline)?;
        }
        Ok(())
    }

    fn parse_number_literal(&mut self) -> ParseResult<f64> {
        let text = self.current_text();
        let value = text.parse::<f64>().unwrap_or(0.0);
        self.expect(TokenKind::Number)?;
        Ok(value)
    }

    fn relational_operation(&self) -> Option<Operation> {
        match self.current.kind {
            TokenKind::Eq => Some(Operation::Eq),
            TokenKind::Ne => Some(Operation::Ne),
            TokenKind::Gt => Some(Operation::Gt),
            TokenKind::Ge => Some(Operation::Ge),
            TokenKind::Lt => Some(Operation::Lt),
            TokenKind::Le => Some(Operation::Le),
            _ => None,
        }
    }

    // ============ Symbols ============

    /// Look a local up by name; in l-value position a missing local is
    /// created, in r-value position it is an error.
    fn create_or_get_local(&mut self, name: &str, is_rvalue: bool) -> ParseResult<VarId> {
        let sub = &mut self.program.subs[self.current_sub];

        if is_rvalue && names_equal(&sub.name, name) {
            return Err(ParseError::SubroutineNameAsRvalue);
        }

        if let Some(id) = sub.find_local(name) {
            return Ok(id);
        }

        if is_rvalue {
            return Err(ParseError::UndefinedVariable(name.to_string()));
        }

        sub.locals.push(crate::ast::Variable::new(name.to_string()));
        Ok(sub.locals.len() - 1)
    }

    /// Resolve a callee name to a subroutine: an already known subroutine,
    /// a built-in registered on first reference, or a fresh placeholder to
    /// be adopted by a later definition.
    fn resolve_callee(&mut self, name: &str) -> SubId {
        if let Some(id) = self.program.find_sub(name) {
            return id;
        }

        if let Some((builtin_name, params)) = BUILTINS.iter().find(|(n, _)| *n == name) {
            let mut sub = Subroutine::new(
                builtin_name.to_string(),
                params.iter().map(|p| p.to_string()).collect(),
            );
            sub.is_builtin = true;
            sub.is_returning_value = true;
            sub.is_defined = true;
            self.program.subs.push(sub);
            return self.program.subs.len() - 1;
        }

        // Forward reference: record a placeholder the definition will adopt
        self.program.subs.push(Subroutine::new(name.to_string(), Vec::new()));
        self.program.subs.len() - 1
    }
}

fn binary(op: Operation, lhs: Expr, rhs: Expr) -> Expr {
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        DataType::Void,
    )
}

/// Helper function to parse source code
pub fn parse(source: &str, filename: &str) -> ParseResult<Program> {
    Parser::new(source, filename).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        parse(source, "test.bas").expect("program should parse")
    }

    fn parse_err(source: &str) -> ParseError {
        parse(source, "test.bas").expect_err("program should not parse")
    }

    fn main_body(program: &Program) -> &[Statement] {
        let main = &program.subs[program.find_sub("Main").unwrap()];
        match &main.body {
            Statement::Seq(items) => items,
            other => panic!("body is not a sequence: {:?}", other),
        }
    }

    #[test]
    fn test_hello_world() {
        let program = parse_ok("SUB Main\n  PRINT \"Hello, world!\"\nEND SUB\n");
        assert_eq!(program.subs.len(), 1);
        let body = main_body(&program);
        assert_eq!(body.len(), 1);
        match &body[0] {
            Statement::Print(e) => match &e.kind {
                ExprKind::Text(s) => assert_eq!(s, "Hello, world!"),
                other => panic!("expected text literal, got {:?}", other),
            },
            other => panic!("expected print, got {:?}", other),
        }
    }

    #[test]
    fn test_operator_precedence() {
        // 1 + 2 * 3 ^ 2 parses as 1 + (2 * (3 ^ 2))
        let program = parse_ok("SUB Main\n  LET X = 1 + 2 * 3 ^ 2\nEND SUB\n");
        let body = main_body(&program);
        let value = match &body[0] {
            Statement::Let { value, .. } => value,
            other => panic!("expected let, got {:?}", other),
        };
        let (op, rhs) = match &value.kind {
            ExprKind::Binary { op, rhs, .. } => (*op, rhs),
            other => panic!("expected binary, got {:?}", other),
        };
        assert_eq!(op, Operation::Add);
        let (op, rhs) = match &rhs.kind {
            ExprKind::Binary { op, rhs, .. } => (*op, rhs),
            other => panic!("expected binary, got {:?}", other),
        };
        assert_eq!(op, Operation::Mul);
        match &rhs.kind {
            ExprKind::Binary { op, .. } => assert_eq!(*op, Operation::Pow),
            other => panic!("expected power, got {:?}", other),
        }
    }

    #[test]
    fn test_additive_is_left_associative() {
        let program = parse_ok("SUB Main\n  LET X = 1 - 2 - 3\nEND SUB\n");
        let body = main_body(&program);
        let value = match &body[0] {
            Statement::Let { value, .. } => value,
            other => panic!("expected let, got {:?}", other),
        };
        // (1 - 2) - 3
        match &value.kind {
            ExprKind::Binary { op, lhs, rhs } => {
                assert_eq!(*op, Operation::Sub);
                assert!(matches!(rhs.kind, ExprKind::Number(n) if n == 3.0));
                assert!(matches!(lhs.kind, ExprKind::Binary { .. }));
            }
            other => panic!("expected binary, got {:?}", other),
        }
    }

    #[test]
    fn test_forward_reference_resolves() {
        let source = "\
SUB Main
  PRINT Even(4)
END SUB
SUB Even?(n)
  IF n = 0 THEN
    LET Even? = TRUE
  ELSE
    LET Even? = Odd(n - 1)
  END IF
END SUB
SUB Odd?(n)
  IF n = 0 THEN
    LET Odd? = FALSE
  ELSE
    LET Odd? = Even(n - 1)
  END IF
END SUB
";
        let program = parse_ok(source);
        assert!(program.subs.iter().all(|s| s.is_defined));

        // The Apply inside Main points at the Even? definition
        let body = main_body(&program);
        let callee = match &body[0] {
            Statement::Print(e) => match &e.kind {
                ExprKind::Apply(a) => a.callee,
                other => panic!("expected apply, got {:?}", other),
            },
            other => panic!("expected print, got {:?}", other),
        };
        assert_eq!(program.subs[callee].name, "Even?");
        assert!(program.subs[callee].is_returning_value);
    }

    #[test]
    fn test_unresolved_reference_is_reported() {
        let err = parse_err("SUB Main\n  CALL Missing\nEND SUB\n");
        match err {
            ParseError::UnresolvedReferences(names) => assert_eq!(names, vec!["Missing"]),
            other => panic!("expected unresolved references, got {:?}", other),
        }
    }

    #[test]
    fn test_function_inference() {
        let source = "\
SUB F
  LET F = 1
END SUB
SUB G
  LET X = 1
END SUB
";
        let program = parse_ok(source);
        assert!(program.subs[program.find_sub("F").unwrap()].is_returning_value);
        assert!(!program.subs[program.find_sub("G").unwrap()].is_returning_value);
    }

    #[test]
    fn test_function_inference_strips_sigils() {
        let program = parse_ok("SUB Even?(n)\n  LET Even? = TRUE\nEND SUB\n");
        assert!(program.subs[0].is_returning_value);
    }

    #[test]
    fn test_duplicate_subroutine_names_collide_under_sigils() {
        let err = parse_err("SUB Count\nEND SUB\nSUB Count$\nEND SUB\n");
        assert_eq!(err, ParseError::NameAlreadyDefined("Count$".to_string()));
    }

    #[test]
    fn test_undefined_variable() {
        let err = parse_err("SUB Main\n  PRINT X\nEND SUB\n");
        assert_eq!(err, ParseError::UndefinedVariable("X".to_string()));
    }

    #[test]
    fn test_let_target_is_created_after_rhs() {
        let err = parse_err("SUB Main\n  LET X = X + 1\nEND SUB\n");
        assert_eq!(err, ParseError::UndefinedVariable("X".to_string()));
    }

    #[test]
    fn test_subroutine_name_as_rvalue() {
        let err = parse_err("SUB F\n  LET X = F + 1\nEND SUB\n");
        assert_eq!(err, ParseError::SubroutineNameAsRvalue);
    }

    #[test]
    fn test_builtin_registration() {
        let program = parse_ok("SUB Main\n  PRINT SQR(2)\nEND SUB\n");
        let sqr = &program.subs[program.find_sub("SQR").unwrap()];
        assert!(sqr.is_builtin);
        assert!(sqr.is_returning_value);
        assert_eq!(sqr.params, vec!["a"]);
    }

    #[test]
    fn test_dim_and_array_element() {
        let source = "\
SUB Main
  DIM A(3)
  LET A(1) = 10
  PRINT A(1)
END SUB
";
        let program = parse_ok(source);
        let body = main_body(&program);
        assert!(matches!(body[0], Statement::Dim { size, .. } if size == 3.0));
        match &body[1] {
            Statement::Let { index, .. } => assert!(index.is_some()),
            other => panic!("expected let, got {:?}", other),
        }
        match &body[2] {
            Statement::Print(e) => assert!(matches!(e.kind, ExprKind::Item { .. })),
            other => panic!("expected print, got {:?}", other),
        }
    }

    #[test]
    fn test_input_prompts() {
        let program = parse_ok("SUB Main\n  INPUT \"Name:\", N$\n  INPUT M\nEND SUB\n");
        let body = main_body(&program);
        match &body[0] {
            Statement::Input { prompt, .. } => assert_eq!(prompt, "Name:"),
            other => panic!("expected input, got {:?}", other),
        }
        match &body[1] {
            Statement::Input { prompt, .. } => assert_eq!(prompt, "?"),
            other => panic!("expected input, got {:?}", other),
        }
    }

    #[test]
    fn test_elseif_chain_nests_through_otherwise() {
        let source = "\
SUB Main
  LET X = 1
  IF X > 2 THEN
    PRINT 1
  ELSEIF X > 1 THEN
    PRINT 2
  ELSE
    PRINT 3
  END IF
END SUB
";
        let program = parse_ok(source);
        let body = main_body(&program);
        let otherwise = match &body[1] {
            Statement::If { otherwise, .. } => otherwise.as_ref().unwrap(),
            other => panic!("expected if, got {:?}", other),
        };
        match otherwise.as_ref() {
            Statement::If { otherwise, .. } => assert!(otherwise.is_some()),
            other => panic!("expected nested if, got {:?}", other),
        }
    }

    #[test]
    fn test_for_with_negative_step() {
        let program = parse_ok("SUB Main\n  FOR I = 10 TO 1 STEP -2\n    PRINT I\n  END FOR\nEND SUB\n");
        let body = main_body(&program);
        match &body[0] {
            Statement::For { step, .. } => assert_eq!(*step, -2.0),
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn test_direct_recursion_is_a_call_not_an_index() {
        let source = "\
SUB Fact(n)
  IF n < 1 THEN
    LET Fact = 1
  ELSE
    LET Fact = n * Fact(n - 1)
  END IF
END SUB
";
        let program = parse_ok(source);
        let sub = &program.subs[0];
        // The recursive use parses as an apply even though the return slot
        // carries the same name
        let otherwise = match &sub.body {
            Statement::Seq(items) => match &items[0] {
                Statement::If { otherwise, .. } => otherwise.as_ref().unwrap(),
                other => panic!("expected if, got {:?}", other),
            },
            _ => unreachable!(),
        };
        let value = match otherwise.as_ref() {
            Statement::Seq(items) => match &items[0] {
                Statement::Let { value, .. } => value,
                other => panic!("expected let, got {:?}", other),
            },
            other => panic!("expected sequence, got {:?}", other),
        };
        match &value.kind {
            ExprKind::Binary { rhs, .. } => {
                assert!(matches!(rhs.kind, ExprKind::Apply(ref a) if a.callee == 0));
            }
            other => panic!("expected binary, got {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_names_expected_and_found() {
        let err = parse_err("SUB Main\n  LET 5 = 1\nEND SUB\n");
        assert_eq!(
            err,
            ParseError::UnexpectedToken {
                expected: "IDENT".to_string(),
                found: "5".to_string(),
            }
        );
    }

    #[test]
    fn test_call_with_arguments() {
        let source = "\
SUB Main
  CALL Greet \"hi\", 2
END SUB
SUB Greet(m$, n)
END SUB
";
        let program = parse_ok(source);
        let body = main_body(&program);
        match &body[0] {
            Statement::Call(apply) => {
                assert_eq!(apply.args.len(), 2);
                assert_eq!(program.subs[apply.callee].name, "Greet");
            }
            other => panic!("expected call, got {:?}", other),
        }
    }
}
