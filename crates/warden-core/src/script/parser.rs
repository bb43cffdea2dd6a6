//! Recursive-descent parser producing the snippet AST.
//!
//! A submission is parsed as a function body, so a top-level `return` is
//! legal and yields the run's output.

use std::rc::Rc;

use super::lexer::{Lexeme, Token};
use super::SyntaxError;

/// Nesting beyond this is rejected before it can exhaust the unit's stack.
const MAX_NESTING: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Declare {
        bindings: Vec<(String, Option<Expr>)>,
        constant: bool,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        name: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
    Block(Vec<Stmt>),
    Return(Option<Expr>),
    Break,
    Continue,
    Throw(Expr),
    Try {
        body: Vec<Stmt>,
        param: Option<String>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Function(Rc<FunctionDef>),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(Rc<str>),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Function(Rc<FunctionDef>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Logical {
        and: bool,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        op: AssignOp,
        value: Box<Expr>,
    },
    Update {
        target: Box<Expr>,
        delta: f64,
        prefix: bool,
    },
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        construct: bool,
    },
}

impl Expr {
    fn is_assignable(&self) -> bool {
        matches!(
            self,
            Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }
        )
    }
}

/// Parse a token stream into a program.
pub fn parse(tokens: Vec<Lexeme>) -> Result<Vec<Stmt>, SyntaxError> {
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut program = Vec::new();
    while !parser.at_eof() {
        program.push(parser.statement()?);
    }
    Ok(program)
}

struct Parser {
    tokens: Vec<Lexeme>,
    pos: usize,
    depth: usize,
}

type PResult<T> = Result<T, SyntaxError>;

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].token
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Token::Punct(q) if *q == p)
    }

    fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Ident(w) if w == word)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line(), message)
    }

    fn unexpected(&self) -> SyntaxError {
        let found = match self.peek() {
            Token::Number(n) => n.to_string(),
            Token::Str(s) => format!("'{s}'"),
            Token::Ident(w) => w.clone(),
            Token::Punct(p) => p.to_string(),
            Token::Eof => "end of input".to_string(),
        };
        self.error(format!("unexpected token {found}"))
    }

    fn expect_punct(&mut self, p: &str) -> PResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{p}'")))
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match self.peek() {
            Token::Ident(w) if !is_reserved(w) => {
                let w = w.clone();
                self.advance();
                Ok(w)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("program nests too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn end_statement(&mut self) {
        self.eat_punct(";");
    }

    // ---------------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------------

    fn statement(&mut self) -> PResult<Stmt> {
        self.enter()?;
        let stmt = self.statement_inner();
        self.leave();
        stmt
    }

    fn statement_inner(&mut self) -> PResult<Stmt> {
        if self.eat_punct("{") {
            return Ok(Stmt::Block(self.block_rest()?));
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        let keyword = match self.peek() {
            Token::Ident(w) => w.clone(),
            _ => return self.expression_statement(),
        };
        match keyword.as_str() {
            "let" | "const" | "var" => {
                let stmt = self.declaration()?;
                self.end_statement();
                Ok(stmt)
            }
            "if" => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.eat_keyword("else") {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    cond,
                    then,
                    otherwise,
                })
            }
            "while" => {
                self.advance();
                self.expect_punct("(")?;
                let cond = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { cond, body })
            }
            "for" => self.for_statement(),
            "return" => {
                self.advance();
                let value = if self.is_punct(";") || self.is_punct("}") || self.at_eof() {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.end_statement();
                Ok(Stmt::Return(value))
            }
            "break" => {
                self.advance();
                self.end_statement();
                Ok(Stmt::Break)
            }
            "continue" => {
                self.advance();
                self.end_statement();
                Ok(Stmt::Continue)
            }
            "throw" => {
                self.advance();
                let value = self.expression()?;
                self.end_statement();
                Ok(Stmt::Throw(value))
            }
            "try" => self.try_statement(),
            "function" if matches!(self.peek_at(1), Token::Ident(_)) => {
                self.advance();
                let def = self.function_rest()?;
                Ok(Stmt::Function(Rc::new(def)))
            }
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> PResult<Stmt> {
        let expr = self.expression()?;
        self.end_statement();
        Ok(Stmt::Expr(expr))
    }

    fn block_rest(&mut self) -> PResult<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.eat_punct("}") {
            if self.at_eof() {
                return Err(self.error("expected '}'"));
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct("{")?;
        self.block_rest()
    }

    fn declaration(&mut self) -> PResult<Stmt> {
        let constant = matches!(self.advance(), Token::Ident(w) if w == "const");
        let mut bindings = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            if constant && init.is_none() {
                return Err(self.error(format!("missing initializer in const '{name}'")));
            }
            bindings.push((name, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Declare { bindings, constant })
    }

    fn for_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect_punct("(")?;

        let declares = matches!(self.peek(), Token::Ident(w) if w == "let" || w == "const" || w == "var");
        if declares
            && matches!(self.peek_at(1), Token::Ident(_))
            && matches!(self.peek_at(2), Token::Ident(w) if w == "of")
        {
            self.advance();
            let name = self.expect_ident()?;
            self.advance();
            let iterable = self.expression()?;
            self.expect_punct(")")?;
            let body = Box::new(self.statement()?);
            return Ok(Stmt::ForOf {
                name,
                iterable,
                body,
            });
        }

        let init = if self.is_punct(";") {
            None
        } else if declares {
            Some(Box::new(self.declaration()?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.expect_punct(";")?;
        let cond = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let step = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            cond,
            step,
            body,
        })
    }

    fn try_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let body = self.block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword("catch") {
            if self.eat_punct("(") {
                param = Some(self.expect_ident()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.block()?);
        }
        let finalizer = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("try without catch or finally"));
        }
        Ok(Stmt::Try {
            body,
            param,
            handler,
            finalizer,
        })
    }

    /// Everything after the `function` keyword.
    fn function_rest(&mut self) -> PResult<FunctionDef> {
        let name = match self.peek() {
            Token::Ident(_) => Some(self.expect_ident()?),
            _ => None,
        };
        self.expect_punct("(")?;
        let mut params = Vec::new();
        if !self.eat_punct(")") {
            loop {
                params.push(self.expect_ident()?);
                if self.eat_punct(")") {
                    break;
                }
                self.expect_punct(",")?;
            }
        }
        let body = self.block()?;
        Ok(FunctionDef { name, params, body })
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    fn expression(&mut self) -> PResult<Expr> {
        self.enter()?;
        let expr = self.assignment();
        self.leave();
        expr
    }

    fn assignment(&mut self) -> PResult<Expr> {
        let target = self.conditional()?;
        let op = if self.is_punct("=") {
            AssignOp::Set
        } else if self.is_punct("+=") {
            AssignOp::Add
        } else if self.is_punct("-=") {
            AssignOp::Sub
        } else {
            return Ok(target);
        };
        if !target.is_assignable() {
            return Err(self.error("invalid assignment target"));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            target: Box::new(target),
            op,
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let cond = self.logical_or()?;
        if !self.eat_punct("?") {
            return Ok(cond);
        }
        let then = self.assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn logical_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.logical_and()?;
        while self.eat_punct("||") {
            let rhs = self.logical_and()?;
            lhs = Expr::Logical {
                and: false,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn logical_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.equality()?;
        while self.eat_punct("&&") {
            let rhs = self.equality()?;
            lhs = Expr::Logical {
                and: true,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        next: fn(&mut Self) -> PResult<Expr>,
    ) -> PResult<Expr> {
        let mut lhs = next(self)?;
        'outer: loop {
            for (punct, op) in ops {
                if self.eat_punct(punct) {
                    let rhs = next(self)?;
                    lhs = Expr::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn equality(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                ("===", BinaryOp::StrictEq),
                ("!==", BinaryOp::StrictNe),
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
            ],
            Self::relational,
        )
    }

    fn relational(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                ("<=", BinaryOp::Le),
                (">=", BinaryOp::Ge),
                ("<", BinaryOp::Lt),
                (">", BinaryOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        self.binary_level(
            &[
                ("*", BinaryOp::Mul),
                ("/", BinaryOp::Div),
                ("%", BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> PResult<Expr> {
        self.enter()?;
        let expr = self.unary_inner();
        self.leave();
        expr
    }

    fn unary_inner(&mut self) -> PResult<Expr> {
        let op = if self.eat_punct("!") {
            UnaryOp::Not
        } else if self.eat_punct("-") {
            UnaryOp::Neg
        } else if self.eat_punct("+") {
            UnaryOp::Plus
        } else if self.eat_keyword("typeof") {
            UnaryOp::TypeOf
        } else if self.is_punct("++") || self.is_punct("--") {
            let delta = if self.eat_punct("++") {
                1.0
            } else {
                self.advance();
                -1.0
            };
            let target = self.unary()?;
            if !target.is_assignable() {
                return Err(self.error("invalid update target"));
            }
            return Ok(Expr::Update {
                target: Box::new(target),
                delta,
                prefix: true,
            });
        } else {
            return self.postfix();
        };
        let expr = self.unary()?;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let mut expr = if self.eat_keyword("new") {
            let callee = self.member_chain()?;
            let args = if self.is_punct("(") {
                self.arguments()?
            } else {
                Vec::new()
            };
            Expr::Call {
                callee: Box::new(callee),
                args,
                construct: true,
            }
        } else {
            self.primary()?
        };

        loop {
            if self.eat_punct(".") {
                let property = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.is_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                    construct: false,
                };
            } else {
                break;
            }
        }

        if expr.is_assignable() && (self.is_punct("++") || self.is_punct("--")) {
            let delta = if self.eat_punct("++") {
                1.0
            } else {
                self.advance();
                -1.0
            };
            expr = Expr::Update {
                target: Box::new(expr),
                delta,
                prefix: false,
            };
        }
        Ok(expr)
    }

    /// Callee of a `new` expression: a primary plus member accesses, no calls.
    fn member_chain(&mut self) -> PResult<Expr> {
        let mut expr = self.primary()?;
        while self.eat_punct(".") {
            let property = self.property_name()?;
            expr = Expr::Member {
                object: Box::new(expr),
                property,
            };
        }
        Ok(expr)
    }

    /// Property names may be reserved words (`obj.new`, `e.catch`).
    fn property_name(&mut self) -> PResult<String> {
        match self.advance() {
            Token::Ident(w) => Ok(w),
            _ => Err(self.error("expected property name")),
        }
    }

    fn arguments(&mut self) -> PResult<Vec<Expr>> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        if self.eat_punct(")") {
            return Ok(args);
        }
        loop {
            args.push(self.assignment()?);
            if self.eat_punct(")") {
                return Ok(args);
            }
            self.expect_punct(",")?;
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Str(Rc::from(s.as_str())))
            }
            Token::Punct("(") => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Token::Punct("[") => {
                self.advance();
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    items.push(self.assignment()?);
                    if !self.is_punct("]") {
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Token::Punct("{") => {
                self.advance();
                let mut props = Vec::new();
                while !self.eat_punct("}") {
                    let key = match self.advance() {
                        Token::Ident(w) => w,
                        Token::Str(s) => s,
                        Token::Number(n) => super::value::format_number(n),
                        _ => return Err(self.error("expected property key")),
                    };
                    self.expect_punct(":")?;
                    props.push((key, self.assignment()?));
                    if !self.is_punct("}") {
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::Object(props))
            }
            Token::Ident(word) => {
                let expr = match word.as_str() {
                    "true" => Expr::Bool(true),
                    "false" => Expr::Bool(false),
                    "null" => Expr::Null,
                    "undefined" => Expr::Undefined,
                    "NaN" => Expr::Number(f64::NAN),
                    "Infinity" => Expr::Number(f64::INFINITY),
                    "function" => {
                        self.advance();
                        return Ok(Expr::Function(Rc::new(self.function_rest()?)));
                    }
                    w if is_reserved(w) => return Err(self.unexpected()),
                    _ => Expr::Ident(word.clone()),
                };
                self.advance();
                Ok(expr)
            }
            _ => Err(self.unexpected()),
        }
    }
}

fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "let"
            | "const"
            | "var"
            | "if"
            | "else"
            | "while"
            | "for"
            | "return"
            | "break"
            | "continue"
            | "throw"
            | "try"
            | "catch"
            | "finally"
            | "function"
            | "new"
            | "typeof"
            | "true"
            | "false"
            | "null"
    )
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn program(src: &str) -> Vec<Stmt> {
        parse(tokenize(src).unwrap()).unwrap()
    }

    #[test]
    fn test_top_level_return() {
        let stmts = program("return 1+1");
        assert_eq!(
            stmts,
            vec![Stmt::Return(Some(Expr::Binary {
                op: BinaryOp::Add,
                lhs: Box::new(Expr::Number(1.0)),
                rhs: Box::new(Expr::Number(1.0)),
            }))]
        );
    }

    #[test]
    fn test_precedence() {
        let stmts = program("1 + 2 * 3");
        match &stmts[0] {
            Stmt::Expr(Expr::Binary { op, rhs, .. }) => {
                assert_eq!(*op, BinaryOp::Add);
                assert!(matches!(**rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_new_function_is_construct_call() {
        let stmts = program("new Function('return 1')()");
        match &stmts[0] {
            Stmt::Expr(Expr::Call { callee, .. }) => match callee.as_ref() {
                Expr::Call {
                    callee, construct, ..
                } => {
                    assert!(*construct);
                    assert_eq!(**callee, Expr::Ident("Function".into()));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_for_of_and_classic_for() {
        assert!(matches!(
            program("for (const x of [1, 2]) { x }")[0],
            Stmt::ForOf { .. }
        ));
        assert!(matches!(
            program("for (let i = 0; i < 3; i++) {}")[0],
            Stmt::For { .. }
        ));
    }

    #[test]
    fn test_block_versus_object_literal() {
        assert!(matches!(program("{ let a = 1 }")[0], Stmt::Block(_)));
        assert!(matches!(
            program("return { a: 1, 'b': 2 }")[0],
            Stmt::Return(Some(Expr::Object(_)))
        ));
    }

    #[test]
    fn test_rejects_invalid_programs() {
        for src in ["1 = 2", "let", "const x;", "try {}", "return (1", "if (x {"] {
            assert!(parse(tokenize(src).unwrap()).is_err(), "accepted {src}");
        }
    }

    #[test]
    fn test_nesting_limit() {
        let src = format!("return {}1{}", "(".repeat(500), ")".repeat(500));
        let err = parse(tokenize(&src).unwrap()).unwrap_err();
        assert!(err.message.contains("nests too deeply"));
    }
}
