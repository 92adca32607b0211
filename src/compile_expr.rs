use crate::error::CompileError;
use crate::ops::{CallArg, OpCode, OperatorRegistry};
use crate::plan::MAX_EXPR_DEPTH;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// Parsed factor expression.
///
/// Infix arithmetic, comparisons, unary minus and keyword params are desugared
/// while parsing, so every operator application is a plain `Call`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprAst {
    Field(String),
    Literal(f64),
    Call {
        op: OpCode,
        children: Vec<ExprAst>,
        params: Vec<f64>,
    },
}

impl fmt::Display for ExprAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => write!(f, "@{name}"),
            Self::Literal(value) => f.write_str(&normalize_number_token(*value)),
            Self::Call {
                op,
                children,
                params,
            } => {
                let name = OperatorRegistry::get_by_op(*op)
                    .map(|meta| meta.name)
                    .unwrap_or("?");
                write!(f, "{name}(")?;
                let mut first = true;
                for child in children {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    write!(f, "{child}")?;
                }
                for param in params {
                    if !first {
                        f.write_str(", ")?;
                    }
                    first = false;
                    f.write_str(&normalize_number_token(*param))?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Shortest text that parses back to the same finite value.
pub(crate) fn normalize_number_token(v: f64) -> String {
    debug_assert!(v.is_finite(), "literals are finite by construction");
    if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        v.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Field(String),
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Lt,
    Gt,
    Comma,
    Equal,
    LParen,
    RParen,
    Eof,
}

struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().peekable(),
        }
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        self.skip_ws();
        let Some(&ch) = self.chars.peek() else {
            return Ok(Token::Eof);
        };
        let single = match ch {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '<' => Some(Token::Lt),
            '>' => Some(Token::Gt),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            '=' => Some(Token::Equal),
            _ => None,
        };
        if let Some(token) = single {
            self.chars.next();
            return Ok(token);
        }
        match ch {
            '@' => {
                self.chars.next();
                let name = self.read_ident();
                if name.is_empty() || !name.starts_with(is_ident_start) {
                    return Err(CompileError::syntax(
                        self.source,
                        "`@` must be followed by a field name",
                    ));
                }
                Ok(Token::Field(name))
            }
            c if is_ident_start(c) => Ok(Token::Ident(self.read_ident())),
            c if c.is_ascii_digit() || c == '.' => {
                let raw = self.read_number();
                let num = raw.parse::<f64>().map_err(|_| {
                    CompileError::syntax(self.source, format!("invalid number `{raw}`"))
                })?;
                if !num.is_finite() {
                    return Err(CompileError::syntax(
                        self.source,
                        format!("number `{raw}` is not finite"),
                    ));
                }
                Ok(Token::Number(num))
            }
            other => Err(CompileError::syntax(
                self.source,
                format!("unexpected character `{other}`"),
            )),
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some(c) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn read_ident(&mut self) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if is_ident_continue(c) {
                out.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        out
    }

    fn read_number(&mut self) -> String {
        let mut out = String::new();
        let mut seen_dot = false;
        let mut seen_exp = false;

        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                out.push(c);
                self.chars.next();
                continue;
            }
            if c == '.' && !seen_dot && !seen_exp {
                seen_dot = true;
                out.push(c);
                self.chars.next();
                continue;
            }
            if (c == 'e' || c == 'E') && !seen_exp {
                seen_exp = true;
                out.push(c);
                self.chars.next();
                if let Some(&sign) = self.chars.peek() {
                    if sign == '+' || sign == '-' {
                        out.push(sign);
                        self.chars.next();
                    }
                }
                continue;
            }
            break;
        }
        out
    }
}

#[inline]
fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

#[inline]
fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

pub fn parse_expression(source: &str) -> Result<ExprAst, CompileError> {
    let mut parser = Parser::new(source);
    if matches!(parser.peek_token()?, Token::Eof) {
        return Err(CompileError::syntax(source, "empty expression"));
    }
    let expr = parser.parse_expr()?;
    match parser.next_token()? {
        Token::Eof => Ok(expr.ast),
        other => Err(CompileError::syntax(
            source,
            format!("unexpected trailing token: {other:?}"),
        )),
    }
}

/// Sub-expression plus the height of its operator tree.
struct Parsed {
    ast: ExprAst,
    depth: usize,
}

impl Parsed {
    fn leaf(ast: ExprAst) -> Self {
        Self { ast, depth: 1 }
    }
}

struct Parser<'a> {
    source: &'a str,
    lexer: Lexer<'a>,
    /// Pushed-back tokens, next one last.
    lookahead: Vec<Token>,
    /// Open parentheses, calls and unary prefixes enclosing the cursor.
    nesting: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            lexer: Lexer::new(source),
            lookahead: Vec::new(),
            nesting: 0,
        }
    }

    fn next_token(&mut self) -> Result<Token, CompileError> {
        if let Some(tok) = self.lookahead.pop() {
            return Ok(tok);
        }
        self.lexer.next_token()
    }

    fn peek_token(&mut self) -> Result<Token, CompileError> {
        if let Some(tok) = self.lookahead.last() {
            return Ok(tok.clone());
        }
        let tok = self.lexer.next_token()?;
        self.lookahead.push(tok.clone());
        Ok(tok)
    }

    fn check_depth(&self, depth: usize) -> Result<(), CompileError> {
        if depth > MAX_EXPR_DEPTH {
            return Err(CompileError::syntax(
                self.source,
                format!("expression nests deeper than {MAX_EXPR_DEPTH} levels"),
            ));
        }
        Ok(())
    }

    fn combine(&self, op: OpCode, lhs: Parsed, rhs: Parsed) -> Result<Parsed, CompileError> {
        let depth = lhs.depth.max(rhs.depth) + 1;
        self.check_depth(depth)?;
        Ok(Parsed {
            ast: binary_call(op, lhs.ast, rhs.ast),
            depth,
        })
    }

    fn parse_expr(&mut self) -> Result<Parsed, CompileError> {
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Parsed, CompileError> {
        let mut lhs = self.parse_add_sub()?;
        loop {
            let op = match self.peek_token()? {
                Token::Lt => OpCode::ElemLess,
                Token::Gt => OpCode::ElemGreater,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_add_sub()?;
            lhs = self.combine(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_add_sub(&mut self) -> Result<Parsed, CompileError> {
        let mut lhs = self.parse_mul_div()?;
        loop {
            let op = match self.peek_token()? {
                Token::Plus => OpCode::ElemAdd,
                Token::Minus => OpCode::ElemSub,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_mul_div()?;
            lhs = self.combine(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    fn parse_mul_div(&mut self) -> Result<Parsed, CompileError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek_token()? {
                Token::Star => OpCode::ElemMul,
                Token::Slash => OpCode::ElemDiv,
                _ => break,
            };
            self.next_token()?;
            let rhs = self.parse_unary()?;
            lhs = self.combine(op, lhs, rhs)?;
        }
        Ok(lhs)
    }

    /// Every recursive descent passes through here, so the nesting guard
    /// bounds the parser's own stack use.
    fn parse_unary(&mut self) -> Result<Parsed, CompileError> {
        self.nesting += 1;
        let parsed = self
            .check_depth(self.nesting)
            .and_then(|()| self.parse_unary_inner());
        self.nesting -= 1;
        parsed
    }

    fn parse_unary_inner(&mut self) -> Result<Parsed, CompileError> {
        match self.peek_token()? {
            Token::Plus => {
                self.next_token()?;
                self.parse_unary()
            }
            Token::Minus => {
                self.next_token()?;
                let operand = self.parse_unary()?;
                match operand.ast {
                    ExprAst::Literal(value) => Ok(Parsed::leaf(ExprAst::Literal(-value))),
                    expr => {
                        let depth = operand.depth + 1;
                        self.check_depth(depth)?;
                        Ok(Parsed {
                            ast: ExprAst::Call {
                                op: OpCode::ElemNeg,
                                children: vec![expr],
                                params: Vec::new(),
                            },
                            depth,
                        })
                    }
                }
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Parsed, CompileError> {
        match self.next_token()? {
            Token::Ident(name) => {
                if !matches!(self.peek_token()?, Token::LParen) {
                    return Err(CompileError::syntax(
                        self.source,
                        format!("bare identifier `{name}`, field references are written `@{name}`"),
                    ));
                }
                self.next_token()?; // consume '('
                let meta = OperatorRegistry::get(&name)
                    .ok_or_else(|| CompileError::UnknownOperator { name: name.clone() })?;
                let (args, arg_depth) = self.parse_arg_list()?;
                self.expect_token(Token::RParen)?;
                let depth = arg_depth + 1;
                self.check_depth(depth)?;
                Ok(Parsed {
                    ast: meta.parse_call(args, self.source)?,
                    depth,
                })
            }
            Token::Field(name) => Ok(Parsed::leaf(ExprAst::Field(name))),
            Token::Number(value) => Ok(Parsed::leaf(ExprAst::Literal(value))),
            Token::LParen => {
                let expr = self.parse_expr()?;
                self.expect_token(Token::RParen)?;
                Ok(expr)
            }
            other => Err(CompileError::syntax(
                self.source,
                format!("unexpected token: {other:?}"),
            )),
        }
    }

    /// Returns the arguments and the deepest positional operand.
    fn parse_arg_list(&mut self) -> Result<(Vec<CallArg>, usize), CompileError> {
        let mut args = Vec::new();
        let mut depth = 0;
        loop {
            match self.peek_token()? {
                Token::RParen => break,
                Token::Eof => {
                    return Err(CompileError::syntax(
                        self.source,
                        "unexpected EOF in argument list",
                    ));
                }
                _ => {}
            }

            let (arg, arg_depth) = self.parse_arg()?;
            args.push(arg);
            depth = depth.max(arg_depth);

            match self.peek_token()? {
                Token::Comma => {
                    self.next_token()?;
                    if matches!(self.peek_token()?, Token::RParen) {
                        return Err(CompileError::syntax(
                            self.source,
                            "trailing comma in argument list",
                        ));
                    }
                }
                Token::RParen => break,
                other => {
                    return Err(CompileError::syntax(
                        self.source,
                        format!("invalid token in argument list: {other:?}"),
                    ));
                }
            }
        }
        Ok((args, depth))
    }

    fn parse_arg(&mut self) -> Result<(CallArg, usize), CompileError> {
        if let Token::Ident(name) = self.peek_token()? {
            self.next_token()?;
            if matches!(self.peek_token()?, Token::Equal) {
                self.next_token()?;
                return match self.parse_unary()?.ast {
                    ExprAst::Literal(value) => Ok((CallArg::Keyword { name, value }, 0)),
                    _ => Err(CompileError::syntax(
                        self.source,
                        format!("keyword `{name}` must be a number"),
                    )),
                };
            }
            // Not a keyword: hand the identifier back and parse a full expression.
            self.lookahead.push(Token::Ident(name));
        }
        let parsed = self.parse_expr()?;
        Ok((CallArg::Positional(parsed.ast), parsed.depth))
    }

    fn expect_token(&mut self, expected: Token) -> Result<(), CompileError> {
        let got = self.next_token()?;
        if got == expected {
            Ok(())
        } else {
            Err(CompileError::syntax(
                self.source,
                format!("expected {expected:?}, got {got:?}"),
            ))
        }
    }
}

fn binary_call(op: OpCode, lhs: ExprAst, rhs: ExprAst) -> ExprAst {
    ExprAst::Call {
        op,
        children: vec![lhs, rhs],
        params: Vec::new(),
    }
}
