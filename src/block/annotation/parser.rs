//! Lexer and parser for annotation scripts
//!
//! The language is a flat list of canvas-style statements:
//!
//! ```text
//! ctx.strokeStyle = "#ff0000"
//! strokeRect(W(0.1), H(0.25), W(0.3), 40); fillText("here", W(0.1), H(0.2))
//! ```
//!
//! There are no variables, loops or user functions.

use crate::block::error::AnnotationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f32),
    Str(String),
    /// Named constant such as `PI` or `Math.PI`
    Constant(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Helper call inside an expression (`W(...)`, `H(...)`)
    Call { name: String, args: Vec<Expr> },
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatementKind {
    Assign { property: String, value: Expr },
    Call { name: String, args: Vec<Expr> },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    /// 1-based source line
    pub line: usize,
    pub kind: StatementKind,
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f32),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    /// Newline or `;`
    End,
}

#[derive(Clone, Debug)]
struct Spanned {
    token: Token,
    line: usize,
}

/// Deepest expression tree or parenthesis nesting a script may use
pub const MAX_NESTING: usize = 64;

/// Expression with the height of its tree
type Node = (Expr, usize);

fn syntax(line: usize, message: impl Into<String>) -> AnnotationError {
    AnnotationError::Syntax {
        line,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, AnnotationError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line = 1;

    while let Some(&c) = chars.peek() {
        let token = match c {
            '\n' => {
                chars.next();
                let t = Spanned {
                    token: Token::End,
                    line,
                };
                line += 1;
                tokens.push(t);
                continue;
            }
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '/' if {
                let mut ahead = chars.clone();
                ahead.next();
                ahead.peek() == Some(&'/')
            } =>
            {
                // Line comment
                while chars.peek().is_some_and(|&c| c != '\n') {
                    chars.next();
                }
                continue;
            }
            '0'..='9' | '.' if c != '.' || chars.clone().nth(1).is_some_and(|d| d.is_ascii_digit()) => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = text
                    .parse::<f32>()
                    .map_err(|_| syntax(line, format!("bad number `{text}`")))?;
                Token::Number(value)
            }
            '"' | '\'' | '`' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some('\\') => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(other) => text.push(other),
                            None => return Err(syntax(line, "unterminated string")),
                        },
                        Some('\n') | None => return Err(syntax(line, "unterminated string")),
                        Some(ch) => text.push(ch),
                    }
                }
                Token::Str(text)
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' || d == '$' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                Token::Ident(ident)
            }
            _ => {
                chars.next();
                match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    '.' => Token::Dot,
                    '=' => Token::Assign,
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    ';' => Token::End,
                    other => return Err(syntax(line, format!("unexpected character `{other}`"))),
                }
            }
        };
        tokens.push(Spanned { token, line });
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Parenthesis depth; statement ends are ignored inside
    depth: usize,
    /// Recursion depth of the expression parser
    nesting: usize,
}

impl Parser {
    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.line)
    }

    fn peek(&mut self) -> Option<&Token> {
        if self.depth > 0 {
            while self.tokens.get(self.pos).is_some_and(|t| t.token == Token::End) {
                self.pos += 1;
            }
        }
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn next(&mut self) -> Option<Token> {
        self.peek();
        let token = self.tokens.get(self.pos).map(|t| t.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, want: &Token, what: &str) -> Result<(), AnnotationError> {
        let line = self.line();
        match self.next() {
            Some(ref got) if got == want => Ok(()),
            Some(got) => Err(syntax(line, format!("expected {what}, found {got:?}"))),
            None => Err(syntax(line, format!("expected {what}, found end of script"))),
        }
    }

    fn descend(&mut self) -> Result<(), AnnotationError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(syntax(self.line(), "expression nested too deeply"));
        }
        Ok(())
    }

    fn ascend(&mut self) {
        self.nesting -= 1;
    }

    fn height(&self, height: usize) -> Result<usize, AnnotationError> {
        if height > MAX_NESTING {
            return Err(syntax(self.line(), "expression nested too deeply"));
        }
        Ok(height)
    }

    fn ident(&mut self) -> Result<String, AnnotationError> {
        let line = self.line();
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            Some(got) => Err(syntax(line, format!("expected a name, found {got:?}"))),
            None => Err(syntax(line, "expected a name, found end of script")),
        }
    }

    fn statements(&mut self) -> Result<Vec<Statement>, AnnotationError> {
        let mut out = Vec::new();
        loop {
            while self.peek() == Some(&Token::End) {
                self.pos += 1;
            }
            if self.peek().is_none() {
                return Ok(out);
            }
            out.push(self.statement()?);
            match self.peek() {
                None | Some(Token::End) => {}
                Some(other) => {
                    let msg = format!("expected end of statement, found {other:?}");
                    return Err(syntax(self.line(), msg));
                }
            }
        }
    }

    fn statement(&mut self) -> Result<Statement, AnnotationError> {
        let line = self.line();
        let mut name = self.ident()?;
        if self.peek() == Some(&Token::Dot) {
            if name != "ctx" {
                return Err(syntax(line, format!("unknown object `{name}`")));
            }
            self.pos += 1;
            name = self.ident()?;
        }

        let kind = match self.next() {
            Some(Token::Assign) => StatementKind::Assign {
                property: name,
                value: self.expr()?.0,
            },
            Some(Token::LParen) => StatementKind::Call {
                name,
                args: self.args()?.0,
            },
            _ => return Err(syntax(line, format!("`{name}` must be assigned or called"))),
        };
        Ok(Statement { line, kind })
    }

    /// Arguments after an opening parenthesis, through the closing one,
    /// with the height of the tallest
    fn args(&mut self) -> Result<(Vec<Expr>, usize), AnnotationError> {
        self.depth += 1;
        self.descend()?;
        let mut args = Vec::new();
        let mut height = 0;
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
        } else {
            loop {
                let (arg, h) = self.expr()?;
                args.push(arg);
                height = height.max(h);
                let line = self.line();
                match self.next() {
                    Some(Token::Comma) => {}
                    Some(Token::RParen) => break,
                    _ => return Err(syntax(line, "expected `,` or `)`")),
                }
            }
        }
        self.ascend();
        self.depth -= 1;
        Ok((args, height))
    }

    fn expr(&mut self) -> Result<Node, AnnotationError> {
        let (mut lhs, mut height) = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok((lhs, height)),
            };
            self.pos += 1;
            let (rhs, rhs_height) = self.term()?;
            height = self.height(height.max(rhs_height) + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Node, AnnotationError> {
        let (mut lhs, mut height) = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok((lhs, height)),
            };
            self.pos += 1;
            let (rhs, rhs_height) = self.unary()?;
            height = self.height(height.max(rhs_height) + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Node, AnnotationError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                self.descend()?;
                let (inner, height) = self.unary()?;
                self.ascend();
                Ok((Expr::Neg(Box::new(inner)), self.height(height + 1)?))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.descend()?;
                let node = self.unary()?;
                self.ascend();
                Ok(node)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Node, AnnotationError> {
        let line = self.line();
        match self.next() {
            Some(Token::Number(n)) => Ok((Expr::Number(n), 1)),
            Some(Token::Str(s)) => Ok((Expr::Str(s), 1)),
            Some(Token::LParen) => {
                self.depth += 1;
                self.descend()?;
                let inner = self.expr()?;
                self.expect(&Token::RParen, "`)`")?;
                self.ascend();
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::Ident(mut name)) => {
                if self.peek() == Some(&Token::Dot) {
                    self.pos += 1;
                    let member = self.ident()?;
                    name = format!("{name}.{member}");
                }
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let (args, height) = self.args()?;
                    Ok((Expr::Call { name, args }, self.height(height + 1)?))
                } else {
                    Ok((Expr::Constant(name), 1))
                }
            }
            Some(got) => Err(syntax(line, format!("unexpected {got:?}"))),
            None => Err(syntax(line, "unexpected end of script")),
        }
    }
}

/// Parse a script into statements
pub fn parse_script(source: &str) -> Result<Vec<Statement>, AnnotationError> {
    let tokens = tokenize(source)?;
    Parser {
        tokens,
        pos: 0,
        depth: 0,
        nesting: 0,
    }
    .statements()
}
