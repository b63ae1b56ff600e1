//! Load-profile expressions: a tiny AST, a parser, and a stack interpreter.
//!
//! Configuration strings like `"in0*1.2 + ${startup}"` describe a resource
//! load as a function of input/output cardinalities and named variables (the
//! latter fitted by [`crate::learner`]). Per the re-architecting notes this
//! is parsed once into an [`Expr`] tree and evaluated by a small postfix
//! stack machine rather than re-parsed on every call.

use std::collections::HashMap;
use std::fmt;

use anyhow::{Result, bail};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intrinsic {
    Round,
    Log,
    Max,
    Min,
}

impl Intrinsic {
    fn name(self) -> &'static str {
        match self {
            Self::Round => "round",
            Self::Log => "log",
            Self::Max => "max",
            Self::Min => "min",
        }
    }

    fn arity(self) -> usize {
        match self {
            Self::Round | Self::Log => 1,
            Self::Max | Self::Min => 2,
        }
    }
}

/// A symbolic leaf: an input/output cardinality slot or a named variable.
#[derive(Clone, Debug, PartialEq)]
pub enum Symbol {
    Input(usize),
    Output(usize),
    Variable(String),
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(i) => write!(f, "in{i}"),
            Self::Output(i) => write!(f, "out{i}"),
            Self::Variable(name) => write!(f, "${{{name}}}"),
        }
    }
}

/// A parsed load-profile expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f64),
    Symbol(Symbol),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
    Call(Intrinsic, Vec<Expr>),
}

impl fmt::Display for Expr {
    /// Canonical, fully-parenthesized rendering: `parse(e.to_string()).to_string() == e.to_string()`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Symbol(s) => write!(f, "{s}"),
            Self::BinOp(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
            Self::Call(intrinsic, args) => {
                write!(f, "{}(", intrinsic.name())?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// One instruction of the postfix stack interpreter.
#[derive(Clone, Debug)]
enum Instr {
    PushNumber(f64),
    PushSymbol(Symbol),
    BinOp(BinOp),
    Intrinsic(Intrinsic),
}

/// A compiled expression, ready for repeated evaluation without re-parsing.
#[derive(Clone, Debug)]
pub struct CompiledExpr {
    program: Vec<Instr>,
    source: Expr,
}

impl CompiledExpr {
    #[must_use]
    pub fn source(&self) -> &Expr {
        &self.source
    }

    /// Evaluate against the given input/output cardinalities (as `f64`,
    /// already extracted from the caller's `CardinalityEstimate`s) and a
    /// namespace of named variables.
    ///
    /// # Errors
    /// Returns an error if a referenced variable is not bound, or if the
    /// program is malformed (stack underflow -- cannot happen for a program
    /// produced by [`parse`], but checked defensively).
    pub fn eval(&self, inputs: &[f64], outputs: &[f64], vars: &HashMap<String, f64>) -> Result<f64> {
        let mut stack: Vec<f64> = Vec::with_capacity(self.program.len());
        for instr in &self.program {
            match instr {
                Instr::PushNumber(n) => stack.push(*n),
                Instr::PushSymbol(Symbol::Input(i)) => {
                    let Some(v) = inputs.get(*i) else {
                        bail!("expression references in{i} but only {} inputs given", inputs.len());
                    };
                    stack.push(*v);
                }
                Instr::PushSymbol(Symbol::Output(i)) => {
                    let Some(v) = outputs.get(*i) else {
                        bail!("expression references out{i} but only {} outputs given", outputs.len());
                    };
                    stack.push(*v);
                }
                Instr::PushSymbol(Symbol::Variable(name)) => {
                    let Some(v) = vars.get(name) else {
                        bail!("expression references unbound variable '{name}'");
                    };
                    stack.push(*v);
                }
                Instr::BinOp(op) => {
                    let rhs = stack.pop().ok_or_else(|| anyhow::anyhow!("stack underflow"))?;
                    let lhs = stack.pop().ok_or_else(|| anyhow::anyhow!("stack underflow"))?;
                    stack.push(match op {
                        BinOp::Add => lhs + rhs,
                        BinOp::Sub => lhs - rhs,
                        BinOp::Mul => lhs * rhs,
                        BinOp::Div => lhs / rhs,
                    });
                }
                Instr::Intrinsic(Intrinsic::Round) => {
                    let v = stack.pop().ok_or_else(|| anyhow::anyhow!("stack underflow"))?;
                    stack.push(v.round());
                }
                Instr::Intrinsic(Intrinsic::Log) => {
                    let v = stack.pop().ok_or_else(|| anyhow::anyhow!("stack underflow"))?;
                    stack.push(v.ln());
                }
                Instr::Intrinsic(Intrinsic::Max) => {
                    let rhs = stack.pop().ok_or_else(|| anyhow::anyhow!("stack underflow"))?;
                    let lhs = stack.pop().ok_or_else(|| anyhow::anyhow!("stack underflow"))?;
                    stack.push(lhs.max(rhs));
                }
                Instr::Intrinsic(Intrinsic::Min) => {
                    let rhs = stack.pop().ok_or_else(|| anyhow::anyhow!("stack underflow"))?;
                    let lhs = stack.pop().ok_or_else(|| anyhow::anyhow!("stack underflow"))?;
                    stack.push(lhs.min(rhs));
                }
            }
        }
        stack.pop().ok_or_else(|| anyhow::anyhow!("empty expression"))
    }

    /// All named variables referenced anywhere in the expression, in
    /// first-occurrence order -- this is the learner's "active gene set" for
    /// a given operator class.
    #[must_use]
    pub fn variables(&self) -> Vec<String> {
        let mut names = Vec::new();
        collect_variables(&self.source, &mut names);
        names
    }
}

fn collect_variables(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Symbol(Symbol::Variable(name)) => {
            if !out.contains(name) {
                out.push(name.clone());
            }
        }
        Expr::Symbol(_) => {}
        Expr::BinOp(_, lhs, rhs) => {
            collect_variables(lhs, out);
            collect_variables(rhs, out);
        }
        Expr::Call(_, args) => {
            for a in args {
                collect_variables(a, out);
            }
        }
    }
}

fn compile(expr: &Expr, program: &mut Vec<Instr>) {
    match expr {
        Expr::Number(n) => program.push(Instr::PushNumber(*n)),
        Expr::Symbol(s) => program.push(Instr::PushSymbol(s.clone())),
        Expr::BinOp(op, lhs, rhs) => {
            compile(lhs, program);
            compile(rhs, program);
            program.push(Instr::BinOp(*op));
        }
        Expr::Call(intrinsic, args) => {
            for a in args {
                compile(a, program);
            }
            program.push(Instr::Intrinsic(*intrinsic));
        }
    }
}

/// Parse a load expression string into a [`CompiledExpr`].
///
/// Grammar (standard precedence, left-associative `+ -` then `* /`):
/// `expr := term (('+' | '-') term)*`
/// `term := factor (('*' | '/') factor)*`
/// `factor := number | 'in' digit+ | 'out' digit+ | '${' name '}' | intrinsic '(' expr (',' expr)* ')' | '(' expr ')'`
///
/// # Errors
/// Returns an error on any malformed input: unexpected token, unbalanced
/// parens, wrong intrinsic arity, or trailing garbage.
pub fn parse(source: &str) -> Result<CompiledExpr> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        bail!("unexpected trailing input in expression '{source}'");
    }
    let mut program = Vec::new();
    compile(&ast, &mut program);
    Ok(CompiledExpr { program, source: ast })
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Variable(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;
    let mut tokens = Vec::new();
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '$' => {
                if chars.get(i + 1) != Some(&'{') {
                    bail!("expected '{{' after '$' at position {i}");
                }
                i += 2;
                let start = i;
                while i < chars.len() && chars[i] != '}' {
                    i += 1;
                }
                if i == chars.len() {
                    bail!("unterminated variable reference starting at {start}");
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push(Token::Variable(name));
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value: f64 = text
                    .parse()
                    .map_err(|_| anyhow::anyhow!("malformed number '{text}'"))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            }
            other => bail!("unexpected character '{other}' at position {i}"),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.bump();
                    let rhs = self.parse_term()?;
                    lhs = Expr::BinOp(BinOp::Add, Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Minus) => {
                    self.bump();
                    let rhs = self.parse_term()?;
                    lhs = Expr::BinOp(BinOp::Sub, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr> {
        let mut lhs = self.parse_factor()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.bump();
                    let rhs = self.parse_factor()?;
                    lhs = Expr::BinOp(BinOp::Mul, Box::new(lhs), Box::new(rhs));
                }
                Some(Token::Slash) => {
                    self.bump();
                    let rhs = self.parse_factor()?;
                    lhs = Expr::BinOp(BinOp::Div, Box::new(lhs), Box::new(rhs));
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Variable(name)) => Ok(Expr::Symbol(Symbol::Variable(name))),
            Some(Token::Minus) => {
                let inner = self.parse_factor()?;
                Ok(Expr::BinOp(BinOp::Sub, Box::new(Expr::Number(0.0)), Box::new(inner)))
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => bail!("expected closing ')'"),
                }
            }
            Some(Token::Ident(name)) => self.parse_ident(&name),
            other => bail!("unexpected token {other:?} in expression"),
        }
    }

    fn parse_ident(&mut self, name: &str) -> Result<Expr> {
        if let Some(intrinsic) = match name {
            "round" => Some(Intrinsic::Round),
            "log" => Some(Intrinsic::Log),
            "max" => Some(Intrinsic::Max),
            "min" => Some(Intrinsic::Min),
            _ => None,
        } {
            match self.bump() {
                Some(Token::LParen) => {}
                _ => bail!("expected '(' after intrinsic '{name}'"),
            }
            let mut args = vec![self.parse_expr()?];
            while matches!(self.peek(), Some(Token::Comma)) {
                self.bump();
                args.push(self.parse_expr()?);
            }
            match self.bump() {
                Some(Token::RParen) => {}
                _ => bail!("expected ')' closing intrinsic '{name}'"),
            }
            if args.len() != intrinsic.arity() {
                bail!(
                    "intrinsic '{name}' expects {} argument(s), got {}",
                    intrinsic.arity(),
                    args.len()
                );
            }
            return Ok(Expr::Call(intrinsic, args));
        }

        if let Some(rest) = name.strip_prefix("in") {
            if let Ok(idx) = rest.parse::<usize>() {
                return Ok(Expr::Symbol(Symbol::Input(idx)));
            }
        }
        if let Some(rest) = name.strip_prefix("out") {
            if let Ok(idx) = rest.parse::<usize>() {
                return Ok(Expr::Symbol(Symbol::Output(idx)));
            }
        }
        bail!("unknown identifier '{name}' in expression")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_arithmetic_with_symbols_and_variables() {
        let compiled = parse("in0 * 1.2 + ${startup}").unwrap();
        let mut vars = HashMap::new();
        vars.insert("startup".to_string(), 50.0);
        let result = compiled.eval(&[100.0], &[], &vars).unwrap();
        assert!((result - 170.0).abs() < 1e-9);
    }

    #[test]
    fn intrinsics_round_trip() {
        let compiled = parse("max(in0, out0)").unwrap();
        let result = compiled.eval(&[3.0], &[7.0], &HashMap::new()).unwrap();
        assert!((result - 7.0).abs() < 1e-9);
    }

    #[test]
    fn canonical_serialization_is_stable() {
        let compiled = parse("in0*1.2+${a}").unwrap();
        let once = compiled.source().to_string();
        let reparsed = parse(&once).unwrap();
        let twice = reparsed.source().to_string();
        assert_eq!(once, twice);
    }

    #[test]
    fn active_variables_are_collected_in_order() {
        let compiled = parse("${b} + ${a} * ${b}").unwrap();
        assert_eq!(compiled.variables(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn unbound_variable_is_an_error() {
        let compiled = parse("${missing}").unwrap();
        assert!(compiled.eval(&[], &[], &HashMap::new()).is_err());
    }

    #[test]
    fn malformed_expression_is_rejected() {
        assert!(parse("in0 +").is_err());
        assert!(parse("in0 * (out0").is_err());
        assert!(parse("round(in0, out0)").is_err());
    }
}
