//! Built-in expression runtime.
//!
//! A deliberately small language, enough to live-code tones and control
//! curves without an external synthesis runtime:
//!
//! ```text
//! // setup
//! f = 220
//! // loop
//! out = sin(phase * 4 + tau * f * t) * gain
//! ```
//!
//! Statements are `name = expr` or a bare `expr`, separated by newlines or
//! `;`. Operators are `+ - * / % ^` with the usual precedence, `^` binding
//! tightest and associating to the right. Readable builtins are `t`,
//! `phase`, `sr`, `input`, `pi`, `tau`, plus every control parameter by
//! name. `sample(slot, position)` reads the first channel of a loaded sample,
//! with slots numbered in name order and positions in frames. Variables assigned in the setup stage persist into the loop stage
//! and across samples. The sample produced by the loop stage is the value of
//! `out` if the program defines it, otherwise the value of its last statement.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::f64::consts::{PI, TAU};

use hashbrown::HashMap;

use crate::error::{CompileError, Stage};
use crate::eval::EvalCommand;
use crate::runtime::{FrameContext, ParamTable, Program, SynthRuntime};

/// Runtime that compiles [`EvalCommand`]s written in the expression language.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExprRuntime;

impl ExprRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl SynthRuntime for ExprRuntime {
    fn compile(
        &self,
        command: &EvalCommand,
        params: &ParamTable,
    ) -> Result<Box<dyn Program>, CompileError> {
        let mut scope = Scope::default();

        let setup = Parser::new(&command.setup, Stage::Setup, &mut scope, params)?.parse_program()?;
        let body = Parser::new(&command.loop_source, Stage::Loop, &mut scope, params)?.parse_program()?;

        if body.is_empty() {
            return Err(CompileError::new(Stage::Loop, 0, "loop stage is empty"));
        }

        let out = scope.slots.get("out").copied();
        Ok(Box::new(ExprProgram {
            setup,
            body,
            vars: vec![0.0; scope.names.len()],
            names: scope.names,
            out,
        }))
    }
}

struct ExprProgram {
    setup: Vec<Stmt>,
    body: Vec<Stmt>,
    vars: Vec<f64>,
    names: Vec<String>,
    out: Option<usize>,
}

impl ExprProgram {
    fn run(stmts: &[Stmt], vars: &mut [f64], ctx: &FrameContext<'_>) -> f64 {
        let mut last = 0.0;
        for stmt in stmts {
            match stmt {
                Stmt::Assign { slot, expr, .. } => {
                    let value = eval(expr, vars, ctx);
                    vars[*slot] = value;
                    last = value;
                }
                Stmt::Expr(expr) => last = eval(expr, vars, ctx),
            }
        }
        last
    }
}

impl Program for ExprProgram {
    fn setup(&mut self, ctx: &FrameContext<'_>) -> Result<(), CompileError> {
        Self::run(&self.setup, &mut self.vars, ctx);

        for stmt in &self.setup {
            if let Stmt::Assign { slot, pos, .. } = stmt {
                if !self.vars[*slot].is_finite() {
                    return Err(CompileError::new(
                        Stage::Setup,
                        *pos,
                        format!("`{}` is not finite after setup", self.names[*slot]),
                    ));
                }
            }
        }
        Ok(())
    }

    #[inline]
    fn next_sample(&mut self, ctx: &FrameContext<'_>) -> f64 {
        let last = Self::run(&self.body, &mut self.vars, ctx);
        match self.out {
            Some(slot) => self.vars[slot],
            None => last,
        }
    }
}

// ---------------------------------------------------------------------------
// Syntax tree

enum Stmt {
    Assign { slot: usize, expr: Expr, pos: usize },
    Expr(Expr),
}

enum Expr {
    Num(f64),
    Var(usize),
    Param(usize),
    Builtin(Builtin),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Vec<Expr>),
}

#[derive(Clone, Copy)]
enum Builtin {
    Time,
    Phase,
    SampleRate,
    Input,
}

#[derive(Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Clone, Copy)]
enum Func {
    Sin,
    Cos,
    Tan,
    Abs,
    Sqrt,
    Exp,
    Floor,
    Min,
    Max,
    Clamp,
    Saw,
    Square,
    Tri,
    Sample,
}

impl Func {
    fn lookup(name: &str) -> Option<(Func, usize)> {
        let f = match name {
            "sin" => (Func::Sin, 1),
            "cos" => (Func::Cos, 1),
            "tan" => (Func::Tan, 1),
            "abs" => (Func::Abs, 1),
            "sqrt" => (Func::Sqrt, 1),
            "exp" => (Func::Exp, 1),
            "floor" => (Func::Floor, 1),
            "min" => (Func::Min, 2),
            "max" => (Func::Max, 2),
            "clamp" => (Func::Clamp, 3),
            "saw" => (Func::Saw, 1),
            "square" => (Func::Square, 1),
            "tri" => (Func::Tri, 1),
            "sample" => (Func::Sample, 2),
            _ => return None,
        };
        Some(f)
    }

    #[inline]
    fn apply(self, a: &[f64; 3], ctx: &FrameContext<'_>) -> f64 {
        // waveform helpers take a phase in radians
        let cycle = |p: f64| (p / TAU).rem_euclid(1.0);
        match self {
            Func::Sin => a[0].sin(),
            Func::Cos => a[0].cos(),
            Func::Tan => a[0].tan(),
            Func::Abs => a[0].abs(),
            Func::Sqrt => a[0].sqrt(),
            Func::Exp => a[0].exp(),
            Func::Floor => a[0].floor(),
            Func::Min => a[0].min(a[1]),
            Func::Max => a[0].max(a[1]),
            Func::Clamp => a[0].max(a[1]).min(a[2]),
            Func::Saw => 2.0 * cycle(a[0]) - 1.0,
            Func::Square => {
                if cycle(a[0]) < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Func::Tri => 4.0 * (cycle(a[0]) - 0.5).abs() - 1.0,
            Func::Sample => read_sample(ctx, a[0], a[1]),
        }
    }
}

/// Silence outside the asset, for unknown slots and for negative or NaN indices
fn read_sample(ctx: &FrameContext<'_>, slot: f64, position: f64) -> f64 {
    if !(slot >= 0.0 && position >= 0.0) {
        return 0.0;
    }
    ctx.samples
        .by_slot(slot as usize)
        .and_then(|asset| asset.frame(position as usize, 0))
        .map_or(0.0, f64::from)
}

fn eval(expr: &Expr, vars: &[f64], ctx: &FrameContext<'_>) -> f64 {
    match expr {
        Expr::Num(v) => *v,
        Expr::Var(slot) => vars[*slot],
        Expr::Param(i) => ctx.params.get(*i).copied().unwrap_or(0.0),
        Expr::Builtin(b) => match b {
            Builtin::Time => ctx.time,
            Builtin::Phase => ctx.phase,
            Builtin::SampleRate => ctx.sample_rate as f64,
            Builtin::Input => ctx.input,
        },
        Expr::Neg(e) => -eval(e, vars, ctx),
        Expr::Binary(op, lhs, rhs) => {
            let a = eval(lhs, vars, ctx);
            let b = eval(rhs, vars, ctx);
            match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Rem => a % b,
                BinOp::Pow => a.powf(b),
            }
        }
        Expr::Call(func, args) => {
            let mut buf = [0.0; 3];
            for (slot, arg) in buf.iter_mut().zip(args) {
                *slot = eval(arg, vars, ctx);
            }
            func.apply(&buf, ctx)
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer

#[derive(Clone, Copy, Debug, PartialEq)]
enum Tok<'a> {
    Num(f64),
    Ident(&'a str),
    Op(u8),
    LParen,
    RParen,
    Comma,
    Assign,
    Sep,
    Eof,
}

#[derive(Clone, Copy, Debug)]
struct Spanned<'a> {
    tok: Tok<'a>,
    pos: usize,
}

fn lex(src: &str, stage: Stage) -> Result<Vec<Spanned<'_>>, CompileError> {
    let bytes = src.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let start = i;
        let tok = match bytes[i] {
            b' ' | b'\t' | b'\r' => {
                i += 1;
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'\n' | b';' => {
                i += 1;
                Tok::Sep
            }
            b'0'..=b'9' | b'.' => {
                while i < len && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                if i < len && (bytes[i] == b'e' || bytes[i] == b'E') {
                    let mut j = i + 1;
                    if j < len && (bytes[j] == b'+' || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j < len && bytes[j].is_ascii_digit() {
                        i = j;
                        while i < len && bytes[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text = &src[start..i];
                let value = text.parse::<f64>().map_err(|_| {
                    CompileError::new(stage, start, format!("invalid number `{text}`"))
                })?;
                Tok::Num(value)
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                while i < len && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                Tok::Ident(&src[start..i])
            }
            c @ (b'+' | b'-' | b'*' | b'/' | b'%' | b'^') => {
                i += 1;
                Tok::Op(c)
            }
            b'(' => {
                i += 1;
                Tok::LParen
            }
            b')' => {
                i += 1;
                Tok::RParen
            }
            b',' => {
                i += 1;
                Tok::Comma
            }
            b'=' => {
                i += 1;
                Tok::Assign
            }
            _ => {
                let ch = src[start..].chars().next().unwrap_or('?');
                return Err(CompileError::new(
                    stage,
                    start,
                    format!("unexpected character `{ch}`"),
                ));
            }
        };
        tokens.push(Spanned { tok, pos: start });
    }

    tokens.push(Spanned {
        tok: Tok::Eof,
        pos: len,
    });
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser

/// Variables shared by both stages of one command
#[derive(Default)]
struct Scope {
    slots: HashMap<String, usize>,
    names: Vec<String>,
}

impl Scope {
    fn define(&mut self, name: &str) -> usize {
        if let Some(&slot) = self.slots.get(name) {
            return slot;
        }
        let slot = self.names.len();
        self.slots.insert(name.to_string(), slot);
        self.names.push(name.to_string());
        slot
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(name, "t" | "phase" | "sr" | "input" | "pi" | "tau") || Func::lookup(name).is_some()
}

/// Deepest nesting of operators, parentheses and calls a program may use
const MAX_DEPTH: usize = 256;

struct Parser<'a, 's> {
    tokens: Vec<Spanned<'a>>,
    pos: usize,
    depth: usize,
    stage: Stage,
    scope: &'s mut Scope,
    params: &'s ParamTable,
}

impl<'a, 's> Parser<'a, 's> {
    fn new(
        src: &'a str,
        stage: Stage,
        scope: &'s mut Scope,
        params: &'s ParamTable,
    ) -> Result<Self, CompileError> {
        Ok(Self {
            tokens: lex(src, stage)?,
            pos: 0,
            depth: 0,
            stage,
            scope,
            params,
        })
    }

    fn peek(&self) -> Spanned<'a> {
        self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_tok_at(&self, offset: usize) -> Tok<'a> {
        self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].tok
    }

    fn bump(&mut self) -> Spanned<'a> {
        let t = self.peek();
        if t.tok != Tok::Eof {
            self.pos += 1;
        }
        t
    }

    fn error(&self, pos: usize, message: impl Into<String>) -> CompileError {
        CompileError::new(self.stage, pos, message)
    }

    /// Counts one more level of tree depth. Callers restore `depth` once the
    /// level is built; on error the whole parse is abandoned.
    fn descend(&mut self) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error(self.peek().pos, "expression nested too deeply"));
        }
        Ok(())
    }

    fn parse_program(mut self) -> Result<Vec<Stmt>, CompileError> {
        let mut stmts = Vec::new();
        loop {
            while self.peek().tok == Tok::Sep {
                self.bump();
            }
            if self.peek().tok == Tok::Eof {
                return Ok(stmts);
            }

            stmts.push(self.statement()?);

            let next = self.peek();
            match next.tok {
                Tok::Sep | Tok::Eof => {}
                other => return Err(self.error(next.pos, format!("expected end of statement, found {other:?}"))),
            }
        }
    }

    fn statement(&mut self) -> Result<Stmt, CompileError> {
        let head = self.peek();
        if let (Tok::Ident(name), Tok::Assign) = (head.tok, self.peek_tok_at(1)) {
            if is_reserved(name) || self.params.index_of(name).is_some() {
                return Err(self.error(head.pos, format!("cannot assign to `{name}`")));
            }
            self.bump();
            self.bump();
            // right-hand side is resolved before the name exists
            let expr = self.expr()?;
            let slot = self.scope.define(name);
            return Ok(Stmt::Assign {
                slot,
                expr,
                pos: head.pos,
            });
        }
        Ok(Stmt::Expr(self.expr()?))
    }

    fn expr(&mut self) -> Result<Expr, CompileError> {
        let outer = self.depth;
        self.descend()?;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek().tok {
                Tok::Op(b'+') => BinOp::Add,
                Tok::Op(b'-') => BinOp::Sub,
                _ => break,
            };
            self.bump();
            // left-leaning chains deepen the tree without recursing
            self.descend()?;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = outer;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, CompileError> {
        let outer = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek().tok {
                Tok::Op(b'*') => BinOp::Mul,
                Tok::Op(b'/') => BinOp::Div,
                Tok::Op(b'%') => BinOp::Rem,
                _ => break,
            };
            self.bump();
            self.descend()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth = outer;
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, CompileError> {
        if self.peek().tok == Tok::Op(b'-') {
            self.bump();
            let outer = self.depth;
            self.descend()?;
            let operand = self.unary()?;
            self.depth = outer;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, CompileError> {
        let base = self.atom()?;
        if self.peek().tok == Tok::Op(b'^') {
            self.bump();
            let outer = self.depth;
            self.descend()?;
            let exponent = self.unary()?;
            self.depth = outer;
            return Ok(Expr::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr, CompileError> {
        let t = self.bump();
        match t.tok {
            Tok::Num(v) => Ok(Expr::Num(v)),
            Tok::LParen => {
                let inner = self.expr()?;
                self.expect(Tok::RParen, "`)`")?;
                Ok(inner)
            }
            Tok::Ident(name) if self.peek().tok == Tok::LParen => self.call(name, t.pos),
            Tok::Ident(name) => self.resolve(name, t.pos),
            Tok::Eof => Err(self.error(t.pos, "unexpected end of input")),
            other => Err(self.error(t.pos, format!("unexpected {other:?}"))),
        }
    }

    fn call(&mut self, name: &str, pos: usize) -> Result<Expr, CompileError> {
        let (func, arity) =
            Func::lookup(name).ok_or_else(|| self.error(pos, format!("unknown function `{name}`")))?;
        self.bump(); // (

        let mut args = Vec::with_capacity(arity);
        if self.peek().tok != Tok::RParen {
            loop {
                args.push(self.expr()?);
                if self.peek().tok == Tok::Comma {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(Tok::RParen, "`)`")?;

        if args.len() != arity {
            return Err(self.error(
                pos,
                format!("`{name}` takes {arity} argument(s), got {}", args.len()),
            ));
        }
        Ok(Expr::Call(func, args))
    }

    fn resolve(&self, name: &str, pos: usize) -> Result<Expr, CompileError> {
        let expr = match name {
            "t" => Expr::Builtin(Builtin::Time),
            "phase" => Expr::Builtin(Builtin::Phase),
            "sr" => Expr::Builtin(Builtin::SampleRate),
            "input" => Expr::Builtin(Builtin::Input),
            "pi" => Expr::Num(PI),
            "tau" => Expr::Num(TAU),
            _ => {
                if let Some(&slot) = self.scope.slots.get(name) {
                    Expr::Var(slot)
                } else if let Some(i) = self.params.index_of(name) {
                    Expr::Param(i)
                } else {
                    return Err(self.error(pos, format!("undefined variable `{name}`")));
                }
            }
        };
        Ok(expr)
    }

    fn expect(&mut self, tok: Tok<'a>, what: &str) -> Result<(), CompileError> {
        let t = self.bump();
        if t.tok == tok {
            Ok(())
        } else {
            Err(self.error(t.pos, format!("expected {what}, found {:?}", t.tok)))
        }
    }
}
