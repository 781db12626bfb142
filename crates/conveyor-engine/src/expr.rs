//! The `Solver` expression language.
//!
//! A program is a `;`-separated list of statements. A statement is either
//! an expression or an assignment `Address = expression`. Identifiers are
//! state addresses (`Report.Count`, `Pages[0].Body.total`) resolved
//! against the record the program is evaluated on; an address that does
//! not resolve reads as `null`.
//!
//! ```text
//! Total = Price * Quantity; Label = concat(upper(Region), "-", Total)
//! ```
//!
//! Parsing is a tokenizer followed by a Pratt parser. Operator binding,
//! lowest first: `?:`, `||`, `&&`, `== !=`, `< <= > >=`, `+ -`, `* / %`,
//! then the prefix operators `!` and `-`.

use std::cmp::Ordering;

use conveyor_state::{Segment, StateMap, parse_address, resolve_in, set_in};
use serde_json::{Map, Number, Value};

use crate::error::ExprError;
use crate::params::{scalar_text, truthy};

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Number(f64),
  Str(String),
  Ident(String),
  True,
  False,
  Null,
  LParen,
  RParen,
  Comma,
  Question,
  Colon,
  Semi,
  Assign,
  Plus,
  Minus,
  Star,
  Slash,
  Percent,
  Eq,
  NotEq,
  Lt,
  LtEq,
  Gt,
  GtEq,
  And,
  Or,
  Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Rem,
  Eq,
  NotEq,
  Lt,
  LtEq,
  Gt,
  GtEq,
  And,
  Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
  Literal(Value),
  Path(Vec<Segment>),
  Neg(Box<Expr>),
  Not(Box<Expr>),
  Binary(BinaryOp, Box<Expr>, Box<Expr>),
  Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
  Call(Function, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
  Min,
  Max,
  Abs,
  Round,
  Floor,
  Ceil,
  Len,
  Concat,
  Upper,
  Lower,
  If,
  Coalesce,
}

impl Function {
  fn lookup(name: &str) -> Option<Self> {
    Some(match name.to_ascii_lowercase().as_str() {
      "min" => Function::Min,
      "max" => Function::Max,
      "abs" => Function::Abs,
      "round" => Function::Round,
      "floor" => Function::Floor,
      "ceil" => Function::Ceil,
      "len" => Function::Len,
      "concat" => Function::Concat,
      "upper" => Function::Upper,
      "lower" => Function::Lower,
      "if" => Function::If,
      "coalesce" => Function::Coalesce,
      _ => return None,
    })
  }

  /// Minimum and maximum argument count; `None` is unbounded.
  fn arity(self) -> (usize, Option<usize>) {
    match self {
      Function::Min | Function::Max | Function::Coalesce => (1, None),
      Function::Concat => (0, None),
      Function::Round => (1, Some(2)),
      Function::If => (3, Some(3)),
      Function::Abs | Function::Floor | Function::Ceil | Function::Len | Function::Upper | Function::Lower => {
        (1, Some(1))
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
enum Statement {
  Assign { target: String, segments: Vec<Segment>, expr: Expr },
  Expr(Expr),
}

/// A parsed program, reusable across records.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
  statements: Vec<Statement>,
}

/// What evaluating a program produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
  /// Value of the last statement; `null` for an empty program.
  pub result: Value,
  /// Every assignment made, by target address. Later writes win.
  pub assigned: Map<String, Value>,
}

impl Program {
  pub fn parse(source: &str) -> Result<Self, ExprError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
      tokens,
      pos: 0,
      end: source.len(),
      depth: 0,
    };
    let statements = parser.program()?;
    Ok(Self { statements })
  }

  /// Run every statement in order. Assignments write into `record`
  /// immediately, so later statements see them.
  pub fn evaluate(&self, record: &mut StateMap) -> Result<Evaluation, ExprError> {
    let mut result = Value::Null;
    let mut assigned = Map::new();
    for statement in &self.statements {
      result = match statement {
        Statement::Expr(expr) => eval(expr, record)?,
        Statement::Assign {
          target,
          segments,
          expr,
        } => {
          let value = eval(expr, record)?;
          set_in(record, segments, value.clone());
          assigned.insert(target.clone(), value.clone());
          value
        }
      };
    }
    Ok(Evaluation { result, assigned })
  }
}

/// Parse and evaluate `source` against `record` in one step.
pub fn evaluate(source: &str, record: &mut StateMap) -> Result<Evaluation, ExprError> {
  Program::parse(source)?.evaluate(record)
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExprError> {
  let chars: Vec<(usize, char)> = source.char_indices().collect();
  let mut tokens = Vec::new();
  let mut i = 0;

  while i < chars.len() {
    let (pos, c) = chars[i];
    if c.is_whitespace() {
      i += 1;
      continue;
    }

    if c == '"' || c == '\'' {
      let (text, next) = lex_string(&chars, i)?;
      tokens.push((Token::Str(text), pos));
      i = next;
      continue;
    }

    if c.is_ascii_digit() {
      let start = i;
      let mut seen_dot = false;
      while i < chars.len() {
        let d = chars[i].1;
        let fraction = d == '.' && !seen_dot && chars.get(i + 1).is_some_and(|(_, n)| n.is_ascii_digit());
        if !(d.is_ascii_digit() || fraction) {
          break;
        }
        seen_dot |= d == '.';
        i += 1;
      }
      let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
      let number = text
        .parse::<f64>()
        .map_err(|_| ExprError::syntax(pos, format!("invalid number '{}'", text)))?;
      tokens.push((Token::Number(number), pos));
      continue;
    }

    if c.is_alphabetic() || c == '_' {
      let start = i;
      while i < chars.len() && is_address_char(chars[i].1) {
        i += 1;
      }
      let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
      let token = match text.to_ascii_lowercase().as_str() {
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        _ => Token::Ident(text),
      };
      tokens.push((token, pos));
      continue;
    }

    let next = chars.get(i + 1).map(|(_, c)| *c);
    let (token, width) = match (c, next) {
      ('=', Some('=')) => (Token::Eq, 2),
      ('!', Some('=')) => (Token::NotEq, 2),
      ('<', Some('=')) => (Token::LtEq, 2),
      ('>', Some('=')) => (Token::GtEq, 2),
      ('&', Some('&')) => (Token::And, 2),
      ('|', Some('|')) => (Token::Or, 2),
      ('=', _) => (Token::Assign, 1),
      ('!', _) => (Token::Not, 1),
      ('<', _) => (Token::Lt, 1),
      ('>', _) => (Token::Gt, 1),
      ('+', _) => (Token::Plus, 1),
      ('-', _) => (Token::Minus, 1),
      ('*', _) => (Token::Star, 1),
      ('/', _) => (Token::Slash, 1),
      ('%', _) => (Token::Percent, 1),
      ('(', _) => (Token::LParen, 1),
      (')', _) => (Token::RParen, 1),
      (',', _) => (Token::Comma, 1),
      ('?', _) => (Token::Question, 1),
      (':', _) => (Token::Colon, 1),
      (';', _) => (Token::Semi, 1),
      _ => return Err(ExprError::syntax(pos, format!("unexpected character '{}'", c))),
    };
    tokens.push((token, pos));
    i += width;
  }

  Ok(tokens)
}

fn is_address_char(c: char) -> bool {
  c.is_alphanumeric() || matches!(c, '_' | '.' | '[' | ']')
}

/// Lex a quoted string starting at `chars[start]`; returns the text and the
/// index after the closing quote.
fn lex_string(chars: &[(usize, char)], start: usize) -> Result<(String, usize), ExprError> {
  let (pos, quote) = chars[start];
  let mut text = String::new();
  let mut i = start + 1;
  while let Some(&(_, c)) = chars.get(i) {
    match c {
      c if c == quote => return Ok((text, i + 1)),
      '\\' => {
        let escaped = chars
          .get(i + 1)
          .map(|(_, c)| *c)
          .ok_or_else(|| ExprError::syntax(pos, "unterminated string"))?;
        text.push(match escaped {
          'n' => '\n',
          't' => '\t',
          'r' => '\r',
          other => other,
        });
        i += 2;
      }
      c => {
        text.push(c);
        i += 1;
      }
    }
  }
  Err(ExprError::syntax(pos, "unterminated string"))
}

const TERNARY_BP: u8 = 1;
const PREFIX_BP: u8 = 8;

/// Deepest tree the parser will build. Evaluation recurses once per level,
/// so this also bounds the evaluator's stack.
const MAX_DEPTH: usize = 256;

fn binary_op(token: &Token) -> Option<(BinaryOp, u8)> {
  Some(match token {
    Token::Or => (BinaryOp::Or, 2),
    Token::And => (BinaryOp::And, 3),
    Token::Eq => (BinaryOp::Eq, 4),
    Token::NotEq => (BinaryOp::NotEq, 4),
    Token::Lt => (BinaryOp::Lt, 5),
    Token::LtEq => (BinaryOp::LtEq, 5),
    Token::Gt => (BinaryOp::Gt, 5),
    Token::GtEq => (BinaryOp::GtEq, 5),
    Token::Plus => (BinaryOp::Add, 6),
    Token::Minus => (BinaryOp::Sub, 6),
    Token::Star => (BinaryOp::Mul, 7),
    Token::Slash => (BinaryOp::Div, 7),
    Token::Percent => (BinaryOp::Rem, 7),
    _ => return None,
  })
}

struct Parser {
  tokens: Vec<(Token, usize)>,
  pos: usize,
  end: usize,
  depth: usize,
}

impl Parser {
  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos).map(|(t, _)| t)
  }

  fn position(&self) -> usize {
    self.tokens.get(self.pos).map(|(_, p)| *p).unwrap_or(self.end)
  }

  fn advance(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
    self.pos += 1;
    token
  }

  fn expect(&mut self, expected: Token, what: &str) -> Result<(), ExprError> {
    if self.peek() == Some(&expected) {
      self.pos += 1;
      Ok(())
    } else {
      Err(ExprError::syntax(self.position(), format!("expected {}", what)))
    }
  }

  fn program(&mut self) -> Result<Vec<Statement>, ExprError> {
    let mut statements = Vec::new();
    loop {
      while self.peek() == Some(&Token::Semi) {
        self.pos += 1;
      }
      if self.peek().is_none() {
        return Ok(statements);
      }
      statements.push(self.statement()?);
      match self.peek() {
        None | Some(Token::Semi) => {}
        Some(_) => return Err(ExprError::syntax(self.position(), "expected ';' between statements")),
      }
    }
  }

  fn statement(&mut self) -> Result<Statement, ExprError> {
    if let Some((Token::Ident(name), pos)) = self.tokens.get(self.pos)
      && matches!(self.tokens.get(self.pos + 1), Some((Token::Assign, _)))
    {
      let (target, pos) = (name.clone(), *pos);
      let segments = parse_address(&target)
        .ok_or_else(|| ExprError::syntax(pos, format!("'{}' is not a valid address", target)))?;
      self.pos += 2;
      let expr = self.expression(0)?;
      return Ok(Statement::Assign {
        target,
        segments,
        expr,
      });
    }
    Ok(Statement::Expr(self.expression(0)?))
  }

  /// One level deeper in the tree being built.
  fn descend(&mut self) -> Result<(), ExprError> {
    self.depth += 1;
    if self.depth > MAX_DEPTH {
      return Err(ExprError::syntax(self.position(), "expression nested too deeply"));
    }
    Ok(())
  }

  fn expression(&mut self, min_bp: u8) -> Result<Expr, ExprError> {
    let depth = self.depth;
    let expr = self.expression_at(min_bp);
    self.depth = depth;
    expr
  }

  // Each operator folded into `lhs` deepens the tree, so it counts as a
  // level along with every nested call.
  fn expression_at(&mut self, min_bp: u8) -> Result<Expr, ExprError> {
    self.descend()?;
    let mut lhs = self.prefix()?;

    loop {
      let Some(token) = self.peek() else {
        break;
      };

      if *token == Token::Question {
        if TERNARY_BP < min_bp {
          break;
        }
        self.descend()?;
        self.pos += 1;
        let then = self.expression(0)?;
        self.expect(Token::Colon, "':' in conditional expression")?;
        let otherwise = self.expression(TERNARY_BP)?;
        lhs = Expr::Ternary(Box::new(lhs), Box::new(then), Box::new(otherwise));
        continue;
      }

      let Some((op, bp)) = binary_op(token) else {
        break;
      };
      if bp < min_bp {
        break;
      }
      self.descend()?;
      self.pos += 1;
      let rhs = self.expression(bp + 1)?;
      lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
    }

    Ok(lhs)
  }

  fn prefix(&mut self) -> Result<Expr, ExprError> {
    let pos = self.position();
    let Some(token) = self.advance() else {
      return Err(ExprError::syntax(pos, "unexpected end of expression"));
    };

    match token {
      Token::Number(n) => Ok(Expr::Literal(number_value(n).map_err(|e| ExprError::syntax(pos, e.to_string()))?)),
      Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
      Token::True => Ok(Expr::Literal(Value::Bool(true))),
      Token::False => Ok(Expr::Literal(Value::Bool(false))),
      Token::Null => Ok(Expr::Literal(Value::Null)),
      Token::Minus => Ok(Expr::Neg(Box::new(self.expression(PREFIX_BP)?))),
      Token::Not => Ok(Expr::Not(Box::new(self.expression(PREFIX_BP)?))),
      Token::LParen => {
        let inner = self.expression(0)?;
        self.expect(Token::RParen, "')'")?;
        Ok(inner)
      }
      Token::Ident(name) if self.peek() == Some(&Token::LParen) => {
        self.pos += 1;
        self.call(&name, pos)
      }
      Token::Ident(name) => parse_address(&name)
        .map(Expr::Path)
        .ok_or_else(|| ExprError::syntax(pos, format!("'{}' is not a valid address", name))),
      other => Err(ExprError::syntax(pos, format!("unexpected {:?}", other))),
    }
  }

  fn call(&mut self, name: &str, pos: usize) -> Result<Expr, ExprError> {
    let function =
      Function::lookup(name).ok_or_else(|| ExprError::syntax(pos, format!("unknown function '{}'", name)))?;

    let mut args = Vec::new();
    if self.peek() != Some(&Token::RParen) {
      loop {
        args.push(self.expression(0)?);
        if self.peek() == Some(&Token::Comma) {
          self.pos += 1;
        } else {
          break;
        }
      }
    }
    self.expect(Token::RParen, "')' after arguments")?;

    let (min, max) = function.arity();
    if args.len() < min || max.is_some_and(|max| args.len() > max) {
      return Err(ExprError::syntax(
        pos,
        format!("wrong number of arguments to {}(): {}", name, args.len()),
      ));
    }
    Ok(Expr::Call(function, args))
  }
}

fn eval(expr: &Expr, record: &StateMap) -> Result<Value, ExprError> {
  match expr {
    Expr::Literal(value) => Ok(value.clone()),
    Expr::Path(segments) => Ok(resolve_in(record, segments).cloned().unwrap_or(Value::Null)),
    Expr::Neg(inner) => number_value(-number(&eval(inner, record)?)?),
    Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, record)?))),
    Expr::Ternary(cond, then, otherwise) => {
      if truthy(&eval(cond, record)?) {
        eval(then, record)
      } else {
        eval(otherwise, record)
      }
    }
    Expr::Binary(BinaryOp::And, lhs, rhs) => {
      Ok(Value::Bool(truthy(&eval(lhs, record)?) && truthy(&eval(rhs, record)?)))
    }
    Expr::Binary(BinaryOp::Or, lhs, rhs) => {
      Ok(Value::Bool(truthy(&eval(lhs, record)?) || truthy(&eval(rhs, record)?)))
    }
    Expr::Binary(op, lhs, rhs) => binary(*op, eval(lhs, record)?, eval(rhs, record)?),
    Expr::Call(function, args) => call(*function, args, record),
  }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, ExprError> {
  match op {
    BinaryOp::Add if lhs.is_string() || rhs.is_string() => {
      Ok(Value::String(scalar_text(&lhs) + &scalar_text(&rhs)))
    }
    BinaryOp::Add => number_value(number(&lhs)? + number(&rhs)?),
    BinaryOp::Sub => number_value(number(&lhs)? - number(&rhs)?),
    BinaryOp::Mul => number_value(number(&lhs)? * number(&rhs)?),
    BinaryOp::Div | BinaryOp::Rem => {
      let divisor = number(&rhs)?;
      if divisor == 0.0 {
        return Err(ExprError::eval("division by zero"));
      }
      let dividend = number(&lhs)?;
      number_value(if op == BinaryOp::Div {
        dividend / divisor
      } else {
        dividend % divisor
      })
    }
    BinaryOp::Eq => Ok(Value::Bool(loose_eq(&lhs, &rhs))),
    BinaryOp::NotEq => Ok(Value::Bool(!loose_eq(&lhs, &rhs))),
    BinaryOp::Lt => Ok(Value::Bool(compare(&lhs, &rhs)? == Ordering::Less)),
    BinaryOp::LtEq => Ok(Value::Bool(compare(&lhs, &rhs)? != Ordering::Greater)),
    BinaryOp::Gt => Ok(Value::Bool(compare(&lhs, &rhs)? == Ordering::Greater)),
    BinaryOp::GtEq => Ok(Value::Bool(compare(&lhs, &rhs)? != Ordering::Less)),
    BinaryOp::And => Ok(Value::Bool(truthy(&lhs) && truthy(&rhs))),
    BinaryOp::Or => Ok(Value::Bool(truthy(&lhs) || truthy(&rhs))),
  }
}

fn call(function: Function, args: &[Expr], record: &StateMap) -> Result<Value, ExprError> {
  match function {
    Function::If => {
      if truthy(&eval(&args[0], record)?) {
        eval(&args[1], record)
      } else {
        eval(&args[2], record)
      }
    }
    Function::Coalesce => {
      for arg in args {
        let value = eval(arg, record)?;
        if !value.is_null() {
          return Ok(value);
        }
      }
      Ok(Value::Null)
    }
    _ => {
      let values = args
        .iter()
        .map(|arg| eval(arg, record))
        .collect::<Result<Vec<_>, _>>()?;
      apply(function, values)
    }
  }
}

fn apply(function: Function, values: Vec<Value>) -> Result<Value, ExprError> {
  match function {
    Function::Min | Function::Max => {
      let items = match values.as_slice() {
        [Value::Array(items)] => items.clone(),
        _ => values,
      };
      let mut numbers = items.iter().map(number);
      let first = numbers
        .next()
        .ok_or_else(|| ExprError::eval("min()/max() of an empty list"))??;
      let picked = numbers.try_fold(first, |acc, n| {
        let n = n?;
        Ok::<f64, ExprError>(if function == Function::Min { acc.min(n) } else { acc.max(n) })
      })?;
      number_value(picked)
    }
    Function::Abs => number_value(number(&values[0])?.abs()),
    Function::Floor => number_value(number(&values[0])?.floor()),
    Function::Ceil => number_value(number(&values[0])?.ceil()),
    Function::Round => {
      let n = number(&values[0])?;
      let digits = match values.get(1) {
        Some(d) => number(d)?,
        None => 0.0,
      };
      let scale = 10f64.powi(digits as i32);
      number_value((n * scale).round() / scale)
    }
    Function::Len => Ok(Value::from(match &values[0] {
      Value::Null => 0,
      Value::Array(items) => items.len(),
      Value::Object(map) => map.len(),
      other => scalar_text(other).chars().count(),
    })),
    Function::Concat => Ok(Value::String(values.iter().map(scalar_text).collect())),
    Function::Upper => Ok(Value::String(scalar_text(&values[0]).to_uppercase())),
    Function::Lower => Ok(Value::String(scalar_text(&values[0]).to_lowercase())),
    Function::If | Function::Coalesce => Err(ExprError::eval("if() and coalesce() evaluate lazily")),
  }
}

/// Numeric view of a value; numeric strings and booleans convert.
fn number(value: &Value) -> Result<f64, ExprError> {
  match value {
    Value::Number(n) => n
      .as_f64()
      .ok_or_else(|| ExprError::eval(format!("{} is not a finite number", n))),
    Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
    Value::String(s) => s
      .trim()
      .parse::<f64>()
      .map_err(|_| ExprError::eval(format!("'{}' is not a number", s))),
    other => Err(ExprError::eval(format!("{} is not a number", other))),
  }
}

/// Whole numbers come back as JSON integers.
fn number_value(n: f64) -> Result<Value, ExprError> {
  if !n.is_finite() {
    return Err(ExprError::eval("result is not a finite number"));
  }
  if n.fract() == 0.0 && n.abs() < 9.0e15 {
    return Ok(Value::from(n as i64));
  }
  Number::from_f64(n)
    .map(Value::Number)
    .ok_or_else(|| ExprError::eval("result is not a finite number"))
}

fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
  match (lhs, rhs) {
    (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
    _ => lhs == rhs,
  }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, ExprError> {
  if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
    return Ok(a.cmp(b));
  }
  let (a, b) = (number(lhs)?, number(rhs)?);
  a.partial_cmp(&b)
    .ok_or_else(|| ExprError::eval(format!("cannot compare {} and {}", lhs, rhs)))
}
