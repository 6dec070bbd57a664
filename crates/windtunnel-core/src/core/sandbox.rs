// windtunnel-core/src/core/sandbox.rs
// ============================================================================
// Module: Expression Sandbox
// Description: Restricted boolean/arithmetic expression evaluation.
// Purpose: Execute user-supplied conditions without I/O or escape hatches.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! The sandbox parses an expression into a typed AST and evaluates it against
//! a read-only environment of `body`, `headers`, and `context`. The grammar
//! covers comparisons, boolean combinators, arithmetic, membership, member
//! access, indexing, list literals, and an explicit function allow-list
//! (`len`, `sum`, `min`, `max`, `all`, `any`, `abs`). Any name or call
//! outside the allow-list is rejected before evaluation starts. Evaluation
//! checks a wall-clock deadline at every node and enforces a nesting cap, so
//! a hostile expression can neither escape nor stall the engine.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;
use std::time::Instant;

use serde_json::Number;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default wall-clock evaluation budget.
pub const DEFAULT_EVAL_TIMEOUT: Duration = Duration::from_millis(100);

/// Maximum expression nesting depth accepted by the parser.
const MAX_EXPR_DEPTH: usize = 64;

/// Names that resolve without being declared by the environment.
const ALLOWED_NAMES: &[&str] = &["body", "headers", "context", "true", "false", "null"];

/// Callable allow-list.
const ALLOWED_FUNCTIONS: &[&str] = &["len", "sum", "min", "max", "all", "any", "abs"];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while parsing or evaluating a sandboxed expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SandboxError {
    /// The expression could not be parsed.
    #[error("invalid expression syntax: {reason}")]
    Parse {
        /// Parse failure description.
        reason: String,
    },
    /// The expression used a construct outside the allow-list.
    #[error("forbidden expression node: {node}")]
    ForbiddenNode {
        /// Description of the rejected construct.
        node: String,
    },
    /// Evaluation exceeded the wall-clock budget.
    #[error("expression evaluation timed out")]
    Timeout,
    /// Evaluation hit a type mismatch.
    #[error("expression type error: {reason}")]
    Type {
        /// Mismatch description.
        reason: String,
    },
}

// ============================================================================
// SECTION: Environment
// ============================================================================

/// Read-only evaluation environment.
#[derive(Debug, Clone, Default)]
pub struct SandboxEnv {
    /// Most recent response body, when any.
    pub body: Value,
    /// Most recent response headers, when any.
    pub headers: Value,
    /// Instance context as a JSON object.
    pub context: Value,
}

impl SandboxEnv {
    /// Resolves a bare name against the environment.
    fn lookup(&self, name: &str) -> Option<Value> {
        match name {
            "body" => Some(self.body.clone()),
            "headers" => Some(self.headers.clone()),
            "context" => Some(self.context.clone()),
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            "null" => Some(Value::Null),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: AST
// ============================================================================

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Parsed expression tree. Construction is restricted to the allow-list by
/// the parser itself; there is no node for anything else.
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

// ============================================================================
// SECTION: Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

/// Tokenizes an expression string.
fn tokenize(input: &str) -> Result<Vec<Token>, SandboxError> {
    let parse_err = |reason: &str| SandboxError::Parse {
        reason: reason.to_string(),
    };
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' | ')' | '[' | ']' | ',' | '.' => {
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ',' => Token::Comma,
                    _ => Token::Dot,
                });
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(parse_err("unterminated string literal"));
                    };
                    i += 1;
                    if ch == quote {
                        break;
                    }
                    if ch == '\\' {
                        let Some(&escaped) = chars.get(i) else {
                            return Err(parse_err("unterminated escape"));
                        };
                        i += 1;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    } else {
                        text.push(ch);
                    }
                }
                tokens.push(Token::Str(text));
            }
            '0' ..= '9' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    // A dot followed by a non-digit belongs to member access.
                    if chars[i] == '.' && !chars.get(i + 1).is_some_and(char::is_ascii_digit) {
                        break;
                    }
                    i += 1;
                }
                let text: String = chars[start .. i].iter().collect();
                let number = text.parse::<f64>().map_err(|_| parse_err("invalid number"))?;
                tokens.push(Token::Number(number));
            }
            '=' | '!' | '<' | '>' => {
                let two: String = chars[i ..].iter().take(2).collect();
                let op = match two.as_str() {
                    "==" => Some("=="),
                    "!=" => Some("!="),
                    "<=" => Some("<="),
                    ">=" => Some(">="),
                    _ => None,
                };
                if let Some(op) = op {
                    tokens.push(Token::Op(op));
                    i += 2;
                } else if c == '<' {
                    tokens.push(Token::Op("<"));
                    i += 1;
                } else if c == '>' {
                    tokens.push(Token::Op(">"));
                    i += 1;
                } else {
                    return Err(parse_err("unexpected operator character"));
                }
            }
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(Token::Op(match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    _ => "%",
                }));
                i += 1;
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start .. i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::Op("and"),
                    "or" => Token::Op("or"),
                    "not" => Token::Op("not"),
                    "in" => Token::Op("in"),
                    "True" => Token::Ident("true".to_string()),
                    "False" => Token::Ident("false".to_string()),
                    "None" => Token::Ident("null".to_string()),
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(SandboxError::ForbiddenNode {
                    node: format!("character '{other}'"),
                });
            }
        }
    }
    Ok(tokens)
}

// ============================================================================
// SECTION: Parser
// ============================================================================

/// Recursive-descent parser over the token stream.
struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            position: 0,
            depth: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(found)) if *found == op) {
            self.position += 1;
            return true;
        }
        false
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), SandboxError> {
        if self.peek() == Some(token) {
            self.position += 1;
            Ok(())
        } else {
            Err(SandboxError::Parse {
                reason: format!("expected {what}"),
            })
        }
    }

    fn enter(&mut self) -> Result<(), SandboxError> {
        self.depth += 1;
        if self.depth > MAX_EXPR_DEPTH {
            return Err(SandboxError::ForbiddenNode {
                node: "nesting beyond depth limit".to_string(),
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// expression := or_expr
    fn expression(&mut self) -> Result<Expr, SandboxError> {
        self.enter()?;
        let expr = self.or_expr();
        self.leave();
        expr
    }

    /// or_expr := and_expr ("or" and_expr)*
    fn or_expr(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.and_expr()?;
        while self.eat_op("or") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// and_expr := not_expr ("and" not_expr)*
    fn and_expr(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.not_expr()?;
        while self.eat_op("and") {
            let right = self.not_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// not_expr := "not" not_expr | comparison
    fn not_expr(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_op("not") {
            if self.eat_op("in") {
                return Err(SandboxError::Parse {
                    reason: "dangling 'not in'".to_string(),
                });
            }
            let operand = self.not_expr()?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.comparison()
    }

    /// comparison := arith (cmp_op arith)?
    fn comparison(&mut self) -> Result<Expr, SandboxError> {
        const OPS: &[(&str, CmpOp)] = &[
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            ("<=", CmpOp::Le),
            (">=", CmpOp::Ge),
            ("<", CmpOp::Lt),
            (">", CmpOp::Gt),
            ("in", CmpOp::In),
        ];

        let left = self.arith()?;
        let mut op = OPS.iter().find(|(text, _)| self.eat_op(text)).map(|(_, op)| *op);
        if op.is_none()
            && matches!(self.peek(), Some(Token::Op("not")))
            && matches!(self.tokens.get(self.position + 1), Some(Token::Op("in")))
        {
            self.position += 2;
            op = Some(CmpOp::NotIn);
        }
        match op {
            Some(op) => {
                let right = self.arith()?;
                Ok(Expr::Compare(op, Box::new(left), Box::new(right)))
            }
            None => Ok(left),
        }
    }

    /// arith := term (("+" | "-") term)*
    fn arith(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.term()?;
        loop {
            if self.eat_op("+") {
                left = Expr::Arith(ArithOp::Add, Box::new(left), Box::new(self.term()?));
            } else if self.eat_op("-") {
                left = Expr::Arith(ArithOp::Sub, Box::new(left), Box::new(self.term()?));
            } else {
                return Ok(left);
            }
        }
    }

    /// term := unary (("*" | "/" | "%") unary)*
    fn term(&mut self) -> Result<Expr, SandboxError> {
        let mut left = self.unary()?;
        loop {
            if self.eat_op("*") {
                left = Expr::Arith(ArithOp::Mul, Box::new(left), Box::new(self.unary()?));
            } else if self.eat_op("/") {
                left = Expr::Arith(ArithOp::Div, Box::new(left), Box::new(self.unary()?));
            } else if self.eat_op("%") {
                left = Expr::Arith(ArithOp::Mod, Box::new(left), Box::new(self.unary()?));
            } else {
                return Ok(left);
            }
        }
    }

    /// unary := "-" unary | postfix
    fn unary(&mut self) -> Result<Expr, SandboxError> {
        if self.eat_op("-") {
            self.enter()?;
            let operand = self.unary()?;
            self.leave();
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.postfix()
    }

    /// postfix := primary ("." ident | "[" expression "]")*
    fn postfix(&mut self) -> Result<Expr, SandboxError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.position += 1;
                    let Some(Token::Ident(member)) = self.advance() else {
                        return Err(SandboxError::Parse {
                            reason: "expected member name after '.'".to_string(),
                        });
                    };
                    expr = Expr::Member(Box::new(expr), member);
                }
                Some(Token::LBracket) => {
                    self.position += 1;
                    let index = self.expression()?;
                    self.expect(&Token::RBracket, "closing ']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    /// primary := literal | list | name | call | "(" expression ")"
    fn primary(&mut self) -> Result<Expr, SandboxError> {
        match self.advance() {
            Some(Token::Number(number)) => {
                let value = Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null);
                Ok(Expr::Literal(value))
            }
            Some(Token::Str(text)) => Ok(Expr::Literal(Value::String(text))),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(&Token::RParen, "closing ')'")?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if self.peek() == Some(&Token::Comma) {
                            self.position += 1;
                            continue;
                        }
                        break;
                    }
                }
                self.expect(&Token::RBracket, "closing ']'")?;
                Ok(Expr::List(items))
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    if !ALLOWED_FUNCTIONS.contains(&name.as_str()) {
                        return Err(SandboxError::ForbiddenNode {
                            node: format!("call to '{name}'"),
                        });
                    }
                    self.position += 1;
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.expression()?);
                            if self.peek() == Some(&Token::Comma) {
                                self.position += 1;
                                continue;
                            }
                            break;
                        }
                    }
                    self.expect(&Token::RParen, "closing ')'")?;
                    return Ok(Expr::Call(name, args));
                }
                if !ALLOWED_NAMES.contains(&name.as_str()) {
                    return Err(SandboxError::ForbiddenNode {
                        node: format!("name '{name}'"),
                    });
                }
                Ok(Expr::Name(name))
            }
            other => Err(SandboxError::Parse {
                reason: format!("unexpected token: {other:?}"),
            }),
        }
    }
}

/// Parses an expression, rejecting trailing input.
fn parse(input: &str) -> Result<Expr, SandboxError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.expression()?;
    if parser.peek().is_some() {
        return Err(SandboxError::Parse {
            reason: "trailing input after expression".to_string(),
        });
    }
    Ok(expr)
}

// ============================================================================
// SECTION: Evaluator
// ============================================================================

/// Evaluator state carrying the deadline.
struct Evaluator<'a> {
    env: &'a SandboxEnv,
    deadline: Instant,
}

impl Evaluator<'_> {
    fn check_deadline(&self) -> Result<(), SandboxError> {
        if Instant::now() > self.deadline {
            return Err(SandboxError::Timeout);
        }
        Ok(())
    }

    fn eval(&self, expr: &Expr) -> Result<Value, SandboxError> {
        self.check_deadline()?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Name(name) => {
                self.env.lookup(name).ok_or_else(|| SandboxError::ForbiddenNode {
                    node: format!("name '{name}'"),
                })
            }
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::Array(values))
            }
            Expr::Member(target, member) => {
                let value = self.eval(target)?;
                match value {
                    Value::Object(map) => Ok(map.get(member).cloned().unwrap_or(Value::Null)),
                    other => Err(SandboxError::Type {
                        reason: format!("member access on {}", type_name(&other)),
                    }),
                }
            }
            Expr::Index(target, index) => {
                let value = self.eval(target)?;
                let index = self.eval(index)?;
                match (&value, &index) {
                    (Value::Array(items), Value::Number(number)) => {
                        let position = number.as_f64().unwrap_or(-1.0);
                        if position < 0.0 || position.fract() != 0.0 {
                            return Ok(Value::Null);
                        }
                        Ok(items.get(position as usize).cloned().unwrap_or(Value::Null))
                    }
                    (Value::Object(map), Value::String(key)) => {
                        Ok(map.get(key).cloned().unwrap_or(Value::Null))
                    }
                    _ => Err(SandboxError::Type {
                        reason: format!(
                            "cannot index {} with {}",
                            type_name(&value),
                            type_name(&index)
                        ),
                    }),
                }
            }
            Expr::Not(operand) => Ok(Value::Bool(!truthy(&self.eval(operand)?))),
            Expr::Neg(operand) => {
                let value = self.eval(operand)?;
                let number = as_number(&value)?;
                Ok(number_value(-number))
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if !truthy(&left) {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if truthy(&left) {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Compare(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(Value::Bool(compare(*op, &left, &right)?))
            }
            Expr::Arith(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                arith(*op, &left, &right)
            }
            Expr::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(name, &values)
            }
        }
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, SandboxError> {
        let one_collection = |what: &str| -> Result<Vec<Value>, SandboxError> {
            match args {
                [Value::Array(items)] => Ok(items.clone()),
                _ => Err(SandboxError::Type {
                    reason: format!("{what}() expects one collection argument"),
                }),
            }
        };

        match name {
            "len" => {
                let length = match args {
                    [Value::Array(items)] => items.len(),
                    [Value::String(text)] => text.chars().count(),
                    [Value::Object(map)] => map.len(),
                    _ => {
                        return Err(SandboxError::Type {
                            reason: "len() expects one sized argument".to_string(),
                        });
                    }
                };
                Ok(Value::from(length as u64))
            }
            "sum" => {
                let items = one_collection("sum")?;
                let mut total = 0.0;
                for item in &items {
                    self.check_deadline()?;
                    total += as_number(item)?;
                }
                Ok(number_value(total))
            }
            "min" | "max" => {
                let items = one_collection(name)?;
                if items.is_empty() {
                    return Err(SandboxError::Type {
                        reason: format!("{name}() arg is an empty sequence"),
                    });
                }
                let mut best = as_number(&items[0])?;
                for item in &items[1 ..] {
                    self.check_deadline()?;
                    let candidate = as_number(item)?;
                    let better =
                        if name == "min" { candidate < best } else { candidate > best };
                    if better {
                        best = candidate;
                    }
                }
                Ok(number_value(best))
            }
            "all" => {
                let items = one_collection("all")?;
                for item in &items {
                    self.check_deadline()?;
                    if !truthy(item) {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            "any" => {
                let items = one_collection("any")?;
                for item in &items {
                    self.check_deadline()?;
                    if truthy(item) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            "abs" => match args {
                [value] => Ok(number_value(as_number(value)?.abs())),
                _ => Err(SandboxError::Type {
                    reason: "abs() expects one numeric argument".to_string(),
                }),
            },
            other => Err(SandboxError::ForbiddenNode {
                node: format!("call to '{other}'"),
            }),
        }
    }
}

// ============================================================================
// SECTION: Value Semantics
// ============================================================================

/// Returns the loose truthiness of a value.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Coerces a value to a number.
fn as_number(value: &Value) -> Result<f64, SandboxError> {
    match value {
        Value::Number(number) => number.as_f64().ok_or(SandboxError::Type {
            reason: "non-finite number".to_string(),
        }),
        Value::Bool(flag) => Ok(if *flag { 1.0 } else { 0.0 }),
        other => Err(SandboxError::Type {
            reason: format!("expected number, found {}", type_name(other)),
        }),
    }
}

/// Builds a JSON number from an f64, preferring integer form.
fn number_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < (i64::MAX as f64) {
        Value::from(number as i64)
    } else {
        Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
    }
}

/// Structural equality with numeric coercion.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            a.as_f64().zip(b.as_f64()).is_some_and(|(x, y)| x == y)
        }
        _ => left == right,
    }
}

/// Evaluates a comparison operator.
fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, SandboxError> {
    match op {
        CmpOp::Eq => Ok(values_equal(left, right)),
        CmpOp::Ne => Ok(!values_equal(left, right)),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => contains(right, left).map(|found| !found),
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => a.cmp(b),
                _ => {
                    let a = as_number(left)?;
                    let b = as_number(right)?;
                    a.partial_cmp(&b).ok_or(SandboxError::Type {
                        reason: "unordered comparison".to_string(),
                    })?
                }
            };
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

/// Membership test: element within list, substring, or object key.
fn contains(container: &Value, element: &Value) -> Result<bool, SandboxError> {
    match container {
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(item, element))),
        Value::String(text) => match element {
            Value::String(needle) => Ok(text.contains(needle.as_str())),
            other => Ok(text.contains(&stringify_for_contains(other))),
        },
        Value::Object(map) => match element {
            Value::String(key) => Ok(map.contains_key(key)),
            _ => Ok(false),
        },
        other => Err(SandboxError::Type {
            reason: format!("'in' needs a container, found {}", type_name(other)),
        }),
    }
}

/// Stringifies a non-string needle for substring membership.
fn stringify_for_contains(value: &Value) -> String {
    match value {
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        other => other.to_string(),
    }
}

/// Evaluates an arithmetic operator.
fn arith(op: ArithOp, left: &Value, right: &Value) -> Result<Value, SandboxError> {
    if op == ArithOp::Add {
        if let (Value::String(a), Value::String(b)) = (left, right) {
            return Ok(Value::String(format!("{a}{b}")));
        }
    }
    let a = as_number(left)?;
    let b = as_number(right)?;
    let result = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => {
            if b == 0.0 {
                return Err(SandboxError::Type {
                    reason: "division by zero".to_string(),
                });
            }
            a / b
        }
        ArithOp::Mod => {
            if b == 0.0 {
                return Err(SandboxError::Type {
                    reason: "modulo by zero".to_string(),
                });
            }
            a % b
        }
    };
    Ok(number_value(result))
}

/// Returns a stable label for a value's type.
fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// SECTION: Entry Points
// ============================================================================

/// Evaluates an expression to an arbitrary value.
///
/// # Errors
///
/// Returns [`SandboxError`] on parse failure, forbidden constructs, type
/// mismatches, or deadline breach.
pub fn eval_value(
    expression: &str,
    env: &SandboxEnv,
    timeout: Duration,
) -> Result<Value, SandboxError> {
    let expr = parse(expression)?;
    let evaluator = Evaluator {
        env,
        deadline: Instant::now() + timeout,
    };
    evaluator.eval(&expr)
}

/// Evaluates an expression to a boolean using loose truthiness.
///
/// # Errors
///
/// Returns [`SandboxError`] on parse failure, forbidden constructs, type
/// mismatches, or deadline breach.
pub fn eval_bool(expression: &str, env: &SandboxEnv) -> Result<bool, SandboxError> {
    eval_value(expression, env, DEFAULT_EVAL_TIMEOUT).map(|value| truthy(&value))
}

// ============================================================================
// SECTION: Tests
// ============================================================================
