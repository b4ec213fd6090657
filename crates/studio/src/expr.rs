//! Sandboxed arithmetic for derived columns
//!
//! Expressions go through tokenize -> parse -> validate -> evaluate and
//! nothing else. The grammar only knows numbers, column references,
//! arithmetic operators and a fixed set of numeric functions:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := ('-' | '+') unary | power
//! power   := primary ('**' unary)?
//! primary := NUMBER | '@' NAME | '@' '`' TEXT '`' | NAME | FUNC '(' args ')' | '(' expr ')'
//! ```

use crate::error::{Result, StudioError};
use crate::table::{column_index, float_array, numeric_values};
use arrow::array::ArrayRef;
use arrow::record_batch::RecordBatch;
use std::collections::{BTreeSet, HashMap};

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Name(String),
    Column(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pow,
    LParen,
    RParen,
    Comma,
}

fn tokenize(text: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal.parse::<f64>().map_err(|_| {
                    StudioError::rejected(format!("malformed number '{}'", literal))
                })?;
                tokens.push(Token::Number(value));
            }
            '@' => {
                i += 1;
                if i < chars.len() && chars[i] == '`' {
                    let start = i + 1;
                    let end = chars[start..]
                        .iter()
                        .position(|&c| c == '`')
                        .map(|p| start + p)
                        .ok_or_else(|| StudioError::rejected("unterminated column name"))?;
                    if end == start {
                        return Err(StudioError::rejected("empty column name"));
                    }
                    tokens.push(Token::Column(chars[start..end].iter().collect()));
                    i = end + 1;
                } else {
                    let start = i;
                    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                        i += 1;
                    }
                    if i == start {
                        return Err(StudioError::rejected("'@' must be followed by a column name"));
                    }
                    tokens.push(Token::Column(chars[start..i].iter().collect()));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            _ => {
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '%' => Token::Percent,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    other => {
                        return Err(StudioError::rejected(format!(
                            "disallowed character '{}' at position {}",
                            other, i
                        )));
                    }
                };
                tokens.push(token);
                i += 1;
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Abs,
    Sqrt,
    Log,
    Log10,
    Exp,
    Floor,
    Ceil,
    Round,
    Min,
    Max,
    Pow,
}

impl Func {
    fn lookup(name: &str) -> Option<Func> {
        Some(match name {
            "abs" => Func::Abs,
            "sqrt" => Func::Sqrt,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "exp" => Func::Exp,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "round" => Func::Round,
            "min" => Func::Min,
            "max" => Func::Max,
            "pow" => Func::Pow,
            _ => return None,
        })
    }

    fn accepts(self, arity: usize) -> bool {
        match self {
            Func::Min | Func::Max => arity >= 2,
            Func::Pow => arity == 2,
            Func::Round => arity == 1 || arity == 2,
            _ => arity == 1,
        }
    }

    fn call(self, args: &[f64]) -> f64 {
        match self {
            Func::Abs => args[0].abs(),
            Func::Sqrt => args[0].sqrt(),
            Func::Log => args[0].ln(),
            Func::Log10 => args[0].log10(),
            Func::Exp => args[0].exp(),
            Func::Floor => args[0].floor(),
            Func::Ceil => args[0].ceil(),
            Func::Round => match args.get(1) {
                Some(digits) => {
                    let scale = 10f64.powi(*digits as i32);
                    (args[0] * scale).round() / scale
                }
                None => args[0].round(),
            },
            Func::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Func::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Func::Pow => args[0].powf(args[1]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Column(String),
    Neg(Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Call(Func, Vec<Node>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, wanted: Token, context: &str) -> Result<()> {
        match self.next() {
            Some(ref t) if *t == wanted => Ok(()),
            _ => Err(StudioError::rejected(format!("expected {}", context))),
        }
    }

    fn descend(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(StudioError::rejected("expression is nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Node> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.term()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Node> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Node> {
        self.descend()?;
        let node = match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Node::Neg(Box::new(self.unary()?))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()?
            }
            _ => self.power()?,
        };
        self.depth -= 1;
        Ok(node)
    }

    fn power(&mut self) -> Result<Node> {
        let base = self.primary()?;
        if self.peek() == Some(&Token::Pow) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Node::Binary(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Node> {
        match self.next() {
            Some(Token::Number(v)) => Ok(Node::Number(v)),
            Some(Token::Column(name)) => Ok(Node::Column(name)),
            Some(Token::Name(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    self.call(&name)
                } else if Func::lookup(&name).is_some() {
                    Err(StudioError::rejected(format!(
                        "function '{}' must be called with arguments",
                        name
                    )))
                } else {
                    Ok(Node::Column(name))
                }
            }
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(other) => Err(StudioError::rejected(format!(
                "unexpected token {:?}",
                other
            ))),
            None => Err(StudioError::rejected("unexpected end of expression")),
        }
    }

    fn call(&mut self, name: &str) -> Result<Node> {
        let func = Func::lookup(name)
            .ok_or_else(|| StudioError::rejected(format!("function '{}' is not allowed", name)))?;
        self.descend()?;
        let mut args = Vec::new();
        if self.peek() != Some(&Token::RParen) {
            loop {
                args.push(self.expression()?);
                if self.peek() == Some(&Token::Comma) {
                    self.pos += 1;
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')' after function arguments")?;
        self.depth -= 1;
        if !func.accepts(args.len()) {
            return Err(StudioError::rejected(format!(
                "function '{}' does not take {} argument(s)",
                name,
                args.len()
            )));
        }
        Ok(Node::Call(func, args))
    }
}

/// A parsed, validated feature expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    root: Node,
}

impl Expression {
    pub fn parse(text: &str, max_len: usize) -> Result<Self> {
        if text.len() > max_len {
            return Err(StudioError::rejected(format!(
                "expression longer than {} bytes",
                max_len
            )));
        }
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Err(StudioError::rejected("expression is empty"));
        }
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.expression()?;
        if let Some(extra) = parser.peek() {
            return Err(StudioError::rejected(format!(
                "unexpected token {:?} after expression",
                extra
            )));
        }
        Ok(Self { root })
    }

    /// Column names referenced by the expression
    pub fn columns(&self) -> BTreeSet<String> {
        fn walk(node: &Node, out: &mut BTreeSet<String>) {
            match node {
                Node::Number(_) => {}
                Node::Column(name) => {
                    let _ = out.insert(name.clone());
                }
                Node::Neg(inner) => walk(inner, out),
                Node::Binary(_, l, r) => {
                    walk(l, out);
                    walk(r, out);
                }
                Node::Call(_, args) => args.iter().for_each(|a| walk(a, out)),
            }
        }
        let mut out = BTreeSet::new();
        walk(&self.root, &mut out);
        out
    }

    /// Evaluate row by row; missing inputs and non-finite results become nulls
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let mut inputs = HashMap::new();
        for name in self.columns() {
            let index = column_index(batch, &name)?;
            let values = numeric_values(batch, index)?;
            let _ = inputs.insert(name, values);
        }

        let values = (0..batch.num_rows())
            .map(|row| eval(&self.root, row, &inputs).filter(|v| v.is_finite()))
            .collect();
        Ok(float_array(values))
    }
}

fn eval(node: &Node, row: usize, inputs: &HashMap<String, Vec<Option<f64>>>) -> Option<f64> {
    match node {
        Node::Number(v) => Some(*v),
        Node::Column(name) => inputs.get(name).and_then(|col| col[row]),
        Node::Neg(inner) => eval(inner, row, inputs).map(|v| -v),
        Node::Binary(op, l, r) => {
            let a = eval(l, row, inputs)?;
            let b = eval(r, row, inputs)?;
            let v = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                BinOp::Rem => a % b,
                BinOp::Pow => a.powf(b),
            };
            v.is_finite().then_some(v)
        }
        Node::Call(func, args) => {
            let values = args
                .iter()
                .map(|a| eval(a, row, inputs))
                .collect::<Option<Vec<f64>>>()?;
            let v = func.call(&values);
            v.is_finite().then_some(v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{AsArray, Float64Array};
    use arrow::datatypes::Float64Type;
    use arrow_array::record_batch;

    fn values(array: &ArrayRef) -> Vec<Option<f64>> {
        array.as_primitive::<Float64Type>().iter().collect()
    }

    fn run(text: &str, batch: &RecordBatch) -> Result<Vec<Option<f64>>> {
        let expr = Expression::parse(text, 1024)?;
        Ok(values(&expr.evaluate(batch)?))
    }

    #[test]
    fn test_sum_of_two_columns() {
        let batch = record_batch!(("a", Int64, [1, 2, 3]), ("b", Int64, [10, 20, 30])).unwrap();
        assert_eq!(
            run("@a + @b", &batch).unwrap(),
            vec![Some(11.0), Some(22.0), Some(33.0)]
        );
    }

    #[test]
    fn test_precedence_and_bare_names() {
        let batch = record_batch!(
            ("col_a", Float64, [2.0]),
            ("col_b", Float64, [3.0]),
            ("col_c", Float64, [1.0])
        )
        .unwrap();
        assert_eq!(run("col_a * col_b ** 2 + col_c", &batch).unwrap(), vec![Some(19.0)]);
        assert_eq!(run("-2 ** 2", &batch).unwrap(), vec![Some(-4.0)]);
        assert_eq!(run("2 ** 3 ** 2", &batch).unwrap(), vec![Some(512.0)]);
        assert_eq!(run("(1 + 2) * 3 - 4 / 2", &batch).unwrap(), vec![Some(7.0)]);
        assert_eq!(run("7 % 4 + 1.5e1", &batch).unwrap(), vec![Some(18.0)]);
    }

    #[test]
    fn test_quoted_column_names_and_functions() {
        let batch = record_batch!(("unit price", Float64, [4.0, -9.0])).unwrap();
        assert_eq!(
            run("sqrt(abs(@`unit price`)) + max(1, 2, 3)", &batch).unwrap(),
            vec![Some(5.0), Some(6.0)]
        );
        assert_eq!(run("round(3.14159, 2)", &batch).unwrap(), vec![Some(3.14), Some(3.14)]);
    }

    #[test]
    fn test_missing_and_non_finite_become_null() {
        let batch = record_batch!(
            ("a", Float64, [Some(1.0), None, Some(4.0)]),
            ("b", Float64, [Some(0.0), Some(1.0), Some(2.0)])
        )
        .unwrap();
        assert_eq!(run("@a / @b", &batch).unwrap(), vec![None, None, Some(2.0)]);
        assert_eq!(run("log(@b)", &batch).unwrap()[0], None);
    }

    #[test]
    fn test_undefined_column_is_invalid_columns() {
        let batch = record_batch!(("a", Int64, [1])).unwrap();
        let err = run("@a + @z", &batch).unwrap_err();
        assert_eq!(err.code(), "INVALID_COLUMNS");
        assert!(err.to_string().contains("'z'"));
    }

    #[test]
    fn test_text_column_is_invalid_columns() {
        let batch = record_batch!(("s", Utf8, ["x"])).unwrap();
        assert_eq!(run("@s * 2", &batch).unwrap_err().code(), "INVALID_COLUMNS");
    }

    #[test]
    fn test_rejects_everything_outside_the_grammar() {
        for text in [
            "__import__('os').system('ls')",
            "eval(1)",
            "@a.b",
            "a = 1",
            "@a; @b",
            "\"text\"",
            "@a[0]",
            "lambda: 1",
            "open(1)",
            "sqrt",
            "sqrt(1, 2)",
            "pow(2)",
            "min(1)",
            "1 +",
            "(1",
            "1 2",
            "",
            "@",
            "@``",
        ] {
            let err = Expression::parse(text, 1024).unwrap_err();
            assert_eq!(err.code(), "EXPRESSION_REJECTED", "{} should be rejected", text);
        }
    }

    #[test]
    fn test_limits_length_and_depth() {
        assert_eq!(
            Expression::parse("1 + 1", 3).unwrap_err().code(),
            "EXPRESSION_REJECTED"
        );
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(
            Expression::parse(&deep, 10_000).unwrap_err().code(),
            "EXPRESSION_REJECTED"
        );
        let unary = format!("{}1", "-".repeat(100));
        assert!(Expression::parse(&unary, 10_000).is_err());
    }

    #[test]
    fn test_columns_lists_references() {
        let expr = Expression::parse("@b * a + min(@c, 2)", 1024).unwrap();
        let cols: Vec<_> = expr.columns().into_iter().collect();
        assert_eq!(cols, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_constant_expression_fills_every_row() {
        let batch = record_batch!(("a", Int64, [1, 2])).unwrap();
        let expr = Expression::parse("3", 1024).unwrap();
        let array = expr.evaluate(&batch).unwrap();
        assert_eq!(
            array.as_primitive::<Float64Type>(),
            &Float64Array::from(vec![3.0, 3.0])
        );
    }
}
