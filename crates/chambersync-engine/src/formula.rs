//! [`FormulaEngine`] – the arithmetic tying offset and position together.
//!
//! The engine holds a textual template over the literal operand tokens
//! `OFFSET` and `POSITION`, e.g. `"OFFSET-POSITION"`. The template is
//! parsed **once**, at configuration time, into a small expression tree
//! restricted to `+ - * / ( )`, unary minus, and numeric literals;
//! [`FormulaEngine::evaluate`] is a tree-walk over the live operand values.
//! Templates are never treated as executable code.
//!
//! For observability the raw template can be expanded into a display string
//! with the operand tokens replaced by their current numeric values:
//! `"OFFSET-POSITION"` with offset `1.1` and position `3.0` expands to
//! `" 1.1 - 3 "`.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::warn;

use chambersync_types::SyncError;

const OFFSET_TOKEN: &str = "OFFSET";
const POSITION_TOKEN: &str = "POSITION";

/// Read-only view of the live position operand. Implemented by
/// [`ValueChannel`][crate::ValueChannel]; the engine holds this non-owning
/// interface, never the channel itself.
pub trait PositionProvider: Send + Sync {
    fn current_value(&self) -> Option<f64>;
}

// ────────────────────────────────────────────────────────────────────────────
// Tokenizer
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Offset,
    Position,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' => {
                tokens.push(Token::Plus);
                chars.next();
            }
            '-' => {
                tokens.push(Token::Minus);
                chars.next();
            }
            '*' => {
                tokens.push(Token::Star);
                chars.next();
            }
            '/' => {
                tokens.push(Token::Slash);
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        literal.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number literal '{literal}'"))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.as_str() {
                    OFFSET_TOKEN => tokens.push(Token::Offset),
                    POSITION_TOKEN => tokens.push(Token::Position),
                    other => return Err(format!("unknown operand '{other}'")),
                }
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

// ────────────────────────────────────────────────────────────────────────────
// Parser & evaluator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Offset,
    Position,
    Negate(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse(tokens: &'a [Token]) -> Result<Expr, String> {
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if parser.pos != tokens.len() {
            return Err("trailing input after expression".to_string());
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.term()?;
        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<Expr, String> {
        let mut lhs = self.factor()?;
        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // factor := NUMBER | OFFSET | POSITION | '-' factor | '+' factor | '(' expr ')'
    fn factor(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Offset) => Ok(Expr::Offset),
            Some(Token::Position) => Ok(Expr::Position),
            Some(Token::Minus) => Ok(Expr::Negate(Box::new(self.factor()?))),
            Some(Token::Plus) => self.factor(),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn eval(expr: &Expr, offset: f64, position: Option<f64>) -> Result<f64, String> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Offset => Ok(offset),
        Expr::Position => position.ok_or_else(|| "position value not available".to_string()),
        Expr::Negate(inner) => Ok(-eval(inner, offset, position)?),
        Expr::Binary { op, lhs, rhs } => {
            let l = eval(lhs, offset, position)?;
            let r = eval(rhs, offset, position)?;
            // Division follows IEEE semantics; a zero divisor yields ±inf.
            Ok(match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div => l / r,
            })
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FormulaEngine
// ────────────────────────────────────────────────────────────────────────────

struct State {
    template: String,
    parsed: Result<Expr, String>,
    offset: f64,
}

pub struct FormulaEngine {
    position: Arc<dyn PositionProvider>,
    state: Mutex<State>,
}

impl FormulaEngine {
    pub fn new(position: Arc<dyn PositionProvider>, template: &str) -> Self {
        let engine = Self {
            position,
            state: Mutex::new(State {
                template: String::new(),
                parsed: Err("no expression configured".to_string()),
                offset: 0.0,
            }),
        };
        engine.set_expression(template);
        engine
    }

    /// Replace the expression template.
    ///
    /// A template missing one of the operand tokens is accepted with a
    /// warning (constant or offset-only formulas are legitimate). A
    /// template that fails to parse is also kept; evaluation then fails
    /// with [`SyncError::Evaluation`] until a good template is configured.
    pub fn set_expression(&self, template: &str) {
        if !template.contains(OFFSET_TOKEN) {
            warn!(template, "formula has no OFFSET operand");
        }
        if !template.contains(POSITION_TOKEN) {
            warn!(template, "formula has no POSITION operand");
        }
        let parsed = tokenize(template).and_then(|tokens| Parser::parse(&tokens));
        if let Err(e) = &parsed {
            warn!(template, error = %e, "formula template failed to parse");
        }
        let mut state = self.lock();
        state.template = template.to_string();
        state.parsed = parsed;
    }

    /// The raw template as configured.
    pub fn template(&self) -> String {
        self.lock().template.clone()
    }

    pub fn offset(&self) -> f64 {
        self.lock().offset
    }

    /// Unchecked assignment; any finite or non-finite float is accepted.
    pub fn set_offset(&self, value: f64) {
        self.lock().offset = value;
    }

    /// Substitute the live operands and compute the result.
    ///
    /// # Errors
    ///
    /// [`SyncError::Evaluation`] when the template failed to parse, or when
    /// the expression references `POSITION` and the provider has no value
    /// yet.
    pub fn evaluate(&self) -> Result<f64, SyncError> {
        let (expr, offset) = {
            let state = self.lock();
            let expr = state.parsed.clone().map_err(SyncError::Evaluation)?;
            (expr, state.offset)
        };
        let position = self.position.current_value();
        eval(&expr, offset, position).map_err(SyncError::Evaluation)
    }

    /// The template with operand tokens replaced by their current numeric
    /// values, for display. Returns `None` when the template mentions
    /// `POSITION` and no position value exists yet.
    pub fn expanded_expression(&self) -> Option<String> {
        let (template, offset) = {
            let state = self.lock();
            (state.template.clone(), state.offset)
        };
        let mut expanded = template;
        if expanded.contains(POSITION_TOKEN) {
            let position = self.position.current_value()?;
            expanded = expanded.replace(POSITION_TOKEN, &format!(" {position} "));
        }
        expanded = expanded.replace(OFFSET_TOKEN, &format!(" {offset} "));
        Some(expanded)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedPosition(Mutex<Option<f64>>);

    impl FixedPosition {
        fn new(value: Option<f64>) -> Arc<Self> {
            Arc::new(Self(Mutex::new(value)))
        }

        fn set(&self, value: Option<f64>) {
            *self.0.lock().unwrap() = value;
        }
    }

    impl PositionProvider for FixedPosition {
        fn current_value(&self) -> Option<f64> {
            *self.0.lock().unwrap()
        }
    }

    fn engine_with(template: &str, offset: f64, position: Option<f64>) -> FormulaEngine {
        let engine = FormulaEngine::new(FixedPosition::new(position), template);
        engine.set_offset(offset);
        engine
    }

    #[test]
    fn difference_template_evaluates_and_expands() {
        let engine = engine_with("OFFSET-POSITION", 1.1, Some(3.0));
        let result = engine.evaluate().unwrap();
        assert!((result - (-1.9)).abs() < 1e-12);
        assert_eq!(engine.expanded_expression().unwrap(), " 1.1 - 3 ");
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let engine = engine_with("OFFSET+POSITION*2", 1.0, Some(3.0));
        assert!((engine.evaluate().unwrap() - 7.0).abs() < 1e-12);
    }

    #[test]
    fn parentheses_override_precedence() {
        let engine = engine_with("(OFFSET+POSITION)*2", 1.0, Some(3.0));
        assert!((engine.evaluate().unwrap() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn unary_minus_applies_to_operands() {
        let engine = engine_with("-POSITION+OFFSET", 1.0, Some(3.0));
        assert!((engine.evaluate().unwrap() - (-2.0)).abs() < 1e-12);

        let engine = engine_with("OFFSET*-2", 1.5, Some(0.0));
        assert!((engine.evaluate().unwrap() - (-3.0)).abs() < 1e-12);
    }

    #[test]
    fn division_by_zero_yields_infinity() {
        let engine = engine_with("OFFSET/0", 1.0, Some(0.0));
        assert!(engine.evaluate().unwrap().is_infinite());
    }

    #[test]
    fn absent_position_fails_when_referenced() {
        let engine = engine_with("OFFSET-POSITION", 1.0, None);
        assert!(matches!(engine.evaluate(), Err(SyncError::Evaluation(_))));
        assert_eq!(engine.expanded_expression(), None);
    }

    #[test]
    fn offset_only_template_ignores_absent_position() {
        let engine = engine_with("OFFSET*2", 2.5, None);
        assert!((engine.evaluate().unwrap() - 5.0).abs() < 1e-12);
        assert_eq!(engine.expanded_expression().unwrap(), " 2.5 *2");
    }

    #[test]
    fn malformed_template_is_kept_but_never_evaluates() {
        let engine = engine_with("OFFSET +", 1.0, Some(2.0));
        assert_eq!(engine.template(), "OFFSET +");
        assert!(matches!(engine.evaluate(), Err(SyncError::Evaluation(_))));
    }

    #[test]
    fn unknown_operand_is_rejected_at_parse_time() {
        let engine = engine_with("OFFSET-SPEED", 1.0, Some(2.0));
        assert!(matches!(engine.evaluate(), Err(SyncError::Evaluation(_))));
    }

    #[test]
    fn reconfiguring_the_template_recovers_from_a_bad_one() {
        let engine = engine_with("OFFSET +", 2.0, Some(3.0));
        assert!(engine.evaluate().is_err());

        engine.set_expression("OFFSET+POSITION");
        assert!((engine.evaluate().unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn set_offset_feeds_the_next_evaluation() {
        let position = FixedPosition::new(Some(4.0));
        let engine = FormulaEngine::new(position.clone(), "OFFSET-POSITION");
        assert!((engine.evaluate().unwrap() - (-4.0)).abs() < 1e-12);

        engine.set_offset(10.0);
        assert!((engine.evaluate().unwrap() - 6.0).abs() < 1e-12);

        position.set(Some(1.0));
        assert!((engine.evaluate().unwrap() - 9.0).abs() < 1e-12);
    }

    #[test]
    fn whitespace_in_templates_is_insignificant() {
        let engine = engine_with("  OFFSET  -  POSITION  ", 1.0, Some(0.5));
        assert!((engine.evaluate().unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn numeric_literals_parse_with_fractions() {
        let engine = engine_with("OFFSET+0.25", 1.0, Some(0.0));
        assert!((engine.evaluate().unwrap() - 1.25).abs() < 1e-12);
    }
}
