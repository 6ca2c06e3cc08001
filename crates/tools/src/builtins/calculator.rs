//! `calculator_tool`: arithmetic with `+ - * / ( )` and unary minus.

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::json;

use trainee_servers::{Backends, ServerError};

use crate::{ParamDecl, ParamType, Tool, ToolArgs, ToolOutput, ToolSignature};

pub fn tools(_backends: &Backends) -> Result<Vec<Box<dyn Tool>>, ServerError> {
    let tools: Vec<Box<dyn Tool>> = vec![Box::new(Calculate)];
    Ok(tools)
}

pub struct Calculate;

#[async_trait]
impl Tool for Calculate {
    fn signature(&self) -> ToolSignature {
        ToolSignature::new(
            "Calculate",
            r#"Evaluate an arithmetic expression.

            Args:
                expression: Expression using numbers, + - * / and parentheses, e.g. (3 + 4) * 2.

            Returns:
                The numeric result."#,
        )
        .param(ParamDecl::required("expression", ParamType::String))
    }

    async fn call(&self, args: ToolArgs) -> Result<ToolOutput> {
        let expression = args.str("expression")?;
        let value = evaluate(expression)?;
        ToolOutput::json(json!({ "expression": expression, "result": value }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Open,
    Close,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::Open,
            ')' => Token::Close,
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = i + c.len_utf8();
                while let Some(&(j, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        end = j + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &input[i..end];
                Token::Num(
                    literal
                        .parse()
                        .map_err(|_| anyhow::anyhow!("invalid number '{literal}'"))?,
                )
            }
            other => bail!("unexpected character '{other}' in expression"),
        };
        tokens.push(token);
    }
    Ok(tokens)
}

/// Recursive-descent evaluator over the token stream.
/// Deepest chain of unary signs and parentheses accepted.
const MAX_NESTING: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == Token::Plus { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self) -> Result<f64> {
        let mut value = self.factor()?;
        while let Some(op @ (Token::Star | Token::Slash)) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == Token::Star {
                value *= rhs;
            } else {
                if rhs == 0.0 {
                    bail!("division by zero");
                }
                value /= rhs;
            }
        }
        Ok(value)
    }

    // factor := '-' factor | '+' factor | number | '(' expr ')'
    fn factor(&mut self) -> Result<f64> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            bail!("expression nested too deeply");
        }
        let value = match self.next() {
            Some(Token::Minus) => self.factor().map(|v| -v),
            Some(Token::Plus) => self.factor(),
            Some(Token::Num(n)) => Ok(n),
            Some(Token::Open) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(value),
                    _ => bail!("missing closing parenthesis"),
                }
            }
            Some(other) => bail!("unexpected token {other:?}"),
            None => bail!("unexpected end of expression"),
        };
        self.depth -= 1;
        value
    }
}

pub fn evaluate(expression: &str) -> Result<f64> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        bail!("empty expression");
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos < parser.tokens.len() {
        bail!("unexpected trailing input in expression");
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence_and_parentheses() {
        assert_eq!(evaluate("1 + 2 * 3").unwrap(), 7.0);
        assert_eq!(evaluate("(1 + 2) * 3").unwrap(), 9.0);
        assert_eq!(evaluate("10 / 4 - 1").unwrap(), 1.5);
        assert_eq!(evaluate("2 - 3 - 4").unwrap(), -5.0);
    }

    #[test]
    fn unary_minus() {
        assert_eq!(evaluate("-3 * -(2 + 1)").unwrap(), 9.0);
        assert_eq!(evaluate("--4").unwrap(), 4.0);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(evaluate("").is_err());
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("1 2").is_err());
        assert!(evaluate("2 ^ 3").is_err());
        assert!(evaluate("1..2").is_err());
    }

    #[test]
    fn deep_nesting_is_an_error() {
        let signs = format!("{}1", "-".repeat(20_000));
        assert!(evaluate(&signs).unwrap_err().to_string().contains("nested too deeply"));

        let parens = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert!(evaluate(&parens).is_err());

        let shallow = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&shallow).unwrap(), 1.0);
    }

    #[tokio::test]
    async fn tool_returns_result() {
        let out = crate::builtins::testing::run(Box::new(Calculate), json!({"expression": "6 * 7"}))
            .await
            .unwrap();
        assert_eq!(crate::builtins::testing::json(out)["result"], 42.0);
    }
}
