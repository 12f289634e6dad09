//! Visibility expressions: labels joined by `&` and `|` with parentheses.
//!
//! `&` binds tighter than `|`. There is no negation, so removing an
//! authorization can only hide cells.

use std::collections::BTreeSet;

use crate::error::{Result, StoreError};

fn is_label_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b':' | b'.' | b'/')
}

struct Parser<'a> {
    src: &'a [u8],
    pos: usize,
    auths: &'a BTreeSet<String>,
}

impl<'a> Parser<'a> {
    fn skip_ws(&mut self) {
        while self.src.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_ws();
        self.src.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<bool> {
        let mut value = self.term()?;
        while self.peek() == Some(b'|') {
            self.pos += 1;
            let rhs = self.term()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<bool> {
        let mut value = self.factor()?;
        while self.peek() == Some(b'&') {
            self.pos += 1;
            let rhs = self.factor()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<bool> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() != Some(b')') {
                    return Err(self.error("expected ')'"));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(b) if is_label_byte(b) => {
                let start = self.pos;
                while self.src.get(self.pos).copied().is_some_and(is_label_byte) {
                    self.pos += 1;
                }
                let label = std::str::from_utf8(&self.src[start..self.pos])
                    .map_err(|_| self.error("label is not UTF-8"))?;
                Ok(self.auths.contains(label))
            }
            _ => Err(self.error("expected a label or '('")),
        }
    }

    fn error(&self, msg: &str) -> StoreError {
        StoreError::data(format!(
            "invalid visibility expression {:?} at byte {}: {msg}",
            String::from_utf8_lossy(self.src),
            self.pos
        ))
    }
}

/// Evaluates `expression` against `auths`. The empty expression is visible
/// to everyone.
pub fn evaluate(expression: &[u8], auths: &BTreeSet<String>) -> Result<bool> {
    let mut parser = Parser {
        src: expression,
        pos: 0,
        auths,
    };
    if parser.peek().is_none() {
        return Ok(true);
    }
    let value = parser.expr()?;
    if parser.peek().is_some() {
        return Err(parser.error("trailing input"));
    }
    Ok(value)
}

/// Splits on `&` outside parentheses, trimming whitespace.
fn conjuncts(expression: &[u8]) -> Vec<&[u8]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, &b) in expression.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'&' if depth == 0 => {
                parts.push(&expression[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&expression[start..]);
    parts
        .into_iter()
        .map(|p| p.trim_ascii())
        .filter(|p| !p.is_empty())
        .collect()
}

fn has_top_level_or(conjunct: &[u8]) -> bool {
    let mut depth = 0usize;
    for &b in conjunct {
        match b {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'|' if depth == 0 => return true,
            _ => {}
        }
    }
    false
}

/// Combines two labels so the result requires both.
///
/// Top-level conjuncts are unioned, sorted and re-joined with `&`, which is
/// commutative and associative with the empty label as identity.
pub fn combine(left: &[u8], right: &[u8]) -> Vec<u8> {
    let parts: BTreeSet<Vec<u8>> = conjuncts(left)
        .into_iter()
        .chain(conjuncts(right))
        .map(|c| {
            if has_top_level_or(c) {
                let mut wrapped = Vec::with_capacity(c.len() + 2);
                wrapped.push(b'(');
                wrapped.extend_from_slice(c);
                wrapped.push(b')');
                wrapped
            } else {
                c.to_vec()
            }
        })
        .collect();
    parts.into_iter().collect::<Vec<_>>().join(&b'&')
}
