//! Debugger expression evaluator.
//!
//! Serves conditional breakpoints, the `print` command, and the API's
//! `evaluate` entrypoint. The grammar covers registers, CPSR flags,
//! program symbols, numeric literals in the assembler's formats, the
//! usual binary and unary operators, word and byte dereferences, and
//! comparisons yielding 0/1. Results are 32-bit unsigned.

use crate::memory::Memory;
use asm_arm2::SymbolTable;
use cpu_arm2::Registers;
use std::fmt;

/// Evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    Parse(String),
    DivisionByZero,
    UnknownName(String),
    Unmapped(u32),
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "{msg}"),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::UnknownName(name) => write!(f, "unknown name {name:?}"),
            Self::Unmapped(addr) => write!(f, "dereference of unmapped address {addr:#010X}"),
        }
    }
}

impl std::error::Error for EvalError {}

/// Everything an expression can observe.
pub struct EvalContext<'a> {
    pub regs: &'a Registers,
    pub memory: &'a Memory,
    pub symbols: Option<&'a SymbolTable>,
}

/// Evaluate an expression string to a `u32`.
pub fn evaluate(expr: &str, ctx: &EvalContext<'_>) -> Result<u32, EvalError> {
    let mut p = Parser {
        chars: expr.chars().collect(),
        pos: 0,
        ctx,
    };
    let value = p.comparison()?;
    p.skip_ws();
    if p.pos < p.chars.len() {
        return Err(EvalError::Parse(format!(
            "unexpected input at column {}",
            p.pos + 1
        )));
    }
    Ok(value)
}

struct Parser<'a, 'b> {
    chars: Vec<char>,
    pos: usize,
    ctx: &'b EvalContext<'a>,
}

impl Parser<'_, '_> {
    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).copied()
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        self.skip_ws();
        let chars: Vec<char> = s.chars().collect();
        if self.chars[self.pos.min(self.chars.len())..]
            .starts_with(&chars)
        {
            self.pos += chars.len();
            true
        } else {
            false
        }
    }

    // comparison := bitor (("==" | "!=" | "<=" | ">=" | "<" | ">") bitor)?
    fn comparison(&mut self) -> Result<u32, EvalError> {
        let lhs = self.bitor()?;
        self.skip_ws();
        let op = if self.eat_str("==") {
            "=="
        } else if self.eat_str("!=") {
            "!="
        } else if self.eat_str("<=") {
            "<="
        } else if self.eat_str(">=") {
            ">="
        } else if self.peek() == Some('<') && self.peek_at(1) != Some('<') {
            self.pos += 1;
            "<"
        } else if self.peek() == Some('>') && self.peek_at(1) != Some('>') {
            self.pos += 1;
            ">"
        } else {
            return Ok(lhs);
        };
        let rhs = self.bitor()?;
        let result = match op {
            "==" => lhs == rhs,
            "!=" => lhs != rhs,
            "<=" => lhs <= rhs,
            ">=" => lhs >= rhs,
            "<" => lhs < rhs,
            _ => lhs > rhs,
        };
        Ok(u32::from(result))
    }

    fn bitor(&mut self) -> Result<u32, EvalError> {
        let mut lhs = self.bitxor()?;
        loop {
            self.skip_ws();
            if self.peek() == Some('|') {
                self.pos += 1;
                lhs |= self.bitxor()?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn bitxor(&mut self) -> Result<u32, EvalError> {
        let mut lhs = self.bitand()?;
        loop {
            self.skip_ws();
            if self.peek() == Some('^') {
                self.pos += 1;
                lhs ^= self.bitand()?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn bitand(&mut self) -> Result<u32, EvalError> {
        let mut lhs = self.shift()?;
        loop {
            self.skip_ws();
            if self.peek() == Some('&') {
                self.pos += 1;
                lhs &= self.shift()?;
            } else {
                return Ok(lhs);
            }
        }
    }

    fn shift(&mut self) -> Result<u32, EvalError> {
        let mut lhs = self.additive()?;
        loop {
            self.skip_ws();
            if self.eat_str("<<") {
                let rhs = self.additive()?;
                lhs = if rhs >= 32 { 0 } else { lhs << rhs };
            } else if self.eat_str(">>") {
                let rhs = self.additive()?;
                lhs = if rhs >= 32 { 0 } else { lhs >> rhs };
            } else {
                return Ok(lhs);
            }
        }
    }

    fn additive(&mut self) -> Result<u32, EvalError> {
        let mut lhs = self.multiplicative()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('+') => {
                    self.pos += 1;
                    lhs = lhs.wrapping_add(self.multiplicative()?);
                }
                Some('-') => {
                    self.pos += 1;
                    lhs = lhs.wrapping_sub(self.multiplicative()?);
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn multiplicative(&mut self) -> Result<u32, EvalError> {
        let mut lhs = self.unary()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some('*') => {
                    self.pos += 1;
                    lhs = lhs.wrapping_mul(self.unary()?);
                }
                Some('/') => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    lhs /= rhs;
                }
                Some('%') => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0 {
                        return Err(EvalError::DivisionByZero);
                    }
                    lhs %= rhs;
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn unary(&mut self) -> Result<u32, EvalError> {
        self.skip_ws();
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(self.unary()?.wrapping_neg())
            }
            Some('~') => {
                self.pos += 1;
                Ok(!self.unary()?)
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<u32, EvalError> {
        self.skip_ws();
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let v = self.comparison()?;
                if !self.eat(')') {
                    return Err(EvalError::Parse("expected ')'".to_string()));
                }
                Ok(v)
            }
            Some('[') => {
                self.pos += 1;
                let addr = self.comparison()?;
                if !self.eat(']') {
                    return Err(EvalError::Parse("expected ']'".to_string()));
                }
                self.ctx
                    .memory
                    .peek_word(addr)
                    .ok_or(EvalError::Unmapped(addr))
            }
            Some(c) if c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => self.name(),
            other => Err(EvalError::Parse(format!(
                "unexpected {:?} at column {}",
                other.map_or(String::from("end of input"), |c| c.to_string()),
                self.pos + 1
            ))),
        }
    }

    fn number(&mut self) -> Result<u32, EvalError> {
        let mut radix = 10u32;
        if self.peek() == Some('0') {
            match self.peek_at(1) {
                Some('x' | 'X') => {
                    radix = 16;
                    self.pos += 2;
                }
                Some('b' | 'B') => {
                    radix = 2;
                    self.pos += 2;
                }
                Some('o' | 'O') => {
                    radix = 8;
                    self.pos += 2;
                }
                _ => {}
            }
        }
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|&&c| c != '_')
            .collect();
        u32::from_str_radix(&text, radix)
            .map_err(|_| EvalError::Parse(format!("invalid number {text:?}")))
    }

    /// Register, flag, `byte[...]`, or program symbol.
    fn name(&mut self) -> Result<u32, EvalError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        let upper = word.to_ascii_uppercase();

        // byte[addr] — single-byte dereference
        if upper == "BYTE" && self.eat('[') {
            let addr = self.comparison()?;
            if !self.eat(']') {
                return Err(EvalError::Parse("expected ']'".to_string()));
            }
            return self
                .ctx
                .memory
                .peek_byte(addr)
                .map(u32::from)
                .ok_or(EvalError::Unmapped(addr));
        }

        match upper.as_str() {
            "SP" => return Ok(self.ctx.regs.r[13]),
            "LR" => return Ok(self.ctx.regs.r[14]),
            "PC" => return Ok(self.ctx.regs.r[15]),
            "N" => return Ok(u32::from(self.ctx.regs.cpsr.n)),
            "Z" => return Ok(u32::from(self.ctx.regs.cpsr.z)),
            "C" => return Ok(u32::from(self.ctx.regs.cpsr.c)),
            "V" => return Ok(u32::from(self.ctx.regs.cpsr.v)),
            "CPSR" => return Ok(self.ctx.regs.cpsr.bits()),
            _ => {}
        }

        if let Some(rest) = upper.strip_prefix('R') {
            if let Ok(n) = rest.parse::<u8>() {
                if n < 16 {
                    return Ok(self.ctx.regs.r[n as usize]);
                }
            }
        }

        if let Some(symbols) = self.ctx.symbols {
            if let Some(value) = symbols.value(&word) {
                return Ok(value);
            }
        }

        Err(EvalError::UnknownName(word))
    }
}
