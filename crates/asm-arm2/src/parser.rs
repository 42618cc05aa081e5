//! Two-pass parser.
//!
//! Pass 1 walks the token stream assigning addresses: labels bind to the
//! current address, directives advance it by their storage footprint, and
//! instructions advance it by 4. Each `.ltorg` reserves space for an
//! estimate of 16 literals; once the real per-pool counts are known, a
//! post-pass sweeps every downstream address (and label) by the cumulative
//! difference, which may be negative when a pool overshoots.
//!
//! Errors accumulate; the parse continues past faulty lines so one run
//! reports everything.

use crate::ast::{
    AddrOffset, Address, AsmOp2, AsmShift, BlockMode, DataSpec, Expr, InstrKind, Item, MsrOperand,
    ParsedInstruction, Pool, PoolLiteral, Section,
};
use crate::error::{AsmError, AsmErrorKind, SourceLoc};
use crate::lexer::{Spanned, Token};
use crate::mnemonic::{parse_mnemonic, Family, MemSize};
use crate::symbols::{SymbolKind, SymbolTable};
use cpu_arm2::{DpOp, ShiftKind};
use std::collections::HashMap;

/// Default origin of the text section.
pub const TEXT_BASE: u32 = 0x0000_8000;
/// Default origin of the data section.
pub const DATA_BASE: u32 = 0x0002_0000;
/// Literals reserved per pool before the real count is known.
const POOL_ESTIMATE: u32 = 16;

/// Everything pass 1 produces, with final (post-adjustment) addresses.
#[derive(Debug)]
pub struct ParseOutput {
    pub items: Vec<Item>,
    pub symbols: SymbolTable,
    pub pools: Vec<Pool>,
    pub origin: u32,
    pub entry_point: u32,
}

/// Parse a token stream. Errors accumulate alongside a best-effort output.
pub fn parse(tokens: &[Spanned]) -> (ParseOutput, Vec<AsmError>) {
    let mut p = Parser::new(tokens);
    p.run();
    p.finish()
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    pos: usize,
    errors: Vec<AsmError>,

    items: Vec<Item>,
    symbols: SymbolTable,
    pools: Vec<Pool>,
    pending_literals: Vec<PoolLiteral>,

    section: Section,
    text_addr: u32,
    data_addr: u32,

    origin: Option<u32>,

    /// Section each label was defined in, for the adjustment sweep.
    label_sections: HashMap<String, Section>,
    /// Numeric label definitions: (label, address, section).
    numeric_defs: Vec<(u32, u32, Section)>,
    /// `.equ` expressions for re-evaluation after the sweep.
    equ_defs: Vec<(String, Expr, SourceLoc)>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Spanned]) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
            items: Vec::new(),
            symbols: SymbolTable::new(),
            pools: Vec::new(),
            pending_literals: Vec::new(),
            section: Section::Text,
            text_addr: TEXT_BASE,
            data_addr: DATA_BASE,
            origin: None,
            label_sections: HashMap::new(),
            numeric_defs: Vec::new(),
            equ_defs: Vec::new(),
        }
    }

    // === Token helpers ===

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].token
    }

    fn loc(&self) -> SourceLoc {
        self.tokens[self.pos.min(self.tokens.len() - 1)].loc.clone()
    }

    fn bump(&mut self) -> &Spanned {
        let t = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), Token::Newline | Token::Eof)
    }

    fn error(&mut self, kind: AsmErrorKind, message: impl Into<String>) {
        let loc = self.loc();
        self.errors.push(AsmError::new(kind, message, loc, String::new()));
    }

    fn skip_line(&mut self) {
        while !self.at_line_end() {
            self.pos += 1;
        }
    }

    fn expect_comma(&mut self) -> Result<(), ()> {
        if matches!(self.peek(), Token::Comma) {
            self.bump();
            Ok(())
        } else {
            self.error(AsmErrorKind::Syntax, "expected ','");
            Err(())
        }
    }

    fn expect_register(&mut self) -> Result<u8, ()> {
        if let Token::Register(n) = *self.peek() {
            self.bump();
            Ok(n)
        } else {
            self.error(AsmErrorKind::Syntax, "expected register");
            Err(())
        }
    }

    fn cur_addr(&self) -> u32 {
        match self.section {
            Section::Text => self.text_addr,
            Section::Data => self.data_addr,
        }
    }

    fn advance_addr(&mut self, by: u32) {
        match self.section {
            Section::Text => self.text_addr = self.text_addr.wrapping_add(by),
            Section::Data => self.data_addr = self.data_addr.wrapping_add(by),
        }
    }

    // === Main loop ===

    fn run(&mut self) {
        loop {
            match self.peek() {
                Token::Eof => break,
                Token::Newline => {
                    self.bump();
                    continue;
                }
                _ => {}
            }

            self.line();

            // Consume through end of line regardless of how parsing went
            if !self.at_line_end() {
                self.error(AsmErrorKind::Syntax, "unexpected tokens at end of line");
                self.skip_line();
            }
            if matches!(self.peek(), Token::Newline) {
                self.bump();
            }
        }
    }

    fn line(&mut self) {
        // Leading labels: `name:` or `N:` (numeric)
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Token::Identifier(name), Token::Colon) => {
                    let name = name.clone();
                    let loc = self.loc();
                    self.bump();
                    self.bump();
                    self.define_label(&name, loc);
                }
                (Token::Number(n), Token::Colon) => {
                    let n = *n;
                    self.bump();
                    self.bump();
                    if n < 0 {
                        self.error(AsmErrorKind::Syntax, "numeric label must be non-negative");
                    } else {
                        self.numeric_defs.push((n as u32, self.cur_addr(), self.section));
                    }
                }
                _ => break,
            }
        }

        match self.peek().clone() {
            Token::Newline | Token::Eof => {}
            Token::Directive(name) => {
                self.bump();
                self.directive(&name);
            }
            Token::Identifier(mnemonic) => {
                let loc = self.loc();
                self.bump();
                self.instruction(&mnemonic, loc);
            }
            _ => {
                self.error(AsmErrorKind::Syntax, "expected label, directive, or instruction");
                self.skip_line();
            }
        }
    }

    fn define_label(&mut self, name: &str, loc: SourceLoc) {
        let addr = self.cur_addr();
        if let Err(prev) = self.symbols.define(name, SymbolKind::Label, addr, loc.clone()) {
            let site = prev.map_or_else(String::new, |p| format!(" (first defined at {p})"));
            self.errors.push(AsmError::new(
                AsmErrorKind::DuplicateLabel,
                format!("label {name:?} already defined{site}"),
                loc,
                String::new(),
            ));
        } else {
            self.label_sections.insert(name.to_string(), self.section);
        }
    }

    // === Expressions ===

    fn parse_expr(&mut self) -> Result<Expr, ()> {
        let mut lhs = self.parse_term()?;
        loop {
            match self.peek() {
                Token::Plus => {
                    self.bump();
                    let rhs = self.parse_term()?;
                    lhs = Expr::Add(Box::new(lhs), Box::new(rhs));
                }
                Token::Minus => {
                    self.bump();
                    let rhs = self.parse_term()?;
                    lhs = Expr::Sub(Box::new(lhs), Box::new(rhs));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn parse_term(&mut self) -> Result<Expr, ()> {
        match self.peek().clone() {
            Token::Number(n) => {
                self.bump();
                Ok(Expr::Number(n))
            }
            Token::Identifier(name) => {
                let loc = self.loc();
                self.bump();
                self.symbols.reference(&name, loc);
                Ok(Expr::Symbol(name))
            }
            Token::NumericRef { label, forward } => {
                self.bump();
                Ok(Expr::NumericRef { label, forward })
            }
            Token::Minus => {
                self.bump();
                let inner = self.parse_term()?;
                Ok(Expr::Neg(Box::new(inner)))
            }
            _ => {
                self.error(AsmErrorKind::Syntax, "expected expression");
                Err(())
            }
        }
    }

    /// Evaluate an expression that must be known during pass 1
    /// (`.org`, `.space`, `.align`, `.equ`).
    fn eval_now(&mut self, expr: &Expr) -> Result<i64, ()> {
        let at = self.cur_addr();
        match expr.eval(&self.symbols, at) {
            Ok(v) => Ok(v),
            Err(msg) => {
                self.error(AsmErrorKind::UndefinedSymbol, msg);
                Err(())
            }
        }
    }

    // === Directives ===

    fn directive(&mut self, name: &str) {
        match name {
            "org" => {
                if let Ok(expr) = self.parse_expr() {
                    if let Ok(v) = self.eval_now(&expr) {
                        let addr = v as u32;
                        match self.section {
                            Section::Text => self.text_addr = addr,
                            Section::Data => self.data_addr = addr,
                        }
                        if self.origin.is_none() {
                            self.origin = Some(addr);
                        }
                    }
                }
            }
            "text" => self.section = Section::Text,
            "data" => self.section = Section::Data,
            "global" | "globl" => {
                if let Token::Identifier(sym) = self.peek().clone() {
                    self.bump();
                    self.symbols.mark_global(&sym);
                } else {
                    self.error(AsmErrorKind::InvalidDirective, ".global requires a symbol");
                    self.skip_line();
                }
            }
            "equ" | "set" => {
                let Token::Identifier(sym) = self.peek().clone() else {
                    self.error(AsmErrorKind::InvalidDirective, ".equ requires a name");
                    self.skip_line();
                    return;
                };
                let name_loc = self.loc();
                self.bump();
                if matches!(self.peek(), Token::Comma) {
                    self.bump();
                }
                let Ok(expr) = self.parse_expr() else {
                    self.skip_line();
                    return;
                };
                let Ok(v) = self.eval_now(&expr) else {
                    return;
                };
                if let Err(prev) =
                    self.symbols
                        .define(&sym, SymbolKind::Constant, v as u32, name_loc.clone())
                {
                    let site = prev.map_or_else(String::new, |p| format!(" (first defined at {p})"));
                    self.errors.push(AsmError::new(
                        AsmErrorKind::DuplicateLabel,
                        format!("constant {sym:?} already defined{site}"),
                        name_loc,
                        String::new(),
                    ));
                } else {
                    self.equ_defs.push((sym, expr, name_loc));
                }
            }
            "word" | "half" | "byte" => {
                let mut exprs = Vec::new();
                loop {
                    match self.parse_expr() {
                        Ok(e) => exprs.push(e),
                        Err(()) => {
                            self.skip_line();
                            break;
                        }
                    }
                    if matches!(self.peek(), Token::Comma) {
                        self.bump();
                    } else {
                        break;
                    }
                }
                let spec = match name {
                    "word" => DataSpec::Words(exprs),
                    "half" => DataSpec::Halves(exprs),
                    _ => DataSpec::Bytes(exprs),
                };
                self.push_data(spec);
            }
            "ascii" | "asciz" | "string" => {
                let zero_terminate = name != "ascii";
                let mut bytes = Vec::new();
                loop {
                    if let Token::String(s) = self.peek().clone() {
                        self.bump();
                        bytes.extend_from_slice(&s);
                        if zero_terminate {
                            bytes.push(0);
                        }
                    } else {
                        self.error(AsmErrorKind::InvalidDirective, "expected string literal");
                        self.skip_line();
                        break;
                    }
                    if matches!(self.peek(), Token::Comma) {
                        self.bump();
                    } else {
                        break;
                    }
                }
                self.push_data(DataSpec::Ascii(bytes));
            }
            "space" | "skip" => {
                if let Ok(expr) = self.parse_expr() {
                    if let Ok(v) = self.eval_now(&expr) {
                        if v < 0 {
                            self.error(AsmErrorKind::InvalidDirective, ".space size is negative");
                        } else {
                            // Optional fill argument is accepted and ignored
                            // (memory is zero-filled).
                            if matches!(self.peek(), Token::Comma) {
                                self.bump();
                                let _ = self.parse_expr();
                            }
                            self.push_data(DataSpec::Space(v as u32));
                        }
                    }
                }
            }
            "align" | "balign" => {
                if let Ok(expr) = self.parse_expr() {
                    if let Ok(v) = self.eval_now(&expr) {
                        let boundary = if name == "align" {
                            if !(0..=16).contains(&v) {
                                self.error(AsmErrorKind::InvalidDirective, ".align power out of range");
                                return;
                            }
                            1u32 << v
                        } else {
                            if v <= 0 || (v as u32).count_ones() != 1 {
                                self.error(
                                    AsmErrorKind::InvalidDirective,
                                    ".balign requires a power of two",
                                );
                                return;
                            }
                            v as u32
                        };
                        let pad = self.cur_addr().next_multiple_of(boundary) - self.cur_addr();
                        if pad > 0 {
                            self.push_data(DataSpec::Space(pad));
                        }
                    }
                }
            }
            "ltorg" => self.place_pool(),
            other => {
                self.error(
                    AsmErrorKind::InvalidDirective,
                    format!("unknown directive .{other}"),
                );
                self.skip_line();
            }
        }
    }

    fn push_data(&mut self, spec: DataSpec) {
        let size = spec.size();
        let loc = self.loc();
        self.items.push(Item::Data {
            address: self.cur_addr(),
            section: self.section,
            spec,
            loc,
        });
        self.advance_addr(size);
    }

    /// Place a literal pool at the current (4-aligned) address, reserving
    /// the 16-entry estimate. The real size replaces it in the post-pass.
    fn place_pool(&mut self) {
        let pad = self.cur_addr().next_multiple_of(4) - self.cur_addr();
        if pad > 0 {
            self.push_data(DataSpec::Space(pad));
        }
        let address = self.cur_addr();
        let index = self.pools.len();
        self.pools.push(Pool {
            address,
            section: self.section,
            literals: std::mem::take(&mut self.pending_literals),
        });
        self.items.push(Item::Pool {
            address,
            section: self.section,
            index,
        });
        self.advance_addr(4 * POOL_ESTIMATE);
    }

    // === Instructions ===

    fn instruction(&mut self, mnemonic: &str, loc: SourceLoc) {
        let Some(m) = parse_mnemonic(mnemonic) else {
            self.errors.push(AsmError::new(
                AsmErrorKind::InvalidInstruction,
                format!("unknown instruction {mnemonic:?}"),
                loc,
                String::new(),
            ));
            self.skip_line();
            return;
        };

        // Instructions always land on a word boundary, padding past any
        // odd-sized data that precedes them.
        let misalign = self.cur_addr() % 4;
        if misalign != 0 {
            self.push_data(DataSpec::Space(4 - misalign));
        }

        let kind = match m.family {
            Family::Dp(op) => self.parse_dp(op, m.s),
            Family::Mul => self.parse_mul(m.s),
            Family::Mla => self.parse_mla(m.s),
            Family::MulLong { signed, accumulate } => self.parse_mul_long(signed, accumulate, m.s),
            Family::Mem { load } => self.parse_mem(load, m.size),
            Family::Block { load } => self.parse_block(load, m.mode),
            Family::Push => self.parse_push_pop(false),
            Family::Pop => self.parse_push_pop(true),
            Family::B => self.parse_branch(false),
            Family::Bl => self.parse_branch(true),
            Family::Bx => self.expect_register().map(|rm| InstrKind::Bx { rm }),
            Family::Mrs => self.parse_mrs(),
            Family::Msr => self.parse_msr(),
            Family::Swi => self.parse_swi(),
            Family::Nop => Ok(InstrKind::Dp {
                op: DpOp::Mov,
                s: false,
                rd: 0,
                rn: 0,
                op2: AsmOp2::Reg { rm: 0, shift: None },
            }),
        };

        match kind {
            Ok(kind) => {
                // Register literal-pool references for pool sizing
                if let InstrKind::Mem {
                    addr: Address::Literal { text, expr },
                    ..
                } = &kind
                {
                    if !self.pending_literals.iter().any(|l| l.text == *text) {
                        self.pending_literals.push(PoolLiteral {
                            text: text.clone(),
                            expr: expr.clone(),
                            loc: loc.clone(),
                        });
                    }
                }
                self.items.push(Item::Instruction(Box::new(ParsedInstruction {
                    cond: m.cond,
                    kind,
                    address: self.cur_addr(),
                    section: self.section,
                    loc,
                })));
                self.advance_addr(4);
            }
            Err(()) => self.skip_line(),
        }
    }

    fn parse_dp(&mut self, op: DpOp, s: bool) -> Result<InstrKind, ()> {
        if op.is_compare() {
            // CMP Rn, op2
            let rn = self.expect_register()?;
            self.expect_comma()?;
            let op2 = self.parse_op2()?;
            return Ok(InstrKind::Dp {
                op,
                s: true,
                rd: 0,
                rn,
                op2,
            });
        }
        if op.is_move() {
            // MOV Rd, op2
            let rd = self.expect_register()?;
            self.expect_comma()?;
            let op2 = self.parse_op2()?;
            return Ok(InstrKind::Dp {
                op,
                s,
                rd,
                rn: 0,
                op2,
            });
        }

        // ADD Rd, Rn, op2 — or the two-operand shorthand ADD Rd, op2
        let rd = self.expect_register()?;
        self.expect_comma()?;

        if matches!(self.peek(), Token::Hash) {
            let op2 = self.parse_op2()?;
            return Ok(InstrKind::Dp {
                op,
                s,
                rd,
                rn: rd,
                op2,
            });
        }

        let r2 = self.expect_register()?;
        if matches!(self.peek(), Token::Comma) {
            // Disambiguate: third operand vs shift on a two-operand form
            if let Token::Identifier(word) = self.peek_at(1) {
                if is_shift_word(word) {
                    self.bump(); // comma
                    let shift = self.parse_shift()?;
                    return Ok(InstrKind::Dp {
                        op,
                        s,
                        rd,
                        rn: rd,
                        op2: AsmOp2::Reg {
                            rm: r2,
                            shift: Some(shift),
                        },
                    });
                }
            }
            self.bump(); // comma
            let op2 = self.parse_op2()?;
            Ok(InstrKind::Dp {
                op,
                s,
                rd,
                rn: r2,
                op2,
            })
        } else {
            Ok(InstrKind::Dp {
                op,
                s,
                rd,
                rn: rd,
                op2: AsmOp2::Reg {
                    rm: r2,
                    shift: None,
                },
            })
        }
    }

    /// Parse operand 2: `#imm` or `Rm {, shift}`.
    fn parse_op2(&mut self) -> Result<AsmOp2, ()> {
        if matches!(self.peek(), Token::Hash) {
            self.bump();
            let expr = self.parse_expr()?;
            return Ok(AsmOp2::Imm(expr));
        }
        let rm = self.expect_register()?;
        let shift = if matches!(self.peek(), Token::Comma)
            && matches!(self.peek_at(1), Token::Identifier(w) if is_shift_word(w))
        {
            self.bump();
            Some(self.parse_shift()?)
        } else {
            None
        };
        Ok(AsmOp2::Reg { rm, shift })
    }

    fn parse_shift(&mut self) -> Result<AsmShift, ()> {
        let Token::Identifier(word) = self.peek().clone() else {
            self.error(AsmErrorKind::Syntax, "expected shift operator");
            return Err(());
        };
        let upper = word.to_ascii_uppercase();
        self.bump();
        if upper == "RRX" {
            return Ok(AsmShift::Rrx);
        }
        let kind = match upper.as_str() {
            "LSL" => ShiftKind::Lsl,
            "LSR" => ShiftKind::Lsr,
            "ASR" => ShiftKind::Asr,
            "ROR" => ShiftKind::Ror,
            _ => {
                self.error(AsmErrorKind::Syntax, format!("unknown shift {word:?}"));
                return Err(());
            }
        };
        match self.peek().clone() {
            Token::Hash => {
                self.bump();
                let amount = self.parse_expr()?;
                Ok(AsmShift::ByImm { kind, amount })
            }
            Token::Register(rs) => {
                self.bump();
                Ok(AsmShift::ByReg { kind, rs })
            }
            _ => {
                self.error(AsmErrorKind::Syntax, "expected shift amount");
                Err(())
            }
        }
    }

    fn parse_mul(&mut self, s: bool) -> Result<InstrKind, ()> {
        let rd = self.expect_register()?;
        self.expect_comma()?;
        let rm = self.expect_register()?;
        self.expect_comma()?;
        let rs = self.expect_register()?;
        Ok(InstrKind::Mul { s, rd, rm, rs })
    }

    fn parse_mla(&mut self, s: bool) -> Result<InstrKind, ()> {
        let rd = self.expect_register()?;
        self.expect_comma()?;
        let rm = self.expect_register()?;
        self.expect_comma()?;
        let rs = self.expect_register()?;
        self.expect_comma()?;
        let rn = self.expect_register()?;
        Ok(InstrKind::Mla { s, rd, rm, rs, rn })
    }

    fn parse_mul_long(&mut self, signed: bool, accumulate: bool, s: bool) -> Result<InstrKind, ()> {
        let rd_lo = self.expect_register()?;
        self.expect_comma()?;
        let rd_hi = self.expect_register()?;
        self.expect_comma()?;
        let rm = self.expect_register()?;
        self.expect_comma()?;
        let rs = self.expect_register()?;
        Ok(InstrKind::MulLong {
            signed,
            accumulate,
            s,
            rd_lo,
            rd_hi,
            rm,
            rs,
        })
    }

    fn parse_mem(&mut self, load: bool, size: MemSize) -> Result<InstrKind, ()> {
        let rd = self.expect_register()?;
        self.expect_comma()?;
        let addr = self.parse_address()?;

        match size {
            MemSize::Word | MemSize::Byte => Ok(InstrKind::Mem {
                load,
                byte: size == MemSize::Byte,
                rd,
                addr,
            }),
            MemSize::Half => Ok(InstrKind::MemHalf {
                load,
                signed: false,
                half: true,
                rd,
                addr,
            }),
            MemSize::SignedByte => Ok(InstrKind::MemHalf {
                load,
                signed: true,
                half: false,
                rd,
                addr,
            }),
            MemSize::SignedHalf => Ok(InstrKind::MemHalf {
                load,
                signed: true,
                half: true,
                rd,
                addr,
            }),
        }
    }

    fn parse_address(&mut self) -> Result<Address, ()> {
        match self.peek().clone() {
            Token::Equal => {
                self.bump();
                let expr = self.parse_expr()?;
                Ok(Address::Literal {
                    text: render_expr(&expr),
                    expr,
                })
            }
            Token::LBracket => {
                self.bump();
                let rn = self.expect_register()?;
                match self.peek().clone() {
                    Token::RBracket => {
                        self.bump();
                        match self.peek() {
                            Token::Exclaim => {
                                self.bump();
                                Ok(Address::Pre {
                                    rn,
                                    offset: AddrOffset::zero(),
                                    writeback: true,
                                })
                            }
                            Token::Comma => {
                                self.bump();
                                let offset = self.parse_addr_offset()?;
                                Ok(Address::Post { rn, offset })
                            }
                            _ => Ok(Address::Pre {
                                rn,
                                offset: AddrOffset::zero(),
                                writeback: false,
                            }),
                        }
                    }
                    Token::Comma => {
                        self.bump();
                        let offset = self.parse_addr_offset()?;
                        if !matches!(self.peek(), Token::RBracket) {
                            self.error(AsmErrorKind::Syntax, "expected ']'");
                            return Err(());
                        }
                        self.bump();
                        let writeback = if matches!(self.peek(), Token::Exclaim) {
                            self.bump();
                            true
                        } else {
                            false
                        };
                        Ok(Address::Pre {
                            rn,
                            offset,
                            writeback,
                        })
                    }
                    _ => {
                        self.error(AsmErrorKind::Syntax, "expected ',' or ']' in address");
                        Err(())
                    }
                }
            }
            Token::Identifier(_) | Token::Number(_) | Token::NumericRef { .. } => {
                let target = self.parse_expr()?;
                Ok(Address::PcRelative { target })
            }
            _ => {
                self.error(AsmErrorKind::Syntax, "expected address operand");
                Err(())
            }
        }
    }

    fn parse_addr_offset(&mut self) -> Result<AddrOffset, ()> {
        let mut negative = false;
        match self.peek() {
            Token::Plus => {
                self.bump();
            }
            Token::Minus => {
                negative = true;
                self.bump();
            }
            _ => {}
        }
        match self.peek().clone() {
            Token::Hash => {
                self.bump();
                let expr = self.parse_expr()?;
                Ok(AddrOffset::Imm { expr, negative })
            }
            Token::Register(rm) => {
                self.bump();
                let shift = if matches!(self.peek(), Token::Comma)
                    && matches!(self.peek_at(1), Token::Identifier(w) if is_shift_word(w))
                {
                    self.bump();
                    Some(self.parse_shift()?)
                } else {
                    None
                };
                Ok(AddrOffset::Reg {
                    rm,
                    negative,
                    shift,
                })
            }
            _ => {
                self.error(AsmErrorKind::Syntax, "expected offset");
                Err(())
            }
        }
    }

    fn parse_block(&mut self, load: bool, mode: BlockMode) -> Result<InstrKind, ()> {
        let rn = self.expect_register()?;
        let writeback = if matches!(self.peek(), Token::Exclaim) {
            self.bump();
            true
        } else {
            false
        };
        self.expect_comma()?;
        let regs = self.parse_reglist()?;
        Ok(InstrKind::Block {
            load,
            mode,
            rn,
            writeback,
            regs,
        })
    }

    fn parse_push_pop(&mut self, load: bool) -> Result<InstrKind, ()> {
        let regs = self.parse_reglist()?;
        // PUSH = STMDB SP!, POP = LDMIA SP!
        Ok(InstrKind::Block {
            load,
            mode: if load { BlockMode::Ia } else { BlockMode::Db },
            rn: 13,
            writeback: true,
            regs,
        })
    }

    fn parse_reglist(&mut self) -> Result<u16, ()> {
        if !matches!(self.peek(), Token::LBrace) {
            self.error(AsmErrorKind::Syntax, "expected '{'");
            return Err(());
        }
        self.bump();
        let mut regs: u16 = 0;
        loop {
            let first = self.expect_register()?;
            if matches!(self.peek(), Token::Minus) {
                self.bump();
                let last = self.expect_register()?;
                if last < first {
                    self.error(AsmErrorKind::InvalidOperand, "register range is reversed");
                    return Err(());
                }
                for r in first..=last {
                    regs |= 1 << r;
                }
            } else {
                regs |= 1 << first;
            }
            match self.peek() {
                Token::Comma => {
                    self.bump();
                }
                Token::RBrace => {
                    self.bump();
                    break;
                }
                _ => {
                    self.error(AsmErrorKind::Syntax, "expected ',' or '}' in register list");
                    return Err(());
                }
            }
        }
        if regs == 0 {
            self.error(AsmErrorKind::InvalidOperand, "empty register list");
            return Err(());
        }
        Ok(regs)
    }

    fn parse_branch(&mut self, link: bool) -> Result<InstrKind, ()> {
        let target = self.parse_expr()?;
        Ok(InstrKind::Branch { link, target })
    }

    fn parse_mrs(&mut self) -> Result<InstrKind, ()> {
        let rd = self.expect_register()?;
        self.expect_comma()?;
        if let Token::Identifier(name) = self.peek().clone() {
            if name.eq_ignore_ascii_case("CPSR") {
                self.bump();
                return Ok(InstrKind::Mrs { rd });
            }
        }
        self.error(AsmErrorKind::Syntax, "expected CPSR");
        Err(())
    }

    fn parse_msr(&mut self) -> Result<InstrKind, ()> {
        if let Token::Identifier(name) = self.peek().clone() {
            let upper = name.to_ascii_uppercase();
            if upper == "CPSR" || upper.starts_with("CPSR_") {
                self.bump();
                self.expect_comma()?;
                let src = match self.peek().clone() {
                    Token::Hash => {
                        self.bump();
                        MsrOperand::Imm(self.parse_expr()?)
                    }
                    Token::Register(rm) => {
                        self.bump();
                        MsrOperand::Reg(rm)
                    }
                    _ => {
                        self.error(AsmErrorKind::Syntax, "expected register or immediate");
                        return Err(());
                    }
                };
                return Ok(InstrKind::Msr { src });
            }
        }
        self.error(AsmErrorKind::Syntax, "expected CPSR destination");
        Err(())
    }

    fn parse_swi(&mut self) -> Result<InstrKind, ()> {
        if matches!(self.peek(), Token::Hash) {
            self.bump();
        }
        let comment = self.parse_expr()?;
        Ok(InstrKind::Swi { comment })
    }

    // === Post-pass: pool sizing, adjustment, symbol finalization ===

    fn finish(mut self) -> (ParseOutput, Vec<AsmError>) {
        // Implicit final pool at the end of the text section
        if !self.pending_literals.is_empty() {
            let saved = self.section;
            self.section = Section::Text;
            self.place_pool();
            self.section = saved;
        }

        // Per-pool address deltas: actual size minus the reserved estimate
        let deltas: Vec<(Section, u32, i64)> = self
            .pools
            .iter()
            .map(|p| {
                let actual = 4 * p.literals.len() as i64;
                (p.section, p.address, actual - i64::from(4 * POOL_ESTIMATE))
            })
            .collect();

        let adjust = |addr: u32, section: Section| -> u32 {
            let shift: i64 = deltas
                .iter()
                .filter(|(s, pool_addr, _)| *s == section && *pool_addr < addr)
                .map(|(_, _, d)| *d)
                .sum();
            (i64::from(addr) + shift) as u32
        };

        // Sweep items
        for item in &mut self.items {
            match item {
                Item::Instruction(i) => i.address = adjust(i.address, i.section),
                Item::Data {
                    address, section, ..
                } => *address = adjust(*address, *section),
                Item::Pool {
                    address, section, ..
                } => *address = adjust(*address, *section),
            }
        }
        for pool in &mut self.pools {
            pool.address = adjust(pool.address, pool.section);
        }

        // Sweep labels
        let label_sections = std::mem::take(&mut self.label_sections);
        for (name, section) in &label_sections {
            if let Some(value) = self.symbols.value(name) {
                let adjusted = adjust(value, *section);
                if adjusted != value {
                    self.symbols.update_value(name, adjusted);
                }
            }
        }

        // Numeric labels enter the table with final addresses
        for (n, addr, section) in std::mem::take(&mut self.numeric_defs) {
            self.symbols.define_numeric(n, adjust(addr, section));
        }

        // Re-evaluate constants whose expressions referenced labels
        for (name, expr, loc) in std::mem::take(&mut self.equ_defs) {
            let mut refs = Vec::new();
            expr.symbols(&mut refs);
            if refs.is_empty() {
                continue;
            }
            match expr.eval(&self.symbols, 0) {
                Ok(v) => self.symbols.update_value(&name, v as u32),
                Err(msg) => {
                    self.errors
                        .push(AsmError::new(AsmErrorKind::UndefinedSymbol, msg, loc, String::new()));
                }
            }
        }

        // Every referenced symbol must now be defined
        for sym in self.symbols.undefined() {
            for site in &sym.references {
                self.errors.push(AsmError::new(
                    AsmErrorKind::UndefinedSymbol,
                    format!("symbol {:?} is never defined", sym.name),
                    site.clone(),
                    String::new(),
                ));
            }
        }

        let origin = self.origin.unwrap_or(TEXT_BASE);
        let entry_point = self
            .symbols
            .value("_start")
            .or_else(|| self.symbols.value("main"))
            .unwrap_or(origin);

        (
            ParseOutput {
                items: self.items,
                symbols: self.symbols,
                pools: self.pools,
                origin,
                entry_point,
            },
            self.errors,
        )
    }
}

fn is_shift_word(word: &str) -> bool {
    matches!(
        word.to_ascii_uppercase().as_str(),
        "LSL" | "LSR" | "ASR" | "ROR" | "RRX"
    )
}

/// Canonical rendering of an expression, used as the literal-pool
/// deduplication key.
fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Number(n) => format!("{n}"),
        Expr::Symbol(s) => s.clone(),
        Expr::NumericRef { label, forward } => {
            format!("{label}{}", if *forward { 'f' } else { 'b' })
        }
        Expr::Neg(e) => format!("-{}", render_expr(e)),
        Expr::Add(a, b) => format!("{}+{}", render_expr(a), render_expr(b)),
        Expr::Sub(a, b) => format!("{}-{}", render_expr(a), render_expr(b)),
    }
}
