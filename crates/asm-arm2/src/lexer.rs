//! Tokenizer for ARM assembly source.
//!
//! Operates on preprocessed lines, each of which remembers the file and
//! line it originally came from, so diagnostics survive `.include` and
//! macro expansion. Newlines are significant tokens; horizontal whitespace
//! is skipped.

use crate::error::{AsmError, AsmErrorKind, SourceLoc};
use crate::preprocess::Line;

/// A token kind with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Label, mnemonic, or symbol reference.
    Identifier(String),
    /// R0-R15, SP, LR, PC.
    Register(u8),
    /// Integer literal. Negative values arrive already negated.
    Number(i64),
    /// Double-quoted string with escapes processed.
    String(Vec<u8>),
    /// Numeric label reference: `1f` (forward) or `1b` (backward).
    NumericRef { label: u32, forward: bool },
    /// `.name` directive.
    Directive(String),
    Hash,
    Comma,
    Colon,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Exclaim,
    Equal,
    Plus,
    Minus,
    Newline,
    Eof,
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub loc: SourceLoc,
}

/// Tokenize preprocessed lines into a single stream.
///
/// Each line produces its tokens followed by a `Newline`; the stream ends
/// with `Eof`. Lexical errors are accumulated and returned alongside
/// whatever tokens could be produced, so the parser can keep diagnosing.
pub fn tokenize(lines: &[Line]) -> (Vec<Spanned>, Vec<AsmError>) {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for line in lines {
        let mut lexer = LineLexer::new(line);
        lexer.run(&mut tokens, &mut errors);
        tokens.push(Spanned {
            token: Token::Newline,
            loc: SourceLoc::new(line.file.as_ref(), line.number, line.text.len() as u32 + 1),
        });
    }

    let last_loc = lines.last().map_or_else(
        || SourceLoc::new("<empty>", 1, 1),
        |l| SourceLoc::new(l.file.as_ref(), l.number, l.text.len() as u32 + 1),
    );
    tokens.push(Spanned {
        token: Token::Eof,
        loc: last_loc,
    });

    (tokens, errors)
}

struct LineLexer<'a> {
    line: &'a Line,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> LineLexer<'a> {
    fn new(line: &'a Line) -> Self {
        Self {
            line,
            chars: line.text.chars().collect(),
            pos: 0,
        }
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc::new(self.line.file.as_ref(), self.line.number, self.pos as u32 + 1)
    }

    fn error(&self, message: impl Into<String>) -> AsmError {
        AsmError::new(
            AsmErrorKind::Syntax,
            message,
            self.loc(),
            self.line.text.clone(),
        )
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn run(&mut self, tokens: &mut Vec<Spanned>, errors: &mut Vec<AsmError>) {
        while let Some(c) = self.peek() {
            // Comments cut the rest of the line. Block comments within a
            // line were already stripped by the preprocessor.
            if c == ';' || c == '@' {
                break;
            }
            if c == '/' && self.peek_at(1) == Some('/') {
                break;
            }
            if c.is_whitespace() {
                self.pos += 1;
                continue;
            }

            let loc = self.loc();
            let token = match c {
                '#' => self.single(Token::Hash),
                ',' => self.single(Token::Comma),
                ':' => self.single(Token::Colon),
                '[' => self.single(Token::LBracket),
                ']' => self.single(Token::RBracket),
                '{' => self.single(Token::LBrace),
                '}' => self.single(Token::RBrace),
                '!' => self.single(Token::Exclaim),
                '=' => self.single(Token::Equal),
                '+' => self.single(Token::Plus),
                '-' => {
                    // A minus directly before a digit is a negative literal
                    // unless it follows an operand (then it is subtraction).
                    let follows_operand = matches!(
                        tokens.last().map(|s| &s.token),
                        Some(
                            Token::Identifier(_)
                                | Token::Number(_)
                                | Token::Register(_)
                                | Token::RBracket
                                | Token::RBrace
                        )
                    );
                    if !follows_operand && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                        self.pos += 1;
                        match self.number(true) {
                            Ok(t) => t,
                            Err(e) => {
                                errors.push(e);
                                break;
                            }
                        }
                    } else {
                        self.single(Token::Minus)
                    }
                }
                '"' => match self.string() {
                    Ok(t) => t,
                    Err(e) => {
                        errors.push(e);
                        break;
                    }
                },
                '.' => self.directive(),
                c if c.is_ascii_digit() => match self.number(false) {
                    Ok(t) => t,
                    Err(e) => {
                        errors.push(e);
                        break;
                    }
                },
                c if is_ident_start(c) => self.identifier(),
                other => {
                    errors.push(self.error(format!("unexpected character {other:?}")));
                    self.pos += 1;
                    continue;
                }
            };
            tokens.push(Spanned { token, loc });
        }
    }

    fn single(&mut self, token: Token) -> Token {
        self.pos += 1;
        token
    }

    /// Numbers accept `0x`, `0b`, and `0o` prefixes, a bare octal-free
    /// decimal otherwise. A leading `-` is handled by the caller via the
    /// `negative` flag when a Minus directly precedes a digit.
    fn number(&mut self, negative: bool) -> Result<Token, AsmError> {
        let mut radix = 10;
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
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|&&c| c != '_')
            .collect();
        if text.is_empty() {
            return Err(self.error("incomplete numeric literal"));
        }

        // Decimal digits followed by a single `f` or `b` reference a
        // numeric label (`1f` forward, `1b` backward).
        if radix == 10 && !negative {
            if let Some(dir) = text.strip_suffix(['f', 'b']) {
                if !dir.is_empty() && dir.bytes().all(|b| b.is_ascii_digit()) {
                    let label = dir
                        .parse()
                        .map_err(|_| self.error(format!("numeric label {dir:?} out of range")))?;
                    return Ok(Token::NumericRef {
                        label,
                        forward: text.ends_with('f'),
                    });
                }
            }
        }

        let value = i64::from_str_radix(&text, radix)
            .map_err(|_| self.error(format!("invalid number {text:?} (radix {radix})")))?;
        Ok(Token::Number(if negative { -value } else { value }))
    }

    fn directive(&mut self) -> Token {
        self.pos += 1; // consume '.'
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        Token::Directive(name.to_ascii_lowercase())
    }

    fn identifier(&mut self) -> Token {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();

        if let Some(reg) = register_number(&text) {
            Token::Register(reg)
        } else {
            Token::Identifier(text)
        }
    }

    /// Double-quoted string with C-style escapes. Escape values above 255
    /// and unterminated strings are errors; an incomplete `\x` is kept
    /// literally, matching historical assembler behaviour.
    fn string(&mut self) -> Result<Token, AsmError> {
        self.pos += 1; // opening quote
        let mut bytes = Vec::new();

        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("unterminated string literal"));
            };
            match c {
                '"' => return Ok(Token::String(bytes)),
                '\\' => {
                    let Some(esc) = self.bump() else {
                        return Err(self.error("unterminated escape sequence"));
                    };
                    match esc {
                        'n' => bytes.push(b'\n'),
                        't' => bytes.push(b'\t'),
                        'r' => bytes.push(b'\r'),
                        '\\' => bytes.push(b'\\'),
                        '0' if !matches!(self.peek(), Some('0'..='7')) => bytes.push(0),
                        '"' => bytes.push(b'"'),
                        '\'' => bytes.push(b'\''),
                        'a' => bytes.push(0x07),
                        'b' => bytes.push(0x08),
                        'f' => bytes.push(0x0C),
                        'v' => bytes.push(0x0B),
                        'x' => {
                            let mut value: u32 = 0;
                            let mut digits = 0;
                            while digits < 2 {
                                match self.peek().and_then(|c| c.to_digit(16)) {
                                    Some(d) => {
                                        value = value * 16 + d;
                                        self.pos += 1;
                                        digits += 1;
                                    }
                                    None => break,
                                }
                            }
                            if digits == 0 {
                                // Incomplete \x is preserved literally
                                bytes.push(b'\\');
                                bytes.push(b'x');
                            } else {
                                bytes.push(value as u8);
                            }
                        }
                        '0'..='7' => {
                            // Octal escape, 1-3 digits, value <= 255
                            let mut value = esc.to_digit(8).unwrap_or(0);
                            let mut digits = 1;
                            while digits < 3 {
                                match self.peek().and_then(|c| c.to_digit(8)) {
                                    Some(d) if value * 8 + d <= 255 => {
                                        value = value * 8 + d;
                                        self.pos += 1;
                                        digits += 1;
                                    }
                                    _ => break,
                                }
                            }
                            bytes.push(value as u8);
                        }
                        other => {
                            return Err(self.error(format!("unknown escape sequence \\{other}")));
                        }
                    }
                }
                c => {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                }
            }
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Map register names (case-insensitive) to their number.
fn register_number(text: &str) -> Option<u8> {
    let upper = text.to_ascii_uppercase();
    match upper.as_str() {
        "SP" => return Some(13),
        "LR" => return Some(14),
        "PC" => return Some(15),
        _ => {}
    }
    let rest = upper.strip_prefix('R')?;
    let n: u8 = rest.parse().ok()?;
    // "R1x" style parses above only for pure digits; range-check the result
    if n < 16 && rest.len() <= 2 {
        Some(n)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::Line;
    use std::sync::Arc;

    fn lex(text: &str) -> Vec<Token> {
        let line = Line {
            file: Arc::from("test.s"),
            number: 1,
            text: text.to_string(),
        };
        let (tokens, errors) = tokenize(&[line]);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        tokens.into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn registers_and_aliases() {
        assert_eq!(
            lex("R0 r15 SP lr pc"),
            vec![
                Token::Register(0),
                Token::Register(15),
                Token::Register(13),
                Token::Register(14),
                Token::Register(15),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn number_bases() {
        assert_eq!(
            lex("10 0x1F 0b101 0o17"),
            vec![
                Token::Number(10),
                Token::Number(0x1F),
                Token::Number(5),
                Token::Number(0o17),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn comments_cut_line() {
        assert_eq!(lex("; nothing"), vec![Token::Newline, Token::Eof]);
        assert_eq!(lex("@ nothing"), vec![Token::Newline, Token::Eof]);
        assert_eq!(
            lex("R0 // trailing"),
            vec![Token::Register(0), Token::Newline, Token::Eof]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            lex(r#""a\n\t\x41\101\0""#),
            vec![
                Token::String(vec![b'a', b'\n', b'\t', 0x41, 0o101, 0]),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn incomplete_hex_escape_is_literal() {
        assert_eq!(
            lex(r#""\xg""#),
            vec![
                Token::String(vec![b'\\', b'x', b'g']),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn punctuation() {
        assert_eq!(
            lex("label: LDR R0, [R1, #4]!"),
            vec![
                Token::Identifier("label".into()),
                Token::Colon,
                Token::Identifier("LDR".into()),
                Token::Register(0),
                Token::Comma,
                Token::LBracket,
                Token::Register(1),
                Token::Comma,
                Token::Hash,
                Token::Number(4),
                Token::RBracket,
                Token::Exclaim,
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn numeric_label_refs() {
        assert_eq!(
            lex("1f 2b"),
            vec![
                Token::NumericRef {
                    label: 1,
                    forward: true
                },
                Token::NumericRef {
                    label: 2,
                    forward: false
                },
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn negative_literal_vs_subtraction() {
        assert_eq!(
            lex("#-4"),
            vec![Token::Hash, Token::Number(-4), Token::Newline, Token::Eof]
        );
        assert_eq!(
            lex("end-4"),
            vec![
                Token::Identifier("end".into()),
                Token::Minus,
                Token::Number(4),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn directive_is_lowercased() {
        assert_eq!(
            lex(".WORD 1"),
            vec![
                Token::Directive("word".into()),
                Token::Number(1),
                Token::Newline,
                Token::Eof,
            ]
        );
    }
}
