//! Source preprocessor: includes, conditionals, and macros.
//!
//! Runs before the lexer on raw text, line by line. `.include` pulls in
//! files relative to the including file's directory; `.ifdef`/`.ifndef`/
//! `.else`/`.endif` gate blocks on a set of defined names; `.macro`/`.endm`
//! capture bodies into a macro table, and invocations expand with
//! positional parameter substitution.
//!
//! Expansion is tracked with an explicit stack: a macro whose expansion
//! re-enters itself (directly or through another macro) is rejected by
//! stack membership, and total nesting is capped.

use crate::error::{AsmError, AsmErrorKind, SourceLoc};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Maximum macro expansion depth.
const MAX_MACRO_DEPTH: usize = 16;

/// One preprocessed source line, tagged with its origin.
#[derive(Debug, Clone)]
pub struct Line {
    pub file: Arc<str>,
    /// 1-based line number in the original file.
    pub number: u32,
    pub text: String,
}

/// A captured macro definition.
#[derive(Debug, Clone)]
struct Macro {
    params: Vec<String>,
    body: Vec<Line>,
}

/// The preprocessor state.
pub struct Preprocessor {
    defines: HashSet<String>,
    macros: HashMap<String, Macro>,
    /// Include chain for cycle detection, canonicalized where possible.
    include_stack: Vec<PathBuf>,
    /// Macro expansion stack for recursion detection.
    expansion_stack: Vec<String>,
    errors: Vec<AsmError>,
    output: Vec<Line>,
    /// True while inside a block comment that spans lines.
    in_block_comment: bool,
}

impl Preprocessor {
    #[must_use]
    pub fn new(defines: &[String]) -> Self {
        Self {
            defines: defines.iter().cloned().collect(),
            macros: HashMap::new(),
            include_stack: Vec::new(),
            expansion_stack: Vec::new(),
            errors: Vec::new(),
            output: Vec::new(),
            in_block_comment: false,
        }
    }

    /// Preprocess a file from disk.
    pub fn process_file(mut self, path: &Path) -> Result<Vec<Line>, Vec<AsmError>> {
        self.include_file(path, None);
        if self.errors.is_empty() {
            Ok(self.output)
        } else {
            Err(self.errors)
        }
    }

    /// Preprocess in-memory source. `.include` resolves relative to the
    /// current directory.
    pub fn process_source(mut self, source: &str, filename: &str) -> Result<Vec<Line>, Vec<AsmError>> {
        let file: Arc<str> = Arc::from(filename);
        self.include_stack.push(PathBuf::from(filename));
        self.run(source, &file, Path::new("."));
        self.include_stack.pop();
        if self.errors.is_empty() {
            Ok(self.output)
        } else {
            Err(self.errors)
        }
    }

    fn include_file(&mut self, path: &Path, site: Option<SourceLoc>) {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if self.include_stack.contains(&canonical) {
            let loc = site.unwrap_or_else(|| SourceLoc::new(path.display().to_string(), 1, 1));
            self.errors.push(AsmError::new(
                AsmErrorKind::CircularInclude,
                format!("include cycle through {}", path.display()),
                loc,
                String::new(),
            ));
            return;
        }

        let source = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                let loc = site.unwrap_or_else(|| SourceLoc::new(path.display().to_string(), 1, 1));
                self.errors.push(AsmError::new(
                    AsmErrorKind::FileIo,
                    format!("cannot read {}: {e}", path.display()),
                    loc,
                    String::new(),
                ));
                return;
            }
        };

        let file: Arc<str> = Arc::from(path.display().to_string());
        let dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        self.include_stack.push(canonical);
        self.run(&source, &file, &dir);
        self.include_stack.pop();
    }

    /// Process one file's text. `dir` is the base for relative includes.
    fn run(&mut self, source: &str, file: &Arc<str>, dir: &Path) {
        // Condition stack: each entry is (currently_active, any_branch_taken)
        let mut conds: Vec<(bool, bool)> = Vec::new();
        // Macro being captured, if any
        let mut capture: Option<(String, Macro, SourceLoc)> = None;

        for (idx, raw) in source.lines().enumerate() {
            let number = idx as u32 + 1;
            let text = self.strip_block_comments(raw);
            let trimmed = text.trim();
            let loc = SourceLoc::new(file.as_ref(), number, 1);

            let active = conds.iter().all(|&(a, _)| a);

            // Directive word, if the line starts with one
            let (word, rest) = split_word(trimmed);
            let word_lc = word.to_ascii_lowercase();

            match word_lc.as_str() {
                ".ifdef" | ".ifndef" => {
                    let name = rest.trim();
                    let defined = self.defines.contains(name);
                    let take = if word_lc == ".ifdef" { defined } else { !defined };
                    conds.push((active && take, take));
                    continue;
                }
                ".else" => {
                    if conds.is_empty() {
                        self.errors.push(AsmError::new(
                            AsmErrorKind::InvalidDirective,
                            ".else without .ifdef",
                            loc,
                            raw.to_string(),
                        ));
                    } else {
                        let parent_active = conds[..conds.len() - 1].iter().all(|&(a, _)| a);
                        let top = conds.last_mut().expect("non-empty");
                        top.0 = parent_active && !top.1;
                        top.1 = true;
                    }
                    continue;
                }
                ".endif" => {
                    if conds.pop().is_none() {
                        self.errors.push(AsmError::new(
                            AsmErrorKind::InvalidDirective,
                            ".endif without .ifdef",
                            loc,
                            raw.to_string(),
                        ));
                    }
                    continue;
                }
                ".define" if active => {
                    self.defines.insert(rest.trim().to_string());
                    continue;
                }
                _ => {}
            }

            if !active {
                continue;
            }

            // Macro capture mode
            if capture.is_some() {
                if word_lc == ".endm" || word_lc == ".endmacro" {
                    let (name, mac, _) = capture.take().expect("capturing");
                    if self.macros.insert(name.clone(), mac).is_some() {
                        self.errors.push(AsmError::new(
                            AsmErrorKind::MacroExpansion,
                            format!("macro {name:?} redefined"),
                            loc,
                            raw.to_string(),
                        ));
                    }
                } else if word_lc == ".macro" {
                    self.errors.push(AsmError::new(
                        AsmErrorKind::MacroExpansion,
                        "nested .macro definition",
                        loc,
                        raw.to_string(),
                    ));
                } else if let Some((_, mac, _)) = capture.as_mut() {
                    mac.body.push(Line {
                        file: Arc::clone(file),
                        number,
                        text: text.clone(),
                    });
                }
                continue;
            }

            match word_lc.as_str() {
                ".macro" => {
                    let mut parts = rest.split([' ', '\t', ',']).filter(|s| !s.is_empty());
                    let Some(name) = parts.next() else {
                        self.errors.push(AsmError::new(
                            AsmErrorKind::MacroExpansion,
                            ".macro requires a name",
                            loc,
                            raw.to_string(),
                        ));
                        continue;
                    };
                    let params = parts.map(str::to_string).collect();
                    capture = Some((
                        name.to_string(),
                        Macro {
                            params,
                            body: Vec::new(),
                        },
                        loc,
                    ));
                }
                ".endm" | ".endmacro" => {
                    self.errors.push(AsmError::new(
                        AsmErrorKind::MacroExpansion,
                        ".endm without .macro",
                        loc,
                        raw.to_string(),
                    ));
                }
                ".include" => {
                    let name = rest.trim().trim_matches('"');
                    if name.is_empty() {
                        self.errors.push(AsmError::new(
                            AsmErrorKind::InvalidDirective,
                            ".include requires a file name",
                            loc,
                            raw.to_string(),
                        ));
                        continue;
                    }
                    self.include_file(&dir.join(name), Some(loc));
                }
                _ => {
                    // Macro invocation or ordinary line
                    let mnemonic = word.trim_end_matches(':');
                    if !word.ends_with(':') && self.macros.contains_key(mnemonic) {
                        self.expand_macro(mnemonic, rest, &loc, raw);
                    } else if !trimmed.is_empty() {
                        self.output.push(Line {
                            file: Arc::clone(file),
                            number,
                            text,
                        });
                    } else {
                        // Keep blank lines so token streams stay line-shaped
                        self.output.push(Line {
                            file: Arc::clone(file),
                            number,
                            text: String::new(),
                        });
                    }
                }
            }
        }

        if let Some((name, _, loc)) = capture {
            self.errors.push(AsmError::new(
                AsmErrorKind::MacroExpansion,
                format!("macro {name:?} missing .endm"),
                loc,
                String::new(),
            ));
        }
        if !conds.is_empty() {
            self.errors.push(AsmError::new(
                AsmErrorKind::InvalidDirective,
                "unterminated .ifdef block",
                SourceLoc::new(file.as_ref(), source.lines().count() as u32, 1),
                String::new(),
            ));
        }
    }

    /// Expand a macro invocation, substituting `\param` and `\{param}`
    /// occurrences, then re-scanning the body for nested invocations.
    fn expand_macro(&mut self, name: &str, args_text: &str, loc: &SourceLoc, raw: &str) {
        if self.expansion_stack.iter().any(|n| n == name) {
            self.errors.push(AsmError::new(
                AsmErrorKind::MacroExpansion,
                format!("recursive expansion of macro {name:?}"),
                loc.clone(),
                raw.to_string(),
            ));
            return;
        }
        if self.expansion_stack.len() >= MAX_MACRO_DEPTH {
            self.errors.push(AsmError::new(
                AsmErrorKind::MacroExpansion,
                format!("macro expansion deeper than {MAX_MACRO_DEPTH}"),
                loc.clone(),
                raw.to_string(),
            ));
            return;
        }

        let mac = self.macros[name].clone();
        let args: Vec<&str> = if args_text.trim().is_empty() {
            Vec::new()
        } else {
            args_text.split(',').map(str::trim).collect()
        };
        if args.len() != mac.params.len() {
            self.errors.push(AsmError::new(
                AsmErrorKind::MacroExpansion,
                format!(
                    "macro {name:?} expects {} argument(s), got {}",
                    mac.params.len(),
                    args.len()
                ),
                loc.clone(),
                raw.to_string(),
            ));
            return;
        }

        self.expansion_stack.push(name.to_string());
        for body_line in &mac.body {
            let substituted = substitute_params(&body_line.text, &mac.params, &args);
            // Re-scan for nested macro invocations
            let (word, rest) = split_word(substituted.trim());
            let mnemonic = word.trim_end_matches(':');
            if !word.ends_with(':') && self.macros.contains_key(mnemonic) {
                let inner_raw = substituted.clone();
                self.expand_macro(mnemonic, rest, loc, &inner_raw);
            } else {
                self.output.push(Line {
                    file: Arc::clone(&body_line.file),
                    number: body_line.number,
                    text: substituted,
                });
            }
        }
        self.expansion_stack.pop();
    }

    /// Remove `/* ... */` comments, including ones spanning lines.
    /// Multiple blocks on one line are each cut.
    fn strip_block_comments(&mut self, line: &str) -> String {
        let mut out = String::with_capacity(line.len());
        let mut rest = line;
        loop {
            if self.in_block_comment {
                match rest.find("*/") {
                    Some(end) => {
                        self.in_block_comment = false;
                        rest = &rest[end + 2..];
                    }
                    None => return out,
                }
            } else {
                match rest.find("/*") {
                    Some(start) => {
                        out.push_str(&rest[..start]);
                        self.in_block_comment = true;
                        rest = &rest[start + 2..];
                    }
                    None => {
                        out.push_str(rest);
                        return out;
                    }
                }
            }
        }
    }
}

/// Split a line into its first word and the remainder.
fn split_word(line: &str) -> (&str, &str) {
    match line.find([' ', '\t']) {
        Some(i) => (&line[..i], &line[i + 1..]),
        None => (line, ""),
    }
}

/// Substitute `\param` and `\{param}` with the corresponding argument.
fn substitute_params(text: &str, params: &[String], args: &[&str]) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '\\' && i + 1 < chars.len() {
            // \{param} form
            if chars[i + 1] == '{' {
                if let Some(close) = chars[i + 2..].iter().position(|&c| c == '}') {
                    let name: String = chars[i + 2..i + 2 + close].iter().collect();
                    if let Some(idx) = params.iter().position(|p| *p == name) {
                        out.push_str(args[idx]);
                        i += close + 3;
                        continue;
                    }
                }
            }
            // \param form: longest parameter match at this position
            let mut best: Option<(usize, usize)> = None;
            for (idx, p) in params.iter().enumerate() {
                let len = p.chars().count();
                if chars[i + 1..].len() >= len
                    && chars[i + 1..i + 1 + len].iter().collect::<String>() == *p
                {
                    if best.is_none_or(|(_, blen)| len > blen) {
                        best = Some((idx, len));
                    }
                }
            }
            if let Some((idx, len)) = best {
                out.push_str(args[idx]);
                i += len + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Result<Vec<String>, Vec<AsmError>> {
        Preprocessor::new(&[])
            .process_source(source, "test.s")
            .map(|lines| lines.into_iter().map(|l| l.text).collect())
    }

    fn run_defined(source: &str, defines: &[&str]) -> Vec<String> {
        let defines: Vec<String> = defines.iter().map(|s| (*s).to_string()).collect();
        Preprocessor::new(&defines)
            .process_source(source, "test.s")
            .expect("preprocess")
            .into_iter()
            .map(|l| l.text)
            .collect()
    }

    fn nonblank(lines: Vec<String>) -> Vec<String> {
        lines.into_iter().filter(|l| !l.trim().is_empty()).collect()
    }

    #[test]
    fn ifdef_gates_block() {
        let src = ".ifdef DEBUG\nMOV R0, #1\n.else\nMOV R0, #2\n.endif\n";
        assert_eq!(nonblank(run(src).expect("ok")), vec!["MOV R0, #2"]);
        assert_eq!(nonblank(run_defined(src, &["DEBUG"])), vec!["MOV R0, #1"]);
    }

    #[test]
    fn ifndef_inverts() {
        let src = ".ifndef RELEASE\nMOV R0, #1\n.endif\n";
        assert_eq!(nonblank(run(src).expect("ok")), vec!["MOV R0, #1"]);
        assert!(nonblank(run_defined(src, &["RELEASE"])).is_empty());
    }

    #[test]
    fn macro_expansion_with_params() {
        let src = "\
.macro inc reg, amount
ADD \\reg, \\reg, #\\amount
.endm
inc R0, 4
inc R1, 8
";
        assert_eq!(
            nonblank(run(src).expect("ok")),
            vec!["ADD R0, R0, #4", "ADD R1, R1, #8"]
        );
    }

    #[test]
    fn macro_brace_params() {
        let src = "\
.macro load r
MOV \\{r}, #0
.endm
load R3
";
        assert_eq!(nonblank(run(src).expect("ok")), vec!["MOV R3, #0"]);
    }

    #[test]
    fn macro_argument_count_mismatch() {
        let src = "\
.macro pair a, b
ADD \\a, \\a, \\b
.endm
pair R0
";
        let errs = run(src).expect_err("should fail");
        assert!(errs[0].message.contains("expects 2"));
    }

    #[test]
    fn recursive_macro_rejected() {
        let src = "\
.macro spin
spin
.endm
spin
";
        let errs = run(src).expect_err("should fail");
        assert_eq!(errs[0].kind, AsmErrorKind::MacroExpansion);
        assert!(errs[0].message.contains("recursive"));
    }

    #[test]
    fn nested_macros_expand() {
        let src = "\
.macro one r
MOV \\r, #1
.endm
.macro two r
one \\r
one \\r
.endm
two R5
";
        assert_eq!(
            nonblank(run(src).expect("ok")),
            vec!["MOV R5, #1", "MOV R5, #1"]
        );
    }

    #[test]
    fn block_comment_spanning_lines() {
        let src = "MOV R0, #1 /* comment\nstill comment\n*/ MOV R1, #2\n";
        assert_eq!(
            nonblank(run(src).expect("ok")),
            vec!["MOV R0, #1 ", " MOV R1, #2"]
        );
    }

    #[test]
    fn multiple_blocks_on_one_line() {
        let src = "MOV R0, #1 /* a */ ; wait, this is /* b */ fine\n";
        let lines = run(src).expect("ok");
        assert!(lines[0].contains("MOV R0, #1"));
        assert!(!lines[0].contains("a */"));
    }
}
