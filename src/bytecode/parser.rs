//! Disassembly listing parser.
//!
//! ```text
//! ; comments start with a semicolon
//! global limit = 10
//!
//! def sum(n) in "loops.py":
//!   2      0 LOAD_CONST          0
//!          2 STORE_FAST          r
//!   3      4 SETUP_LOOP         24 (to 30)
//!     >>   6 LOAD_GLOBAL         0 (limit)
//! ```
//!
//! Each instruction line is `[line] offset OPNAME [operand]`. A leading line
//! number updates the source line of the following instructions. The `>>`
//! jump-target marker printed by disassemblers is accepted and ignored, and
//! so are the `N (name)` and `N (to M)` operand forms `dis` prints.
//!
//! `global NAME = LITERAL` lines outside a function declare module globals
//! with their initial value.

use super::{CmpOp, FunctionCode, Opcode, Operand, OperandKind, RawInstr, Scalar, SourceLoc};
use crate::core::ListingError;
use std::sync::Arc;

/// Parsed listing: every function in source order and the declared globals.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Listing {
    pub functions: Vec<FunctionCode>,
    pub globals: Vec<(String, Scalar)>,
}

impl Listing {
    pub fn function(&self, name: &str) -> Option<&FunctionCode> {
        self.functions.iter().find(|f| f.name() == name)
    }

    /// Initial value of a declared global.
    pub fn global(&self, name: &str) -> Option<Scalar> {
        self.globals
            .iter()
            .find(|(declared, _)| declared == name)
            .map(|&(_, value)| value)
    }
}

pub fn parse_listing(text: &str) -> Result<Listing, ListingError> {
    let mut listing = Listing::default();
    let mut current: Option<(FunctionCode, u32)> = None;

    for (idx, raw_line) in text.lines().enumerate() {
        let mut parser = Parser::new(raw_line, idx + 1);
        parser.skip_whitespace();
        if parser.is_eof() {
            continue;
        }

        if parser.try_keyword("def") {
            if let Some((done, _)) = current.take() {
                listing.functions.push(finish(done, idx)?);
            }
            current = Some((parser.parse_header()?, 1));
            continue;
        }

        if parser.try_keyword("global") {
            if let Some((done, _)) = current.take() {
                listing.functions.push(finish(done, idx)?);
            }
            let (name, value) = parser.parse_global()?;
            if listing.global(&name).is_some() {
                return Err(parser.error(format!("global '{name}' is declared twice")));
            }
            listing.globals.push((name, value));
            continue;
        }

        let Some((code, line)) = current.as_mut() else {
            return Err(parser.error("instruction outside of a function"));
        };
        parser.parse_instruction(code, line)?;
    }

    if let Some((done, _)) = current {
        let last_line = text.lines().count();
        listing.functions.push(finish(done, last_line)?);
    }
    Ok(listing)
}

fn finish(code: FunctionCode, line: usize) -> Result<FunctionCode, ListingError> {
    if code.instrs.is_empty() {
        return Err(ListingError {
            line,
            message: format!("function {} has no instructions", code.name()),
        });
    }
    Ok(code)
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, line: usize) -> Self {
        Self { text, pos: 0, line }
    }

    fn error(&self, message: impl Into<String>) -> ListingError {
        ListingError {
            line: self.line,
            message: message.into(),
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn current_char(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            self.pos += ch.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch == ';' {
                self.pos = self.text.len();
            } else if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn try_read(&mut self, ch: char) -> bool {
        self.skip_whitespace();
        if self.current_char() == Some(ch) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: char) -> Result<(), ListingError> {
        if !self.try_read(ch) {
            return Err(self.error(format!(
                "expected '{}' but found {:?}",
                ch,
                self.current_char()
            )));
        }
        Ok(())
    }

    fn try_keyword(&mut self, keyword: &str) -> bool {
        self.skip_whitespace();
        let rest = &self.text[self.pos..];
        if !rest.starts_with(keyword) {
            return false;
        }
        let boundary = rest[keyword.len()..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_'));
        if boundary {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn read_identifier(&mut self) -> Result<&'a str, ListingError> {
        self.skip_whitespace();
        let start = self.pos;

        match self.current_char() {
            Some(ch) if ch.is_alphabetic() || ch == '_' => {}
            Some(ch) => return Err(self.error(format!("expected identifier but found '{ch}'"))),
            None => return Err(self.error("expected identifier but found end of line")),
        }
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }
        Ok(&self.text[start..self.pos])
    }

    fn read_number(&mut self) -> Result<u32, ListingError> {
        self.skip_whitespace();
        let start = self.pos;
        while matches!(self.current_char(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }
        if start == self.pos {
            return Err(self.error(format!(
                "expected number but found {:?}",
                self.current_char()
            )));
        }
        self.text[start..self.pos]
            .parse()
            .map_err(|_| self.error("number out of range"))
    }

    /// Next whitespace-delimited word, stopping at a comment.
    fn read_word(&mut self) -> &'a str {
        self.skip_whitespace();
        let start = self.pos;
        while matches!(self.current_char(), Some(c) if !c.is_whitespace() && c != ';') {
            self.advance();
        }
        &self.text[start..self.pos]
    }

    fn read_string(&mut self) -> Result<&'a str, ListingError> {
        self.expect('"')?;
        let start = self.pos;
        while let Some(ch) = self.current_char() {
            if ch == '"' {
                let s = &self.text[start..self.pos];
                self.advance();
                return Ok(s);
            }
            self.advance();
        }
        Err(self.error("unterminated string"))
    }

    fn expect_end(&mut self) -> Result<(), ListingError> {
        self.skip_whitespace();
        if !self.is_eof() {
            return Err(self.error(format!(
                "unexpected trailing text '{}'",
                self.text[self.pos..].trim_end()
            )));
        }
        Ok(())
    }

    /// `def NAME(PARAMS) [in "FILE"]:`; the `def` keyword is already consumed.
    fn parse_header(&mut self) -> Result<FunctionCode, ListingError> {
        let name = self.read_identifier()?;
        self.expect('(')?;
        let mut params = Vec::new();
        if !self.try_read(')') {
            loop {
                let param = self.read_identifier()?;
                if params.contains(&param) {
                    return Err(self.error(format!("duplicate parameter '{param}'")));
                }
                params.push(param);
                if self.try_read(')') {
                    break;
                }
                self.expect(',')?;
            }
        }
        let file = if self.try_keyword("in") {
            self.read_string()?
        } else {
            "<listing>"
        };
        self.expect(':')?;
        self.expect_end()?;
        Ok(FunctionCode::new(name, &params, file))
    }

    /// `global NAME = LITERAL`; the `global` keyword is already consumed.
    fn parse_global(&mut self) -> Result<(String, Scalar), ListingError> {
        let name = self.read_identifier()?;
        self.expect('=')?;
        let word = self.read_word();
        let value = match Scalar::parse(word) {
            Some(Scalar::None) | None => {
                return Err(self.error(format!("invalid initial value '{word}'")))
            }
            Some(value) => value,
        };
        self.expect_end()?;
        Ok((name.to_string(), value))
    }

    /// Skip a parenthesised annotation such as `(x)` or `(to 28)`.
    fn skip_annotation(&mut self) -> Result<(), ListingError> {
        if !self.try_read('(') {
            return Ok(());
        }
        while let Some(ch) = self.current_char() {
            self.advance();
            if ch == ')' {
                return Ok(());
            }
        }
        Err(self.error("unterminated annotation"))
    }

    /// A name, either bare or in the `index (name)` form.
    fn read_name_operand(&mut self) -> Result<String, ListingError> {
        self.skip_whitespace();
        if !self.current_char().is_some_and(|c| c.is_ascii_digit()) {
            return Ok(self.read_identifier()?.to_string());
        }
        self.read_number()?;
        self.expect('(')?;
        let name = self.read_identifier()?;
        self.expect(')')?;
        Ok(name.to_string())
    }

    fn parse_instruction(
        &mut self,
        code: &mut FunctionCode,
        line: &mut u32,
    ) -> Result<(), ListingError> {
        self.try_read('>');
        self.try_read('>');
        let first = self.read_number()?;
        self.skip_whitespace();
        let offset = if self.current_char().is_some_and(|c| c.is_ascii_digit() || c == '>') {
            *line = first;
            self.try_read('>');
            self.try_read('>');
            self.read_number()?
        } else {
            first
        };

        if let Some(last) = code.instrs.last() {
            if offset <= last.offset {
                return Err(self.error(format!(
                    "offset {offset} does not follow offset {}",
                    last.offset
                )));
            }
        }

        let name = self.read_identifier()?;
        let op = Opcode::from_name(name)
            .ok_or_else(|| self.error(format!("unknown opcode {name}")))?;
        let operand = self.parse_operand(op)?;
        self.expect_end()?;

        code.instrs.push(RawInstr {
            offset,
            op,
            operand,
            loc: SourceLoc::new(Arc::clone(&code.file), *line),
        });
        Ok(())
    }

    fn parse_operand(&mut self, op: Opcode) -> Result<Operand, ListingError> {
        let operand = match op.info().operand {
            OperandKind::None => Operand::None,
            OperandKind::Const => {
                let word = self.read_word();
                let value = Scalar::parse(word)
                    .ok_or_else(|| self.error(format!("invalid constant '{word}'")))?;
                Operand::Const(value)
            }
            OperandKind::Name => Operand::Name(self.read_name_operand()?),
            OperandKind::JumpAbsolute | OperandKind::JumpRelative => {
                let label = self.read_number()?;
                self.skip_annotation()?;
                Operand::Jump(label)
            }
            OperandKind::Count => Operand::Count(self.read_number()?),
            OperandKind::Compare => {
                let word = self.read_word();
                let cmp = CmpOp::from_symbol(word)
                    .ok_or_else(|| self.error(format!("invalid comparison '{word}'")))?;
                Operand::Compare(cmp)
            }
            OperandKind::Raw => {
                self.skip_whitespace();
                let rest = self.text[self.pos..].split(';').next().unwrap_or("");
                self.pos += rest.len();
                Operand::Raw(rest.trim().to_string())
            }
        };
        Ok(operand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD: &str = r#"
; two functions in one listing
def add(a, b) in "basicmath.py":
  3      0 LOAD_FAST          a
         2 LOAD_FAST          b   ; rhs
         4 BINARY_ADD
         6 RETURN_VALUE

def cmp(x):
  7      0 LOAD_FAST          x
         2 LOAD_CONST         2.5
         4 COMPARE_OP         <=
  8 >>   6 RETURN_VALUE
"#;

    #[test]
    fn test_parse_functions() {
        let listing = parse_listing(ADD).unwrap();
        assert_eq!(listing.functions.len(), 2);

        let add = listing.function("add").unwrap();
        assert_eq!(add.signature.params, vec!["a", "b"]);
        assert_eq!(add.instrs.len(), 4);
        assert_eq!(add.instrs[1].operand, Operand::Name("b".into()));
        assert_eq!(add.instrs[2].op, Opcode::BinaryAdd);
        assert_eq!(add.instrs[3].loc.to_string(), "basicmath.py:3");

        let cmp = listing.function("cmp").unwrap();
        assert_eq!(&*cmp.file, "<listing>");
        assert_eq!(cmp.instrs[1].operand, Operand::Const(Scalar::Float(2.5)));
        assert_eq!(cmp.instrs[2].operand, Operand::Compare(CmpOp::Le));
        assert_eq!(cmp.instrs[3].offset, 6);
        assert_eq!(cmp.instrs[3].loc.line, 8);
    }

    #[test]
    fn test_unknown_opcode_reports_line() {
        let text = "def f():\n  1 0 LOAD_CONST 1\n    2 FROBNICATE\n";
        let err = parse_listing(text).unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("FROBNICATE"));
    }

    #[test]
    fn test_recognised_opcode_keeps_raw_operand() {
        let text = "def f(x):\n  1 0 LOAD_FAST x\n    2 LOAD_ATTR 0 (real)\n    4 RETURN_VALUE\n";
        let listing = parse_listing(text).unwrap();
        let f = &listing.functions[0];
        assert_eq!(f.instrs[1].op, Opcode::LoadAttr);
        assert_eq!(f.instrs[1].operand, Operand::Raw("0 (real)".into()));
    }

    #[test]
    fn test_dis_operand_forms() {
        let text = r#"
global limit = 3

def f(x):
  1      0 LOAD_GLOBAL        0 (range)
         2 LOAD_FAST          0 (x)
         4 CALL_FUNCTION      1
         6 GET_ITER
    >>   8 FOR_ITER           4 (to 14)
        10 STORE_GLOBAL       1 (limit)
        12 JUMP_ABSOLUTE      8
    >>  14 LOAD_CONST         None
        16 RETURN_VALUE

global scale = 0.5
"#;
        let listing = parse_listing(text).unwrap();
        assert_eq!(listing.globals, vec![
            ("limit".to_string(), Scalar::Int(3)),
            ("scale".to_string(), Scalar::Float(0.5)),
        ]);
        assert_eq!(listing.global("scale"), Some(Scalar::Float(0.5)));

        let f = listing.function("f").unwrap();
        assert_eq!(f.instrs.len(), 9);
        assert_eq!(f.instrs[0].operand, Operand::Name("range".into()));
        assert_eq!(f.instrs[1].operand, Operand::Name("x".into()));
        assert_eq!(f.instrs[2].operand, Operand::Count(1));
        assert_eq!(f.instrs[4].operand, Operand::Jump(4));
        assert_eq!(f.instrs[5].operand, Operand::Name("limit".into()));
    }

    #[test]
    fn test_malformed_globals() {
        let none = "global g = None\n";
        assert!(parse_listing(none).unwrap_err().message.contains("initial value"));

        let twice = "global g = 1\nglobal g = 2\n";
        assert_eq!(parse_listing(twice).unwrap_err().line, 2);

        let open = "def f():\n  1 0 JUMP_FORWARD 0 (to 2\n";
        assert!(parse_listing(open).unwrap_err().message.contains("unterminated"));
    }

    #[test]
    fn test_malformed_lines() {
        let missing_operand = "def f(x):\n  1 0 LOAD_FAST\n";
        assert_eq!(parse_listing(missing_operand).unwrap_err().line, 2);

        let bad_constant = "def f():\n  1 0 LOAD_CONST one\n";
        assert!(parse_listing(bad_constant)
            .unwrap_err()
            .message
            .contains("invalid constant"));

        let outside = "  0 RETURN_VALUE\n";
        assert_eq!(parse_listing(outside).unwrap_err().line, 1);

        let backwards = "def f():\n  1 4 NOP\n    2 NOP\n";
        assert!(parse_listing(backwards).unwrap_err().message.contains("offset"));

        let trailing = "def f():\n  1 0 RETURN_VALUE extra\n";
        assert!(parse_listing(trailing).unwrap_err().message.contains("trailing"));

        let empty = "def f():\n";
        assert!(parse_listing(empty).unwrap_err().message.contains("no instructions"));
    }
}
