//! Start sector expressions.
//!
//! Program and patch scripts address sectors relative to the end of the
//! disk, e.g. `NUM_DISK_SECTORS-34.`. The expression is kept verbatim while
//! loading and resolved here once the disk size is known.

use thiserror::Error;

use crate::protocol::constants::NUM_DISK_SECTORS;

/// Deepest parenthesis nesting accepted.
pub const MAX_NESTING: usize = 64;

/// What is known about the target storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    pub num_disk_sectors: Option<u64>,
}

impl Geometry {
    pub fn with_disk_sectors(num_disk_sectors: u64) -> Self {
        Self {
            num_disk_sectors: Some(num_disk_sectors),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SectorExprError {
    #[error("Empty start sector expression")]
    Empty,
    #[error("Unexpected character {ch:?} at position {pos}")]
    UnexpectedChar { pos: usize, ch: char },
    #[error("Expression ends unexpectedly")]
    UnexpectedEnd,
    #[error("Unknown identifier {0}")]
    UnknownIdentifier(String),
    #[error("Disk size unknown, cannot resolve NUM_DISK_SECTORS")]
    UnknownGeometry,
    #[error("Arithmetic overflow")]
    Overflow,
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Expression evaluates to a negative sector {0}")]
    Negative(i128),
    #[error("Parentheses nested deeper than {}", MAX_NESTING)]
    TooDeep,
}

/// Resolve `expr` to an absolute sector.
pub fn resolve_start_sector(expr: &str, geometry: &Geometry) -> Result<u64, SectorExprError> {
    let value = Parser::new(expr, geometry, false).parse()?;
    u64::try_from(value).map_err(|_| {
        if value < 0 {
            SectorExprError::Negative(value)
        } else {
            SectorExprError::Overflow
        }
    })
}

/// Check `expr` without knowing the disk size.
///
/// Plain expressions are fully evaluated. Symbolic ones are only checked for
/// syntax, since their value depends on the target.
pub fn check_start_sector(expr: &str) -> Result<(), SectorExprError> {
    if is_symbolic(expr) {
        Parser::new(expr, &Geometry::default(), true).parse()?;
    } else {
        resolve_start_sector(expr, &Geometry::default())?;
    }
    Ok(())
}

/// Whether the expression mentions the disk size placeholder.
pub fn is_symbolic(expr: &str) -> bool {
    expr.contains(NUM_DISK_SECTORS)
}

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
    geometry: &'a Geometry,
    /// Syntax only: the placeholder reads as 1 and arithmetic never fails.
    syntax_only: bool,
}

impl<'a> Parser<'a> {
    fn new(expr: &'a str, geometry: &'a Geometry, syntax_only: bool) -> Self {
        Self {
            input: expr.as_bytes(),
            pos: 0,
            depth: 0,
            geometry,
            syntax_only,
        }
    }

    fn parse(&mut self) -> Result<i128, SectorExprError> {
        self.skip_ws();
        if self.peek().is_none() {
            return Err(SectorExprError::Empty);
        }
        let value = self.expr()?;
        self.skip_ws();
        if let Some(ch) = self.peek() {
            return Err(SectorExprError::UnexpectedChar {
                pos: self.pos,
                ch: ch as char,
            });
        }
        Ok(value)
    }

    fn checked(&self, value: Option<i128>, err: SectorExprError) -> Result<i128, SectorExprError> {
        match value {
            Some(v) => Ok(v),
            None if self.syntax_only => Ok(0),
            None => Err(err),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expr(&mut self) -> Result<i128, SectorExprError> {
        let mut acc = self.term()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    let rhs = self.term()?;
                    acc = self.checked(acc.checked_add(rhs), SectorExprError::Overflow)?;
                }
                Some(b'-') => {
                    self.pos += 1;
                    let rhs = self.term()?;
                    acc = self.checked(acc.checked_sub(rhs), SectorExprError::Overflow)?;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn term(&mut self) -> Result<i128, SectorExprError> {
        let mut acc = self.factor()?;
        loop {
            self.skip_ws();
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    let rhs = self.factor()?;
                    acc = self.checked(acc.checked_mul(rhs), SectorExprError::Overflow)?;
                }
                Some(b'/') => {
                    self.pos += 1;
                    let rhs = self.factor()?;
                    acc = self.checked(acc.checked_div(rhs), SectorExprError::DivisionByZero)?;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn factor(&mut self) -> Result<i128, SectorExprError> {
        self.skip_ws();
        match self.peek() {
            None => Err(SectorExprError::UnexpectedEnd),
            Some(b'(') => {
                if self.depth == MAX_NESTING {
                    return Err(SectorExprError::TooDeep);
                }
                self.pos += 1;
                self.depth += 1;
                let value = self.expr()?;
                self.depth -= 1;
                self.skip_ws();
                match self.peek() {
                    Some(b')') => {
                        self.pos += 1;
                        Ok(value)
                    }
                    Some(ch) => Err(SectorExprError::UnexpectedChar {
                        pos: self.pos,
                        ch: ch as char,
                    }),
                    None => Err(SectorExprError::UnexpectedEnd),
                }
            }
            Some(c) if c.is_ascii_digit() => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => self.identifier(),
            Some(ch) => Err(SectorExprError::UnexpectedChar {
                pos: self.pos,
                ch: ch as char,
            }),
        }
    }

    fn number(&mut self) -> Result<i128, SectorExprError> {
        let mut value: i128 = 0;
        while let Some(c) = self.peek().filter(u8::is_ascii_digit) {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(i128::from(c - b'0')))
                .ok_or(SectorExprError::Overflow)?;
            self.pos += 1;
        }
        // Scripts write integers with a trailing dot ("34.").
        if self.peek() == Some(b'.') {
            self.pos += 1;
        }
        Ok(value)
    }

    fn identifier(&mut self) -> Result<i128, SectorExprError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.pos += 1;
        }
        let name = String::from_utf8_lossy(&self.input[start..self.pos]).into_owned();
        if name != NUM_DISK_SECTORS {
            return Err(SectorExprError::UnknownIdentifier(name));
        }
        if self.syntax_only {
            return Ok(1);
        }
        self.geometry
            .num_disk_sectors
            .map(i128::from)
            .ok_or(SectorExprError::UnknownGeometry)
    }
}
