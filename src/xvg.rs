use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::iter;
use std::path::Path;

#[derive(Debug)]
pub enum XvgParsingError {
    Io { line_number: usize, source: io::Error },
    InvalidNumber { line_number: usize, token: String },
    RaggedRow { line_number: usize, expected: usize, found: usize },
}

impl XvgParsingError {
    pub fn line_number(&self) -> usize {
        match self {
            Self::Io { line_number, .. }
            | Self::InvalidNumber { line_number, .. }
            | Self::RaggedRow { line_number, .. } => *line_number,
        }
    }
}

impl std::fmt::Display for XvgParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { line_number, source } => write!(f, "line {line_number}: {source}"),
            Self::InvalidNumber { line_number, token } => {
                write!(f, "line {line_number}: invalid number {token:?}")
            }
            Self::RaggedRow { line_number, expected, found } => {
                write!(f, "line {line_number}: expected {expected} columns, found {found}")
            }
        }
    }
}

impl std::error::Error for XvgParsingError {}

/// Numeric body of a GROMACS XVG file, with `#` comments and `@` directives dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Xvg {
    rows: Vec<Vec<f64>>,
}

impl Xvg {
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Reading {}", path.to_string_lossy()))?;
        let xvg = Self::from_lines(BufReader::new(file).lines())
            .with_context(|| format!("Parsing {}", path.to_string_lossy()))?;
        Ok(xvg)
    }

    pub fn from_lines(
        lines: impl IntoIterator<Item = io::Result<String>>,
    ) -> Result<Self, XvgParsingError> {
        let mut rows: Vec<Vec<f64>> = Vec::new();
        for (line_number, line) in iter::zip(1.., lines) {
            let line = line.map_err(|source| XvgParsingError::Io { line_number, source })?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
                continue;
            }
            let row = line
                .split_whitespace()
                .map(|token| {
                    token.parse::<f64>().map_err(|_| XvgParsingError::InvalidNumber {
                        line_number,
                        token: token.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(first) = rows.first() {
                if first.len() != row.len() {
                    return Err(XvgParsingError::RaggedRow {
                        line_number,
                        expected: first.len(),
                        found: row.len(),
                    });
                }
            }
            rows.push(row);
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn columns_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn column(&self, j: usize) -> Option<Vec<f64>> {
        if j >= self.columns_count() {
            return None;
        }
        Some(self.rows.iter().map(|row| row[j]).collect())
    }

    #[inline]
    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        self.rows.get(row).and_then(|r| r.get(col)).copied()
    }
}
