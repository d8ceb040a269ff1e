//! A1 address algebra.
//!
//! Columns are 0-based internally (0 = A, 25 = Z, 26 = AA); rows are 0-based
//! internally and 1-based on the wire, as everywhere else in the workspace.

/// A parsed rectangular range, 0-indexed, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeAddr {
    pub start_row: usize,
    pub start_col: usize,
    pub end_row: usize,
    pub end_col: usize,
}

/// Failure to parse an A1 range address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrParseError {
    pub input: String,
}

impl std::fmt::Display for AddrParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid range address: {:?}", self.input)
    }
}

impl std::error::Error for AddrParseError {}

/// Convert 0-based column index to Excel-style letter(s).
pub fn col_to_letters(col: usize) -> String {
    let mut result = String::new();
    let mut n = col;
    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    result
}

/// Convert column letters to a 0-based index (A=0, Z=25, AA=26).
/// Case-insensitive. `None` for empty or non-alphabetic input, or for a
/// label too long to fit in `usize` (labels arrive on the wire untrusted).
pub fn letters_to_col(label: &str) -> Option<usize> {
    if label.is_empty() {
        return None;
    }
    let mut col: usize = 0;
    for c in label.chars() {
        let c = c.to_ascii_uppercase();
        if !c.is_ascii_uppercase() {
            return None;
        }
        col = col
            .checked_mul(26)?
            .checked_add(c as usize - 'A' as usize + 1)?;
    }
    Some(col - 1)
}

/// Format a cell reference in A1 notation (row and col 0-indexed).
pub fn cell_ref(row: usize, col: usize) -> String {
    format!("{}{}", col_to_letters(col), row + 1)
}

/// Format a range in A1 notation; single-cell ranges collapse to one ref.
pub fn range_ref(start_row: usize, start_col: usize, end_row: usize, end_col: usize) -> String {
    if start_row == end_row && start_col == end_col {
        cell_ref(start_row, start_col)
    } else {
        format!("{}:{}", cell_ref(start_row, start_col), cell_ref(end_row, end_col))
    }
}

/// Parse a cell reference like "A1" or "AA100" into (row, col), 0-indexed.
fn parse_cell(s: &str) -> Option<(usize, usize)> {
    let mut col_str = String::new();
    let mut row_str = String::new();

    for c in s.chars() {
        if c.is_ascii_alphabetic() && row_str.is_empty() {
            col_str.push(c);
        } else if c.is_ascii_digit() {
            row_str.push(c);
        } else {
            return None;
        }
    }

    if col_str.is_empty() || row_str.is_empty() {
        return None;
    }

    let col = letters_to_col(&col_str)?;
    let row: usize = row_str.parse().ok()?;
    if row == 0 {
        return None;
    }

    Some((row - 1, col))
}

/// Parse a range address in A1 notation.
///
/// An optional sheet qualifier terminated by `!` (e.g., "Sheet1!B2:C4") is
/// stripped and ignored. Accepts a single cell ("B2") or a rectangle
/// ("B2:C4"); a single cell normalizes to start == end.
pub fn parse_range(addr: &str) -> Result<RangeAddr, AddrParseError> {
    let err = || AddrParseError { input: addr.to_string() };

    // Strip sheet qualifier (quoted sheet names may contain '!', so split
    // on the last one).
    let rest = match addr.rfind('!') {
        Some(idx) => &addr[idx + 1..],
        None => addr,
    };
    let rest = rest.trim();

    if let Some(colon_idx) = rest.find(':') {
        let (sr, sc) = parse_cell(&rest[..colon_idx]).ok_or_else(err)?;
        let (er, ec) = parse_cell(&rest[colon_idx + 1..]).ok_or_else(err)?;
        Ok(RangeAddr {
            start_row: sr.min(er),
            start_col: sc.min(ec),
            end_row: sr.max(er),
            end_col: sc.max(ec),
        })
    } else {
        let (r, c) = parse_cell(rest).ok_or_else(err)?;
        Ok(RangeAddr { start_row: r, start_col: c, end_row: r, end_col: c })
    }
}
