//! Investor row extraction.
//!
//! Resolves the oracle's column-role answer against raw sheet rows. Recovery
//! is per-cell and per-row: a bad number becomes 0 with a diagnostic, a row
//! without a usable name is skipped, and an out-of-range column index is the
//! same as no index at all.

use serde::{Deserialize, Serialize};

/// Which sheet columns hold which role, as inferred by the oracle.
///
/// Indices are 0-based. `None` means the role could not be identified.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub name_col: Option<usize>,
    pub shares_col: Option<usize>,
    pub invested_col: Option<usize>,
}

impl ColumnMapping {
    /// The fallback when the oracle gave no usable answer: name in the first
    /// column, shares in the second, investment unknown.
    pub fn default_layout() -> Self {
        ColumnMapping { name_col: Some(0), shares_col: Some(1), invested_col: None }
    }

    /// Fill unmapped name/shares roles from the default layout.
    /// An unmapped investment column stays absent.
    pub fn or_default_layout(self) -> Self {
        ColumnMapping {
            name_col: self.name_col.or(Some(0)),
            shares_col: self.shares_col.or(Some(1)),
            invested_col: self.invested_col,
        }
    }
}

/// One shareholder recovered from the sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct InvestorRow {
    pub name: String,
    pub pre_round_shares: f64,
    pub pre_round_investment: f64,
}

/// Look up a cell by mapped column, treating out-of-range as absent.
fn cell<'a>(row: &'a [String], col: Option<usize>) -> Option<&'a str> {
    let idx = col?;
    row.get(idx).map(|s| s.as_str())
}

/// Coerce a sheet cell to a number: strip currency symbols, grouping
/// separators, and whitespace before parsing.
pub fn coerce_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | '€' | '£' | ',' | '_' | ' ' | '\u{a0}'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    // f64::parse accepts "inf"/"NaN"; those would poison every total
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Extract investor rows from raw sheet data.
///
/// Never fails: unusable rows or cells are dropped/zeroed with a diagnostic
/// and the rest of the batch continues.
pub fn parse_rows(sheet: &[Vec<String>], mapping: ColumnMapping) -> (Vec<InvestorRow>, Vec<String>) {
    let mut rows = Vec::new();
    let mut diagnostics = Vec::new();

    for (i, raw) in sheet.iter().enumerate() {
        let name = match cell(raw, mapping.name_col) {
            Some(n) if !n.trim().is_empty() => n.trim().to_string(),
            _ => {
                diagnostics.push(format!("row {}: no usable name cell, skipped", i + 1));
                continue;
            }
        };

        let shares = match cell(raw, mapping.shares_col) {
            Some(s) if !s.trim().is_empty() => match coerce_number(s) {
                Some(v) if v >= 0.0 => v,
                _ => {
                    diagnostics.push(format!("row {}: unparsable share count {:?}, using 0", i + 1, s));
                    0.0
                }
            },
            _ => 0.0,
        };

        // Header rows land here with shares 0 and a diagnostic; they do not
        // perturb the totals.
        let investment = match cell(raw, mapping.invested_col) {
            Some(s) if !s.trim().is_empty() => match coerce_number(s) {
                Some(v) if v >= 0.0 => v,
                _ => {
                    diagnostics.push(format!("row {}: unparsable investment {:?}, using 0", i + 1, s));
                    0.0
                }
            },
            _ => 0.0,
        };

        rows.push(InvestorRow { name, pre_round_shares: shares, pre_round_investment: investment });
    }

    (rows, diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_coerce_number() {
        assert_eq!(coerce_number("8000000"), Some(8_000_000.0));
        assert_eq!(coerce_number("$2,000,000"), Some(2_000_000.0));
        assert_eq!(coerce_number("€1 500"), Some(1_500.0));
        assert_eq!(coerce_number("1_000.5"), Some(1_000.5));
        assert_eq!(coerce_number("n/a"), None);
        assert_eq!(coerce_number(""), None);
    }

    #[test]
    fn test_non_finite_values_rejected() {
        assert_eq!(coerce_number("inf"), None);
        assert_eq!(coerce_number("-inf"), None);
        assert_eq!(coerce_number("NaN"), None);

        // An "inf" share cell zeroes that row instead of poisoning totals
        let data = sheet(&[&["Alice", "inf"], &["Bob", "300"]]);
        let (rows, diags) = parse_rows(&data, ColumnMapping::default_layout());
        assert_eq!(rows[0].pre_round_shares, 0.0);
        assert_eq!(rows[1].pre_round_shares, 300.0);
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_parse_rows_basic() {
        let data = sheet(&[
            &["Founders", "8000000", "$2,000,000"],
            &["Angels", "1000000", "500000"],
        ]);
        let mapping = ColumnMapping { name_col: Some(0), shares_col: Some(1), invested_col: Some(2) };
        let (rows, diags) = parse_rows(&data, mapping);
        assert_eq!(rows.len(), 2);
        assert!(diags.is_empty());
        assert_eq!(rows[0].pre_round_shares, 8_000_000.0);
        assert_eq!(rows[0].pre_round_investment, 2_000_000.0);
    }

    #[test]
    fn test_row_without_name_skipped() {
        let data = sheet(&[&["", "100"], &["Alice", "200"]]);
        let (rows, diags) = parse_rows(&data, ColumnMapping::default_layout());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Alice");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].contains("row 1"));
    }

    #[test]
    fn test_bad_number_zeroed_not_fatal() {
        let data = sheet(&[&["Alice", "lots"], &["Bob", "300"]]);
        let (rows, diags) = parse_rows(&data, ColumnMapping::default_layout());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].pre_round_shares, 0.0);
        assert_eq!(rows[1].pre_round_shares, 300.0);
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn test_out_of_range_index_treated_as_absent() {
        let data = sheet(&[&["Alice", "100"]]);
        let mapping = ColumnMapping { name_col: Some(0), shares_col: Some(9), invested_col: Some(9) };
        let (rows, diags) = parse_rows(&data, mapping);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].pre_round_shares, 0.0);
        assert_eq!(rows[0].pre_round_investment, 0.0);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_or_default_layout() {
        let partial = ColumnMapping { name_col: None, shares_col: Some(3), invested_col: None };
        let filled = partial.or_default_layout();
        assert_eq!(filled.name_col, Some(0));
        assert_eq!(filled.shares_col, Some(3));
        assert_eq!(filled.invested_col, None);
    }
}
