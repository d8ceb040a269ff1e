//! Cap-table plan compiler.
//!
//! Turns round parameters, sheet data, and a selected input range into an
//! ordered batch of `ActionOp`s anchored two columns right of the selection.
//! The totals row is emitted as spreadsheet formulas over the data-row range,
//! so totals stay live if the consumer edits individual cells afterward.

use capsheet_protocol::{ActionOp, PlanResult};
use serde_json::json;

use crate::addr::{cell_ref, parse_range, range_ref, AddrParseError};
use crate::captable::{compute, RoundParams};
use crate::rows::{parse_rows, ColumnMapping};

/// Monotone op-id sequence, unique within one batch.
struct OpIds {
    next: usize,
}

impl OpIds {
    fn new() -> Self {
        OpIds { next: 1 }
    }

    fn next(&mut self) -> String {
        let id = format!("op-{}", self.next);
        self.next += 1;
        id
    }
}

/// Compile the full plan.
///
/// A selected range that does not parse aborts compilation: no partial op
/// batch is ever produced.
pub fn compile_plan(
    params: &RoundParams,
    sheet: &[Vec<String>],
    mapping: ColumnMapping,
    selected_range: &str,
) -> Result<PlanResult, AddrParseError> {
    let range = parse_range(selected_range)?;

    let mapping = mapping.or_default_layout();
    let (rows, mut diagnostics) = parse_rows(sheet, mapping);
    let table = compute(params, &rows);

    if rows.is_empty() {
        diagnostics.push("no investor rows recovered from sheet".to_string());
    }

    // Output block anchor: two columns right of the selection, same top row.
    let col = range.end_col + 2;
    let row = range.start_row;

    let mut ids = OpIds::new();
    let mut ops = Vec::new();

    // Group 1: round-input echo block (amount and pre-money in millions).
    ops.push(ActionOp {
        id: ids.next(),
        range: range_ref(row, col, row + 3, col + 1),
        kind: capsheet_protocol::OpKind::Write,
        values: Some(vec![
            vec![json!("Round Type"), json!(params.round_type)],
            vec![json!("Amount ($M)"), json!(params.amount / 1_000_000.0)],
            vec![json!("Pre-Money ($M)"), json!(params.pre_money / 1_000_000.0)],
            vec![json!("Option Pool (%)"), json!(params.pool_pct)],
        ]),
        formula: None,
        color: None,
        note: Some("Round inputs".to_string()),
    });

    // Group 2: computed metrics.
    ops.push(ActionOp {
        id: ids.next(),
        range: range_ref(row + 5, col, row + 6, col + 1),
        kind: capsheet_protocol::OpKind::Write,
        values: Some(vec![
            vec![json!("Post-Money ($M)"), json!(table.post_money / 1_000_000.0)],
            vec![json!("Price Per Share"), json!(table.price_per_share)],
        ]),
        formula: None,
        color: None,
        note: Some("Computed metrics".to_string()),
    });

    // Group 3: cap-table block.
    let header_row = row + 8;
    ops.push(ActionOp {
        id: ids.next(),
        range: range_ref(header_row, col, header_row, col + 3),
        kind: capsheet_protocol::OpKind::Write,
        values: Some(vec![vec![
            json!("Shareholder"),
            json!("Invested"),
            json!("Shares"),
            json!("Ownership"),
        ]]),
        formula: None,
        color: None,
        note: Some("Cap table header".to_string()),
    });

    let first_data_row = header_row + 1;
    for (i, holding) in table.holdings.iter().enumerate() {
        let r = first_data_row + i;
        ops.push(ActionOp {
            id: ids.next(),
            range: range_ref(r, col, r, col + 3),
            kind: capsheet_protocol::OpKind::Write,
            values: Some(vec![vec![
                json!(holding.name),
                json!(holding.investment),
                json!(holding.final_shares),
                json!(holding.ownership),
            ]]),
            formula: None,
            color: None,
            note: Some(format!("Cap table row: {}", holding.name)),
        });
    }

    // Group 4: totals row as aggregate formulas over the data-row range.
    let last_data_row = first_data_row + table.holdings.len() - 1;
    let totals_row = last_data_row + 1;
    ops.push(ActionOp::write_cell(
        ids.next(),
        cell_ref(totals_row, col),
        json!("Total"),
        "Totals label",
    ));
    for offset in 1..=3 {
        let c = col + offset;
        ops.push(ActionOp::formula_cell(
            ids.next(),
            cell_ref(totals_row, c),
            format!(
                "=SUM({})",
                range_ref(first_data_row, c, last_data_row, c)
            ),
            "Totals",
        ));
    }

    Ok(PlanResult { ops, diagnostics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use capsheet_protocol::OpKind;
    use std::collections::HashSet;

    fn params() -> RoundParams {
        RoundParams {
            round_type: "Series A".to_string(),
            amount: 5_000_000.0,
            pre_money: 20_000_000.0,
            pool_pct: 10.0,
        }
    }

    fn sheet() -> Vec<Vec<String>> {
        vec![
            vec!["Founders".to_string(), "8000000".to_string(), "$2,000,000".to_string()],
        ]
    }

    fn full_mapping() -> ColumnMapping {
        ColumnMapping { name_col: Some(0), shares_col: Some(1), invested_col: Some(2) }
    }

    #[test]
    fn test_anchor_two_right_of_selection() {
        // C is column index 2; +2 = 4 = E, top row stays 2
        let plan = compile_plan(&params(), &sheet(), full_mapping(), "Sheet1!B2:C4").unwrap();
        assert!(plan.ops[0].range.starts_with("E2"), "got {}", plan.ops[0].range);
    }

    #[test]
    fn test_bad_range_aborts_with_no_ops() {
        let err = compile_plan(&params(), &sheet(), full_mapping(), "not a range");
        assert!(err.is_err());
    }

    #[test]
    fn test_op_ids_unique_and_monotone() {
        let plan = compile_plan(&params(), &sheet(), full_mapping(), "A1:C3").unwrap();
        let ids: HashSet<&str> = plan.ops.iter().map(|op| op.id.as_str()).collect();
        assert_eq!(ids.len(), plan.ops.len());
        assert_eq!(plan.ops[0].id, "op-1");
        assert_eq!(plan.ops[1].id, "op-2");
    }

    #[test]
    fn test_group_order_and_totals_formulas() {
        let plan = compile_plan(&params(), &sheet(), full_mapping(), "A1:C3").unwrap();

        // echo, metrics, header, 3 data rows (1 investor + 2 synthetic),
        // totals label, 3 totals formulas
        assert_eq!(plan.ops.len(), 10);
        assert_eq!(plan.ops[0].note.as_deref(), Some("Round inputs"));
        assert_eq!(plan.ops[1].note.as_deref(), Some("Computed metrics"));
        assert_eq!(plan.ops[2].note.as_deref(), Some("Cap table header"));

        let formulas: Vec<&ActionOp> =
            plan.ops.iter().filter(|op| op.kind == OpKind::Formula).collect();
        assert_eq!(formulas.len(), 3);
        // Data rows are at sheet rows 10..12 (anchor row 1, header at row 9);
        // totals must reference the emitted data-row range, not literals.
        assert_eq!(formulas[0].formula.as_deref(), Some("=SUM(F10:F12)"));
        assert_eq!(formulas[1].formula.as_deref(), Some("=SUM(G10:G12)"));
        assert_eq!(formulas[2].formula.as_deref(), Some("=SUM(H10:H12)"));
    }

    #[test]
    fn test_echo_block_in_millions() {
        let plan = compile_plan(&params(), &sheet(), full_mapping(), "A1").unwrap();
        let echo = plan.ops[0].values.as_ref().unwrap();
        assert_eq!(echo[1][1], serde_json::json!(5.0));
        assert_eq!(echo[2][1], serde_json::json!(20.0));
        assert_eq!(echo[3][1], serde_json::json!(10.0));
    }

    #[test]
    fn test_empty_sheet_still_compiles_with_diagnostic() {
        let plan = compile_plan(&params(), &[], full_mapping(), "A1:B2").unwrap();
        // Synthetic rows still emitted; diagnostics flag the empty input
        assert!(plan.ops.len() > 4);
        assert!(plan
            .diagnostics
            .iter()
            .any(|d| d.contains("no investor rows")));
    }
}
