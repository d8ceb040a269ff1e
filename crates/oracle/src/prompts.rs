//! Prompt builders for the three oracle tasks.
//!
//! Every prompt demands JSON-only output; the recovery interpreter in
//! [`crate::extract`] copes with the model taking liberties anyway.

use capsheet_protocol::SlotValues;

/// Prompt for extracting round-parameter slots from the latest user message.
///
/// `priority_slot` is the slot the assistant just asked about; a bare answer
/// like "10" belongs to it rather than whatever the model guesses from
/// history.
pub fn slot_extraction_prompt(
    slots: &SlotValues,
    history: &str,
    latest_message: &str,
    priority_slot: Option<&str>,
) -> String {
    let slots_json = serde_json::to_string_pretty(slots).unwrap_or_else(|_| "{}".to_string());
    let priority_line = match priority_slot {
        Some(slot) => format!(
            "\nThe assistant just asked the user for '{slot}'. If the LATEST message is a bare value with no slot named, it answers '{slot}'.\n"
        ),
        None => String::new(),
    };
    format!(
        r#"You are a JSON generation machine.
Your ONLY task is to extract slot values from the LATEST user message and return a valid JSON object.
Do NOT include any explanations, greetings, or conversational text.
Your response MUST start with {{ and end with }}.

The slots to extract are: roundType, amount, preMoney, poolPct.

Current Slots:
{slots_json}

Conversation History:
{history}
{priority_line}
LATEST User Message: "{latest_message}"

INSTRUCTIONS:
1. Analyze ONLY the LATEST user message.
2. Extract values EXPLICITLY mentioned. DO NOT GUESS.
3. For 'amount' and 'preMoney', extract the numeric value (e.g., 5000000).
4. For 'poolPct', extract the numeric value (e.g., 10).
5. Return ONLY the JSON object.
6. If no new information is found, return an empty JSON object: {{}}.

Example 1 (User says "$5M"):
{{"amount": 5000000}}

Example 2 (User says "Series A"):
{{"roundType": "Series A"}}

Example 3 (User says "hello"):
{{}}

Generate the JSON output based ONLY on the LATEST User Message."#
    )
}

/// Prompt for identifying which sheet columns hold which cap-table role.
///
/// `sample` is a small plain-text rendering of the selected rows, one row per
/// line with cells separated by " | ".
pub fn column_mapping_prompt(sample: &str) -> String {
    format!(
        r#"You are a JSON generation machine analyzing a spreadsheet cap table.
Given sample rows from the sheet, identify which 0-based column index holds each role.
Your response MUST be a single JSON object and nothing else.

Sample rows (one per line, cells separated by " | "):
{sample}

Return this exact structure:
{{
  "column_mapping": {{
    "shareholder_name_col_idx": <0-based index or null>,
    "pre_round_shares_col_idx": <0-based index or null>,
    "pre_round_investment_col_idx": <0-based index or null>
  }}
}}

INSTRUCTIONS:
1. "shareholder_name_col_idx": the column with shareholder/investor names.
2. "pre_round_shares_col_idx": the column with pre-round share counts.
3. "pre_round_investment_col_idx": the column with amounts invested so far. Use null if no such column exists.
4. Use null for any role you cannot identify. DO NOT GUESS.
5. Output ONLY the JSON object."#
    )
}

/// Prompt for translating a free-form user instruction into a list of
/// spreadsheet operations.
pub fn direct_command_prompt(user_message: &str) -> String {
    format!(
        r#"You are an AI assistant that translates natural language instructions into structured JSON operations for a spreadsheet.
User Instruction: "{user_message}"

Convert the instruction into a JSON list of operation objects. Structure:
{{
  "id": "unique-op-id",
  "range": "A1 notation",
  "kind": "write" or "formula" or "color",
  "values": [["list", "of"], ["lists"]] or null,
  "formula": "=FORMULA" or null,
  "color": "color name" or null,
  "note": "Short description"
}}

Rules:
1. Identify the target range(s).
2. Use kind "write" for data/text, kind "formula" for formulas starting with '=', kind "color" for coloring cells.
3. When writing numeric values, use JSON number types (e.g., [[1]], [[5.5]]), not strings.
4. Generate unique IDs (e.g., "direct-op-1").
5. Output ONLY the JSON list ([...]). If the command cannot be parsed, output an empty list []. DO NOT add explanations.

Example:
User Instruction: "put =SUM(A1:A5) in A6"
Output:
```json
[
  {{
    "id": "direct-op-1",
    "range": "A6",
    "kind": "formula",
    "values": null,
    "formula": "=SUM(A1:A5)",
    "color": null,
    "note": "Apply formula"
  }}
]
```

Example 2:
User Instruction: "turn B2 blue"
Output:
```json
[
  {{
    "id": "direct-op-1",
    "range": "B2",
    "kind": "color",
    "values": null,
    "formula": null,
    "color": "blue",
    "note": "Set color blue"
  }}
]
```

Translate:
User Instruction: "{user_message}"
Output:
```json
"#
    )
}

/// Render sheet rows into the plain-text sample format the column-mapping
/// prompt expects, capped to keep prompts small.
pub fn render_sheet_sample(sheet: &[Vec<String>], max_rows: usize) -> String {
    sheet
        .iter()
        .take(max_rows)
        .map(|row| row.join(" | "))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_prompt_embeds_context() {
        let mut slots = SlotValues::default();
        slots.round_type = Some("Series A".to_string());
        let prompt = slot_extraction_prompt(&slots, "user: hi", "raise $5M", None);
        assert!(prompt.contains("\"roundType\": \"Series A\""));
        assert!(prompt.contains("LATEST User Message: \"raise $5M\""));
        assert!(prompt.contains("roundType, amount, preMoney, poolPct"));
        assert!(!prompt.contains("just asked"));
    }

    #[test]
    fn test_slot_prompt_names_priority_slot() {
        let prompt =
            slot_extraction_prompt(&SlotValues::default(), "", "10", Some("poolPct"));
        assert!(prompt.contains("just asked the user for 'poolPct'"));
        assert!(prompt.contains("answers 'poolPct'"));
    }

    #[test]
    fn test_column_mapping_prompt_names_all_roles() {
        let prompt = column_mapping_prompt("Founders | 8000000");
        assert!(prompt.contains("shareholder_name_col_idx"));
        assert!(prompt.contains("pre_round_shares_col_idx"));
        assert!(prompt.contains("pre_round_investment_col_idx"));
    }

    #[test]
    fn test_render_sheet_sample_caps_rows() {
        let sheet: Vec<Vec<String>> = (0..10)
            .map(|i| vec![format!("row{i}"), "1".to_string()])
            .collect();
        let sample = render_sheet_sample(&sheet, 3);
        assert_eq!(sample.lines().count(), 3);
        assert!(sample.starts_with("row0 | 1"));
    }

    #[test]
    fn test_direct_command_prompt_embeds_instruction() {
        let prompt = direct_command_prompt("put hello in A1");
        assert!(prompt.contains("User Instruction: \"put hello in A1\""));
        assert!(prompt.contains("\"kind\": \"formula\""));
    }
}
