//! Input sheet parser.
//!
//! Emits an ordered list of `(source_row_index, inputs)` pairs. Indices are
//! absolute 0-based positions in the unmodified sheet; the parser never
//! reindexes, so the assembler can write results back by position.

use serde_json::Value;
use tracing::debug;

use crate::models::{TaskInputs, WorkflowSchema};

use super::validate::validate_value;
use super::{SheetError, RESULT_COLUMN, SHEET_NAME};

/// Markers identifying the example row a template generator may have left
/// under the header.
const EXAMPLE_MARKERS: [&str; 5] = ["iphone", "example", "示例", "sample", "test"];

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    /// 0-based row position in the unmodified sheet.
    pub source_row_index: u32,
    pub inputs: TaskInputs,
}

#[derive(Debug, Clone)]
pub struct ParsedSheet {
    /// Cleaned header names in column order, result column excluded.
    pub headers: Vec<String>,
    pub rows: Vec<ParsedRow>,
}

/// Parse the `batch_data` sheet of an uploaded workbook.
///
/// Row categories, in order: row 0 is the header row; row 1 is skipped when
/// it reads as a prose description; row 2 is skipped when it carries
/// example markers; everything else is data. Fully empty rows are skipped.
pub fn parse_sheet(bytes: &[u8], schema: &WorkflowSchema) -> Result<ParsedSheet, SheetError> {
    let cursor = std::io::Cursor::new(bytes.to_vec());
    let book = umya_spreadsheet::reader::xlsx::read_reader(cursor, true)
        .map_err(|e| SheetError::Read(e.to_string()))?;
    let sheet = book
        .get_sheet_by_name(SHEET_NAME)
        .ok_or(SheetError::MissingSheet)?;

    let matrix = sheet_matrix(sheet);
    if matrix.is_empty() {
        return Err(SheetError::MissingHeader);
    }

    let header_cells = &matrix[0];
    if header_cells.iter().all(|c| c.trim().is_empty()) {
        return Err(SheetError::MissingHeader);
    }

    // Column index -> cleaned name; the result column and unnamed columns
    // do not become parameters.
    let columns: Vec<(usize, String)> = header_cells
        .iter()
        .enumerate()
        .map(|(i, raw)| (i, clean_header(raw)))
        .filter(|(_, name)| !name.is_empty() && name != RESULT_COLUMN)
        .collect();

    let mut rows = Vec::new();
    for (index, cells) in matrix.iter().enumerate().skip(1) {
        if cells.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        if index == 1 && is_description_row(cells, &columns, schema) {
            debug!(row = index, "skipping description row");
            continue;
        }
        if index == 2 && is_example_row(cells) {
            debug!(row = index, "skipping example row");
            continue;
        }

        let mut inputs = TaskInputs::new();
        for (col, name) in &columns {
            let value = cells.get(*col).map(|c| c.trim()).unwrap_or_default();
            if !value.is_empty() {
                inputs.insert(name.clone(), Value::String(value.to_string()));
            }
        }
        if inputs.is_empty() {
            continue;
        }
        rows.push(ParsedRow {
            source_row_index: index as u32,
            inputs,
        });
    }

    if rows.is_empty() {
        return Err(SheetError::NoDataRows);
    }

    debug!(rows = rows.len(), "sheet parsed");
    Ok(ParsedSheet {
        headers: columns.into_iter().map(|(_, name)| name).collect(),
        rows,
    })
}

/// Strip whitespace and the required-marker suffix from a header cell.
fn clean_header(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_suffix(" *")
        .map(str::trim)
        .unwrap_or(trimmed)
        .to_string()
}

/// A row directly under the header is a description row when every
/// non-empty cell reads as prose and the row carries no typed evidence of
/// being data.
///
/// "Typed evidence" means at least one cell validates against a
/// discriminating (number or select) schema parameter; with a schema of
/// only free-text parameters any prose row would otherwise "parse as data".
fn is_description_row(
    cells: &[String],
    columns: &[(usize, String)],
    schema: &WorkflowSchema,
) -> bool {
    let non_empty: Vec<&str> = cells
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if non_empty.is_empty() {
        return false;
    }

    let all_prose = non_empty
        .iter()
        .all(|cell| cell.chars().count() > 12 || cell.contains(char::is_whitespace));
    if !all_prose {
        return false;
    }

    !matches_schema_tuple(cells, columns, schema)
}

/// Whether the row carries typed evidence of being a data tuple: some cell
/// validates against a number or select parameter.
fn matches_schema_tuple(
    cells: &[String],
    columns: &[(usize, String)],
    schema: &WorkflowSchema,
) -> bool {
    use crate::models::ParameterType;

    for (col, name) in columns {
        let Some(param) = schema.parameter(name) else {
            continue;
        };
        if !matches!(
            param.parameter_type,
            ParameterType::Number | ParameterType::Select
        ) {
            continue;
        }
        let value = cells.get(*col).map(|c| c.trim()).unwrap_or_default();
        if !value.is_empty() && validate_value(param, value).is_none() {
            return true;
        }
    }
    false
}

/// Example rows carry a cell that is (or begins with) a known marker.
fn is_example_row(cells: &[String]) -> bool {
    cells.iter().any(|cell| {
        let lowered = cell.trim().to_lowercase();
        !lowered.is_empty()
            && EXAMPLE_MARKERS
                .iter()
                .any(|marker| lowered == *marker || lowered.starts_with(marker))
    })
}

/// Read the sheet into a dense 0-based matrix of display strings.
fn sheet_matrix(sheet: &umya_spreadsheet::Worksheet) -> Vec<Vec<String>> {
    let highest_row = sheet.get_highest_row();
    let highest_col = sheet.get_highest_column();
    let mut matrix = Vec::with_capacity(highest_row as usize);
    for row in 1..=highest_row {
        let mut cells = Vec::with_capacity(highest_col as usize);
        for col in 1..=highest_col {
            cells.push(sheet.get_value((col, row)));
        }
        matrix.push(cells);
    }
    matrix
}


#[cfg(test)]
mod tests {
    use super::test_support::workbook_bytes;
    use super::*;
    use crate::models::{ParameterType, WorkflowParameter};

    fn string_schema(names: &[&str]) -> WorkflowSchema {
        WorkflowSchema {
            parameters: names
                .iter()
                .map(|name| WorkflowParameter {
                    name: name.to_string(),
                    parameter_type: ParameterType::String,
                    required: true,
                    description: None,
                    default: None,
                    options: None,
                })
                .collect(),
        }
    }

    #[test]
    fn header_description_example_rows_skipped() {
        let bytes = workbook_bytes(&[
            &["search_term"],
            &["the term to search"],
            &["iPhone"],
            &["huawei"],
            &["xiaomi"],
            &["oppo"],
        ]);
        let parsed = parse_sheet(&bytes, &string_schema(&["search_term"])).unwrap();

        assert_eq!(parsed.headers, vec!["search_term"]);
        let indices: Vec<u32> = parsed.rows.iter().map(|r| r.source_row_index).collect();
        assert_eq!(indices, vec![3, 4, 5]);
        assert_eq!(
            parsed.rows[0].inputs.get("search_term").unwrap(),
            &Value::String("huawei".to_string())
        );
    }

    #[test]
    fn data_directly_under_header_kept() {
        let bytes = workbook_bytes(&[&["search_term"], &["huawei"], &["xiaomi"]]);
        let parsed = parse_sheet(&bytes, &string_schema(&["search_term"])).unwrap();
        let indices: Vec<u32> = parsed.rows.iter().map(|r| r.source_row_index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn typed_row_not_mistaken_for_description() {
        // "12 apples and pears" would read as prose, but the number column
        // pins row 1 as data.
        let schema = WorkflowSchema {
            parameters: vec![
                WorkflowParameter {
                    name: "note".to_string(),
                    parameter_type: ParameterType::String,
                    required: false,
                    description: None,
                    default: None,
                    options: None,
                },
                WorkflowParameter {
                    name: "count".to_string(),
                    parameter_type: ParameterType::Number,
                    required: true,
                    description: None,
                    default: None,
                    options: None,
                },
            ],
        };
        let bytes = workbook_bytes(&[
            &["note", "count"],
            &["first delivery batch", "12"],
            &["second delivery batch", "7"],
        ]);
        let parsed = parse_sheet(&bytes, &schema).unwrap();
        let indices: Vec<u32> = parsed.rows.iter().map(|r| r.source_row_index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn empty_rows_skipped_without_reindexing() {
        let bytes = workbook_bytes(&[
            &["q"],
            &["alpha"],
            &[""],
            &["beta"],
        ]);
        let parsed = parse_sheet(&bytes, &string_schema(&["q"])).unwrap();
        let indices: Vec<u32> = parsed.rows.iter().map(|r| r.source_row_index).collect();
        assert_eq!(indices, vec![1, 3]);
    }

    #[test]
    fn required_marker_stripped_from_headers() {
        let bytes = workbook_bytes(&[&["search_term *"], &["huawei"]]);
        let parsed = parse_sheet(&bytes, &string_schema(&["search_term"])).unwrap();
        assert_eq!(parsed.headers, vec!["search_term"]);
        assert!(parsed.rows[0].inputs.contains_key("search_term"));
    }

    #[test]
    fn existing_result_column_ignored() {
        let bytes = workbook_bytes(&[
            &["q", "execution_result"],
            &["alpha", "stale output"],
        ]);
        let parsed = parse_sheet(&bytes, &string_schema(&["q"])).unwrap();
        assert_eq!(parsed.headers, vec!["q"]);
        assert!(!parsed.rows[0].inputs.contains_key("execution_result"));
    }

    #[test]
    fn missing_sheet_and_empty_sheet_rejected() {
        let mut book = umya_spreadsheet::new_file();
        book.new_sheet("wrong_name").unwrap();
        let mut cursor = std::io::Cursor::new(Vec::new());
        umya_spreadsheet::writer::xlsx::write_writer(&book, &mut cursor).unwrap();
        let bytes = cursor.into_inner();
        assert!(matches!(
            parse_sheet(&bytes, &string_schema(&["q"])),
            Err(SheetError::MissingSheet)
        ));

        let header_only = workbook_bytes(&[&["q"]]);
        assert!(matches!(
            parse_sheet(&header_only, &string_schema(&["q"])),
            Err(SheetError::NoDataRows)
        ));
    }
}
