//! Result assembler.
//!
//! Writes rendered result text back into the *original* workbook at the
//! absolute source row indices the parser produced. The original rows,
//! including header, description and example rows, are left untouched; the
//! only change is the appended `execution_result` column.

use tracing::debug;

use super::{SheetError, RESULT_COLUMN, SHEET_NAME};

/// Produce the output workbook: the original plus one `execution_result`
/// column. `results` pairs absolute 0-based source row indices with the
/// rendered cell text; rows with no entry stay blank. Order and
/// completeness of `results` are irrelevant.
pub fn assemble_results(
    original: &[u8],
    results: &[(u32, String)],
) -> Result<Vec<u8>, SheetError> {
    let cursor = std::io::Cursor::new(original.to_vec());
    let mut book = umya_spreadsheet::reader::xlsx::read_reader(cursor, true)
        .map_err(|e| SheetError::Read(e.to_string()))?;
    let sheet = book
        .get_sheet_by_name_mut(SHEET_NAME)
        .ok_or(SheetError::MissingSheet)?;

    let result_column = locate_result_column(sheet);
    sheet
        .get_cell_mut((result_column, 1))
        .set_value(RESULT_COLUMN);

    for (source_row_index, text) in results {
        // Parser indices are 0-based, worksheet rows are 1-based.
        let row = source_row_index + 1;
        sheet.get_cell_mut((result_column, row)).set_value(text);
    }

    debug!(
        results = results.len(),
        column = result_column,
        "assembled result sheet"
    );

    let mut cursor = std::io::Cursor::new(Vec::new());
    umya_spreadsheet::writer::xlsx::write_writer(&book, &mut cursor)
        .map_err(|e| SheetError::Write(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Reuse an existing `execution_result` column, else append one.
fn locate_result_column(sheet: &umya_spreadsheet::Worksheet) -> u32 {
    let highest_col = sheet.get_highest_column();
    for col in 1..=highest_col {
        if sheet.get_value((col, 1)).trim() == RESULT_COLUMN {
            return col;
        }
    }
    highest_col + 1
}
