//! Spreadsheet parsing and result assembly.
//!
//! The row-filtering rule lives in the parser and nowhere else. The parser
//! emits absolute 0-based source row indices; the assembler writes by those
//! indices into the *original* workbook without re-filtering. Re-applying
//! row skipping during assembly is the historical off-by-N bug this layout
//! exists to prevent.

mod assembler;
mod parser;
mod validate;

pub use assembler::assemble_results;
pub use parser::{parse_sheet, ParsedRow, ParsedSheet};
pub use validate::{validate_rows, RowValidationError};

use thiserror::Error;

/// Workbook sheet holding the batch input rows.
pub const SHEET_NAME: &str = "batch_data";

/// Column appended by the assembler.
pub const RESULT_COLUMN: &str = "execution_result";

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("cannot read workbook: {0}")]
    Read(String),

    #[error("cannot write workbook: {0}")]
    Write(String),

    #[error("workbook has no sheet named '{SHEET_NAME}'")]
    MissingSheet,

    #[error("sheet '{SHEET_NAME}' has no header row")]
    MissingHeader,

    #[error("sheet '{SHEET_NAME}' contains no data rows")]
    NoDataRows,
}
