//! # Text Format
//!
//! Human-readable parameter file: one tab-separated row per parameter.
//!
//! ## Layout
//! ```text
//! # Onboard parameters for Vehicle 1
//! #
//! # Vehicle-Id Component-Id Name Value Type
//! 1	1	CRUISE_SPEED	12.5	9
//! 1	1	MIS_TAKEOFF_ALT	2.5	9
//! 1	154	CAM_MODE	2	6
//! ```
//!
//! The last column is the wire type code. Lines starting with `#` and blank
//! lines are ignored when reading.

use crate::error::{CoreError, CoreResult};
use crate::types::{ComponentId, ParamType, ParamValue};
use crate::validation::is_valid_param_name;

/// One parameter row of a text file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamRow {
    pub vehicle_id: u8,
    pub component: ComponentId,
    pub name: String,
    pub value: ParamValue,
}

/// Writes the header and one line per row.
pub fn format_export<'a>(vehicle_id: u8, rows: impl IntoIterator<Item = &'a ParamRow>) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Onboard parameters for Vehicle {}\n", vehicle_id));
    out.push_str("#\n");
    out.push_str("# Vehicle-Id Component-Id Name Value Type\n");

    for row in rows {
        out.push_str(&format_row(row));
        out.push('\n');
    }
    out
}

/// Formats a single row without the trailing newline.
pub fn format_row(row: &ParamRow) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}",
        row.vehicle_id,
        row.component,
        row.name,
        row.value,
        row.value.param_type().code()
    )
}

/// Parses one line. Returns `Ok(None)` for comments and blank lines.
///
/// `line_no` is 1-based and only used in error messages.
pub fn parse_line(line_no: usize, line: &str) -> CoreResult<Option<ParamRow>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let malformed = |reason: String| CoreError::MalformedLine {
        line: line_no,
        reason,
    };

    let columns: Vec<&str> = trimmed.split('\t').map(str::trim).collect();
    if columns.len() != 5 {
        return Err(malformed(format!("expected 5 columns, found {}", columns.len())));
    }

    let vehicle_id = columns[0]
        .parse::<u8>()
        .map_err(|_| malformed(format!("invalid vehicle id '{}'", columns[0])))?;
    let component = columns[1]
        .parse::<u8>()
        .map(ComponentId)
        .map_err(|_| malformed(format!("invalid component id '{}'", columns[1])))?;

    let name = columns[2];
    if !is_valid_param_name(name) {
        return Err(malformed(format!("invalid parameter name '{}'", name)));
    }

    let code = columns[4]
        .parse::<u8>()
        .map_err(|_| malformed(format!("invalid type code '{}'", columns[4])))?;
    let ty = ParamType::from_code(code)?;
    let value = ParamValue::parse(ty, columns[3])?;

    Ok(Some(ParamRow {
        vehicle_id,
        component,
        name: name.to_string(),
        value,
    }))
}

/// Parses a whole document, keeping per-line results so callers can report
/// every rejected line instead of stopping at the first.
pub fn parse_document(text: &str) -> Vec<(usize, CoreResult<ParamRow>)> {
    text.lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let line_no = i + 1;
            parse_line(line_no, line).transpose().map(|r| (line_no, r))
        })
        .collect()
}
