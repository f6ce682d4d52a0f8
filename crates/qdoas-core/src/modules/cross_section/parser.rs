use crate::domain::{DoasError, DoasResult};
use std::fs;
use std::path::Path;

const COMMENT_PREFIXES: [char; 3] = [';', '#', '*'];

pub(crate) fn read_text_source(path: &Path, label: &str) -> DoasResult<String> {
    fs::read_to_string(path).map_err(|source| {
        DoasError::io_system(
            "IO.SPECTRAL_FILE_READ",
            format!("failed to read {} '{}': {}", label, path.display(), source),
        )
    })
}

/// Parse the first two numeric columns of an ASCII table.
///
/// Blank lines and lines starting with `;`, `#` or `*` are skipped; columns
/// may be separated by whitespace or commas. A table written in decreasing
/// wavelength order is returned in increasing order.
pub fn parse_two_column_source(source: &str, label: &str) -> DoasResult<(Vec<f64>, Vec<f64>)> {
    let mut abscissae = Vec::new();
    let mut values = Vec::new();

    for (line_index, line) in source.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(COMMENT_PREFIXES) {
            continue;
        }

        let mut fields = trimmed
            .split(|ch: char| ch.is_whitespace() || ch == ',')
            .filter(|field| !field.is_empty());
        let mut next_value = |column: &str| -> DoasResult<f64> {
            let field = fields.next().ok_or_else(|| {
                DoasError::input_validation(
                    "INPUT.SPECTRAL_TABLE",
                    format!("{} line {}: missing {} column", label, line_index + 1, column),
                )
            })?;
            let value = field.parse::<f64>().map_err(|_| {
                DoasError::input_validation(
                    "INPUT.SPECTRAL_TABLE",
                    format!(
                        "{} line {}: '{}' is not a number",
                        label,
                        line_index + 1,
                        field
                    ),
                )
            })?;
            if !value.is_finite() {
                return Err(DoasError::input_validation(
                    "INPUT.SPECTRAL_TABLE",
                    format!("{} line {}: value is not finite", label, line_index + 1),
                ));
            }
            Ok(value)
        };

        let abscissa = next_value("wavelength")?;
        let value = next_value("value")?;
        abscissae.push(abscissa);
        values.push(value);
    }

    if abscissae.len() >= 2 && abscissae[0] > abscissae[abscissae.len() - 1] {
        abscissae.reverse();
        values.reverse();
    }
    Ok((abscissae, values))
}
