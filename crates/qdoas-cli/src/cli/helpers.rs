use super::CliError;
use anyhow::Context;
use globset::Glob;
use qdoas_core::domain::{DoasError, DoasResult, Spectrum};
use qdoas_core::modules::batch::read_records_file;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Record files named explicitly plus those under `input_dir` whose path
/// relative to the directory matches `pattern`, in a stable order.
pub(super) fn collect_record_paths(
    inputs: &[PathBuf],
    input_dir: Option<&Path>,
    pattern: &str,
) -> Result<Vec<PathBuf>, CliError> {
    let mut paths = inputs.to_vec();

    if let Some(directory) = input_dir {
        let matcher = Glob::new(pattern)
            .map_err(|source| CliError::Usage(format!("invalid --pattern '{pattern}': {source}")))?
            .compile_matcher();
        let mut matched = Vec::new();
        let mut pending = vec![directory.to_path_buf()];
        while let Some(current) = pending.pop() {
            let entries = fs::read_dir(&current)
                .with_context(|| format!("failed to list '{}'", current.display()))?;
            for entry in entries {
                let path = entry
                    .with_context(|| format!("failed to list '{}'", current.display()))?
                    .path();
                if path.is_dir() {
                    pending.push(path);
                } else if path
                    .strip_prefix(directory)
                    .is_ok_and(|relative| matcher.is_match(relative))
                {
                    matched.push(path);
                }
            }
        }
        matched.sort();
        debug!(
            directory = %directory.display(),
            pattern,
            files = matched.len(),
            "selected record files"
        );
        paths.extend(matched);
    }

    Ok(paths)
}

/// Concatenate the records of every file; record indices follow file order.
pub(super) fn load_records(paths: &[PathBuf]) -> DoasResult<Vec<Spectrum>> {
    let mut records = Vec::new();
    for path in paths {
        records.extend(read_records_file(path)?);
    }
    if records.is_empty() {
        return Err(DoasError::input_validation(
            "INPUT.RECORDS",
            "no records found in the selected input files",
        ));
    }
    Ok(records)
}

/// Regular grid `start, start + step, ...` up to and including `end`.
pub(super) fn regular_grid(start: f64, end: f64, step: f64) -> Result<Vec<f64>, CliError> {
    if !start.is_finite() || !end.is_finite() || end <= start {
        return Err(CliError::Usage(format!(
            "grid bounds must be finite with end > start, got {start}..{end}"
        )));
    }
    if !step.is_finite() || step <= 0.0 {
        return Err(CliError::Usage(format!("grid step must be > 0, got {step}")));
    }
    let count = ((end - start) / step + 1.0e-9).floor() as usize + 1;
    Ok((0..count).map(|index| start + step * index as f64).collect())
}

pub(super) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize '{}'", path.display()))?;
    write_output(path, &rendered)
}

/// Whitespace separated columns under a `;` comment header.
pub(super) fn write_columns(path: &Path, header: &str, columns: &[&[f64]]) -> Result<(), CliError> {
    let rows = columns.first().map_or(0, |column| column.len());
    let mut rendered = format!("; {header}\n");
    for row in 0..rows {
        let line = columns
            .iter()
            .map(|column| format!("{:.8e}", column[row]))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(rendered, "{line}").context("failed to format output table")?;
    }
    write_output(path, &rendered)
}

fn write_output(path: &Path, contents: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create '{}'", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write '{}'", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{collect_record_paths, regular_grid, write_columns};
    use crate::cli::CliError;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn regular_grid_includes_the_end_point() {
        let grid = regular_grid(300.0, 301.0, 0.1).expect("valid grid");
        assert_eq!(grid.len(), 11);
        assert!((grid[10] - 301.0).abs() < 1.0e-12);
        assert!(matches!(regular_grid(301.0, 300.0, 0.1), Err(CliError::Usage(_))));
        assert!(matches!(regular_grid(300.0, 301.0, 0.0), Err(CliError::Usage(_))));
    }

    #[test]
    fn pattern_selects_nested_record_files_in_order() {
        let temp = TempDir::new().expect("tempdir should be created");
        let nested = temp.path().join("day2");
        fs::create_dir_all(&nested).expect("nested dir should be created");
        for path in [
            temp.path().join("b.json"),
            temp.path().join("a.json"),
            temp.path().join("notes.txt"),
            nested.join("c.json"),
        ] {
            fs::write(&path, "[]").expect("file should be written");
        }

        let paths = collect_record_paths(&[], Some(temp.path()), "**/*.json")
            .expect("pattern should be valid");
        let names: Vec<_> = paths
            .iter()
            .map(|path| path.strip_prefix(temp.path()).expect("under temp").to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                std::path::PathBuf::from("a.json"),
                std::path::PathBuf::from("b.json"),
                std::path::PathBuf::from("day2/c.json"),
            ]
        );

        assert!(matches!(
            collect_record_paths(&[], Some(temp.path()), "[unclosed"),
            Err(CliError::Usage(_))
        ));
    }

    #[test]
    fn columns_are_written_row_by_row() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("out/table.dat");
        let wavelengths = vec![300.0, 301.0];
        let values = vec![1.0, 2.0];
        write_columns(&path, "wavelength value", &[wavelengths.as_slice(), values.as_slice()])
            .expect("table should be written");

        let written = fs::read_to_string(&path).expect("table should exist");
        let lines: Vec<_> = written.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "; wavelength value");
        assert_eq!(lines[1].split_whitespace().count(), 2);
    }
}
