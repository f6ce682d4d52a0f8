//! Reference cross-sections: ASCII loading and the shared library used by
//! analysis windows.

mod model;
mod parser;

pub use model::{CrossSection, CrossSectionLibrary};
pub use parser::parse_two_column_source;

use crate::common::ProjectConfig;
use crate::domain::DoasResult;
use std::path::Path;
use tracing::debug;

pub(crate) use parser::read_text_source;

pub fn read_cross_section_file(name: &str, path: &Path) -> DoasResult<CrossSection> {
    let source = read_text_source(path, "cross-section")?;
    let (wavelengths, values) = parse_two_column_source(&source, name)?;
    let cross_section = CrossSection::new(name, wavelengths, values)?;
    debug!(
        name,
        path = %path.display(),
        points = cross_section.wavelengths().len(),
        "loaded cross-section"
    );
    Ok(cross_section)
}

/// Load every cross-section listed by `project`, resolving relative paths
/// against the project file.
pub fn load_project_library(project: &ProjectConfig) -> DoasResult<CrossSectionLibrary> {
    let mut library = CrossSectionLibrary::new();
    for source in &project.cross_sections {
        let path = project.resolve(&source.path);
        library.insert(read_cross_section_file(&source.name, &path)?);
    }
    Ok(library)
}

#[cfg(test)]
mod tests {
    use super::read_cross_section_file;
    use crate::domain::DoasErrorCategory;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn file_round_trip_and_missing_file() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("o3.xs");
        fs::write(&path, "; O3\n330 1.0\n331 2.0\n332 1.5\n").expect("file should be written");
        let xs = read_cross_section_file("O3", &path).expect("file should load");
        assert_eq!(xs.name(), "O3");
        assert_eq!(xs.domain(), (330.0, 332.0));

        let error = read_cross_section_file("O3", &temp.path().join("none.xs"))
            .expect_err("missing file should fail");
        assert_eq!(error.category(), DoasErrorCategory::IoSystem);
    }
}
