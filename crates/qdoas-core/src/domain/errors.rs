use std::error::Error;
use std::fmt::{Display, Formatter};

pub type DoasResult<T> = Result<T, DoasError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum DoasErrorCategory {
    InputValidation,
    IoSystem,
    Allocation,
    NumericalDegeneracy,
    Calibration,
    Internal,
}

impl DoasErrorCategory {
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::InputValidation => 2,
            Self::IoSystem => 3,
            Self::Allocation => 4,
            Self::NumericalDegeneracy => 5,
            Self::Calibration => 6,
            Self::Internal => 7,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InputValidation => "INPUT",
            Self::IoSystem => "IO",
            Self::Allocation => "ALLOCATION",
            Self::NumericalDegeneracy => "NUMERIC",
            Self::Calibration => "CALIBRATION",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether the failure ends processing of the whole analysis window,
    /// as opposed to only the current record.
    pub const fn aborts_window(self) -> bool {
        matches!(self, Self::Allocation | Self::Internal)
    }
}

impl Display for DoasErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Where a failure happened: the analysis window (when known) and a short
/// operation tag such as `"ANALYSE.SVD"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    pub window: Option<String>,
    pub operation: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoasError {
    category: DoasErrorCategory,
    context: ErrorContext,
    message: String,
}

impl DoasError {
    pub fn new(
        category: DoasErrorCategory,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            context: ErrorContext {
                window: None,
                operation,
            },
            message: message.into(),
        }
    }

    pub fn input_validation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(DoasErrorCategory::InputValidation, operation, message)
    }

    pub fn io_system(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(DoasErrorCategory::IoSystem, operation, message)
    }

    pub fn allocation(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(DoasErrorCategory::Allocation, operation, message)
    }

    pub fn numerical(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(DoasErrorCategory::NumericalDegeneracy, operation, message)
    }

    pub fn calibration(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(DoasErrorCategory::Calibration, operation, message)
    }

    pub fn internal(operation: &'static str, message: impl Into<String>) -> Self {
        Self::new(DoasErrorCategory::Internal, operation, message)
    }

    /// Attach the analysis window name, keeping an already recorded one.
    pub fn in_window(mut self, window: &str) -> Self {
        if self.context.window.is_none() {
            self.context.window = Some(window.to_string());
        }
        self
    }

    pub const fn category(&self) -> DoasErrorCategory {
        self.category
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub const fn operation(&self) -> &'static str {
        self.context.operation
    }

    pub fn window(&self) -> Option<&str> {
        self.context.window.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        match &self.context.window {
            Some(window) => format!(
                "ERROR: [{}] {} ({}): {}",
                self.category, self.context.operation, window, self.message
            ),
            None => format!(
                "ERROR: [{}] {}: {}",
                self.category, self.context.operation, self.message
            ),
        }
    }
}

impl Display for DoasError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.diagnostic_line())
    }
}

impl Error for DoasError {}

#[cfg(test)]
mod tests {
    use super::{DoasError, DoasErrorCategory};

    #[test]
    fn exit_mapping_is_stable() {
        let cases = [
            (DoasErrorCategory::InputValidation, 2, "INPUT"),
            (DoasErrorCategory::IoSystem, 3, "IO"),
            (DoasErrorCategory::Allocation, 4, "ALLOCATION"),
            (DoasErrorCategory::NumericalDegeneracy, 5, "NUMERIC"),
            (DoasErrorCategory::Calibration, 6, "CALIBRATION"),
            (DoasErrorCategory::Internal, 7, "INTERNAL"),
        ];

        for (category, exit_code, label) in cases {
            assert_eq!(category.exit_code(), exit_code);
            assert_eq!(category.as_str(), label);
        }
    }

    #[test]
    fn diagnostic_line_carries_window_and_operation() {
        let error = DoasError::calibration("KURUCZ.MONOTONIC", "grid decreases at pixel 12")
            .in_window("NO2_VIS")
            .in_window("ignored");

        assert_eq!(error.window(), Some("NO2_VIS"));
        assert_eq!(
            error.diagnostic_line(),
            "ERROR: [CALIBRATION] KURUCZ.MONOTONIC (NO2_VIS): grid decreases at pixel 12"
        );
        assert_eq!(error.exit_code(), 6);
    }

    #[test]
    fn only_window_level_categories_abort_the_window() {
        assert!(DoasErrorCategory::Allocation.aborts_window());
        assert!(!DoasErrorCategory::Calibration.aborts_window());
        assert!(!DoasErrorCategory::InputValidation.aborts_window());
        assert!(!DoasErrorCategory::NumericalDegeneracy.aborts_window());
    }
}
