use std::fmt;

const SUMMARY_ERROR_LIMIT: usize = 5;

/// Totals of one archival run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchivalResult {
    /// Items scanned, whatever their outcome.
    pub items_processed: usize,
    /// Items archived (or that would be, on a dry run).
    pub items_archived: usize,
    /// One message per failed item or table.
    pub errors: Vec<String>,
}

impl ArchivalResult {
    /// Result with the given totals.
    pub fn new(items_processed: usize, items_archived: usize, errors: Vec<String>) -> Self {
        Self {
            items_processed,
            items_archived,
            errors,
        }
    }

    /// Items processed but not archived.
    pub fn items_skipped(&self) -> usize {
        self.items_processed.saturating_sub(self.items_archived)
    }

    /// Returns `true` when no error was recorded.
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ArchivalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Archival Result:")?;
        writeln!(f, "  Items processed: {}", self.items_processed)?;
        writeln!(f, "  Items archived: {}", self.items_archived)?;
        writeln!(f, "  Items skipped: {}", self.items_skipped())?;
        if !self.errors.is_empty() {
            writeln!(f, "  Errors: {}", self.errors.len())?;
            for error in self.errors.iter().take(SUMMARY_ERROR_LIMIT) {
                writeln!(f, "    - {error}")?;
            }
            if self.errors.len() > SUMMARY_ERROR_LIMIT {
                writeln!(
                    f,
                    "    ... and {} more",
                    self.errors.len() - SUMMARY_ERROR_LIMIT
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_skipped_and_success() {
        let result = ArchivalResult::new(1000, 750, vec!["e1".into(), "e2".into()]);
        assert_eq!(result.items_skipped(), 250);
        assert!(!result.success());
        assert!(ArchivalResult::default().success());
    }

    #[test]
    fn summary_lists_first_errors_only() {
        let errors = (1..=7).map(|i| format!("e{i}")).collect();
        let summary = ArchivalResult::new(1000, 750, errors).to_string();

        assert!(summary.contains("Items processed: 1000"));
        assert!(summary.contains("Items archived: 750"));
        assert!(summary.contains("Items skipped: 250"));
        assert!(summary.contains("Errors: 7"));
        assert!(summary.contains("    - e5"));
        assert!(!summary.contains("e6"));
        assert!(summary.contains("... and 2 more"));
    }

    #[test]
    fn summary_omits_error_section_when_clean() {
        let summary = ArchivalResult::new(3, 3, Vec::new()).to_string();
        assert!(!summary.contains("Errors"));
    }
}
