//! Build result types.
//!
//! Contains types for representing the outcome of build operations.

use std::path::PathBuf;
use std::time::Duration;

use super::ArchiveSummary;
use crate::plugin::PluginStats;
use crate::repository::ResolveReport;

/// Status of a single build section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionStatus {
    /// All phases ran
    Built,
    /// Directory missing, subtree skipped
    Skipped,
}

impl std::fmt::Display for SectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SectionStatus::Built => write!(f, "built"),
            SectionStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of processing a single section.
#[derive(Debug, Clone)]
pub struct SectionResult {
    /// Section name
    pub name: String,
    /// Section directory
    pub path: PathBuf,
    /// Build status
    pub status: SectionStatus,
    /// Files listed after generation
    pub files: usize,
    /// Files persisted by this section's phases
    pub written: usize,
    /// Time spent in this section's own phases
    pub duration: Duration,
}

impl SectionResult {
    /// Create a result for a built section.
    pub fn built(
        name: impl Into<String>,
        path: PathBuf,
        files: usize,
        written: usize,
        duration: Duration,
    ) -> Self {
        Self { name: name.into(), path, status: SectionStatus::Built, files, written, duration }
    }

    /// Create a skipped result.
    pub fn skipped(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
            status: SectionStatus::Skipped,
            files: 0,
            written: 0,
            duration: Duration::ZERO,
        }
    }
}

/// Result of a complete build run.
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Results for each section, in completion order (children first)
    pub sections: Vec<SectionResult>,
    /// Where required plugins came from
    pub resolve: ResolveReport,
    /// Counters for plugins that ran
    pub plugins: Vec<PluginStats>,
    /// Written archive
    pub archive: Option<(PathBuf, ArchiveSummary)>,
    /// Total build duration
    pub total_duration: Duration,
}

impl BuildReport {
    /// Create a new empty build report.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a section result.
    pub fn add_section(&mut self, result: SectionResult) {
        self.sections.push(result);
    }

    /// Get the number of built sections.
    pub fn built_count(&self) -> usize {
        self.sections.iter().filter(|s| s.status == SectionStatus::Built).count()
    }

    /// Get the number of skipped sections.
    pub fn skipped_count(&self) -> usize {
        self.sections.iter().filter(|s| s.status == SectionStatus::Skipped).count()
    }

    /// Total files written across all sections.
    pub fn files_written(&self) -> usize {
        self.sections.iter().map(|s| s.written).sum()
    }

    /// Total plugin failures.
    pub fn plugin_failures(&self) -> usize {
        self.plugins.iter().map(|p| p.failures).sum()
    }

    /// Format a summary of the build result.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Build succeeded: {} sections built, {} skipped, {} files written in {:.2?}",
            self.built_count(),
            self.skipped_count(),
            self.files_written(),
            self.total_duration
        )];

        lines.push(format!(
            "Plugins resolved: {} registered, {} cached, {} downloaded",
            self.resolve.registered, self.resolve.cached, self.resolve.downloaded
        ));

        if let Some((path, archive)) = &self.archive {
            lines.push(format!(
                "Archive: {} ({} entries, {} bytes)",
                path.display(),
                archive.entries,
                archive.bytes
            ));
        }

        if !self.plugins.is_empty() {
            lines.push("Plugin usage:".to_string());
            for plugin in &self.plugins {
                let mut line = format!(
                    "  - {} {}: {} calls, {} failed, {:.2?}",
                    plugin.name, plugin.version, plugin.invocations, plugin.failures, plugin.busy
                );
                if plugin.disabled {
                    line.push_str(" (disabled)");
                }
                lines.push(line);
            }
        }

        let skipped: Vec<_> =
            self.sections.iter().filter(|s| s.status == SectionStatus::Skipped).collect();
        if !skipped.is_empty() {
            lines.push(format!("Skipped sections ({}): ", skipped.len()));
            for section in skipped.iter().take(5) {
                lines.push(format!("  - {} ({})", section.name, section.path.display()));
            }
            if skipped.len() > 5 {
                lines.push(format!("  ... and {} more", skipped.len() - 5));
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(name: &str, failures: usize, disabled: bool) -> PluginStats {
        PluginStats {
            name: name.to_string(),
            version: "1.0".to_string(),
            invocations: 4,
            failures,
            busy: Duration::from_millis(3),
            disabled,
        }
    }

    #[test]
    fn test_counts() {
        let mut report = BuildReport::new();
        report.add_section(SectionResult::built(
            "textures",
            "/src/textures".into(),
            3,
            2,
            Duration::ZERO,
        ));
        report.add_section(SectionResult::skipped("missing", "/src/missing".into()));
        report.add_section(SectionResult::built("#global#", "/src".into(), 5, 1, Duration::ZERO));

        assert_eq!(report.built_count(), 2);
        assert_eq!(report.skipped_count(), 1);
        assert_eq!(report.files_written(), 3);
    }

    #[test]
    fn test_summary_lists_plugins_and_skips() {
        let mut report = BuildReport::new();
        report.add_section(SectionResult::skipped("missing", "/src/missing".into()));
        report.plugins = vec![stats("a", 1, false), stats("b", 0, true)];
        report.archive =
            Some(("/out/pack.zip".into(), ArchiveSummary { entries: 7, bytes: 1024 }));

        let summary = report.summary();
        assert!(summary.starts_with("Build succeeded: 0 sections built, 1 skipped"));
        assert!(summary.contains("Archive: /out/pack.zip (7 entries, 1024 bytes)"));
        assert!(summary.contains("  - a 1.0: 4 calls, 1 failed"));
        assert!(summary.contains("(disabled)"));
        assert!(summary.contains("  - missing (/src/missing)"));
        assert_eq!(report.plugin_failures(), 1);
    }
}
