//! JSON report export

use crate::error::Result;
use crate::models::ScanReport;
use std::path::Path;
use tracing::info;

/// Exports a scan report as a JSON file
pub fn export(report: &ScanReport, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(output_path, json)?;
    info!("JSON report saved to {}", output_path.display());
    Ok(())
}

/// Loads a ScanReport from a JSON file
pub fn load(input_path: &Path) -> Result<ScanReport> {
    let content = std::fs::read_to_string(input_path)?;
    let report: ScanReport = serde_json::from_str(&content)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("report.json");

        let mut report = ScanReport::new("https://example.com/");
        report.summary.pages_visited = 3;
        report.finish();
        export(&report, &path).expect("export");

        let loaded = load(&path).expect("load");
        assert_eq!(loaded.scan_id, report.scan_id);
        assert_eq!(loaded.summary, report.summary);
        assert!(loaded.finished_at.is_some());
    }
}
