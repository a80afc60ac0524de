use crate::error::Result;
use crate::ScanReport;

/// Render a batch report as pretty-printed JSON.
pub fn render(report: &ScanReport) -> Result<String> {
    let json = serde_json::to_string_pretty(report)?;
    Ok(json)
}
