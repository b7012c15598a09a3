use crate::parser::ComplianceLevel;
use crate::response::{Impact, ScanResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRow {
    pub job_id: String,
    pub url: String,
    pub page_title: String,
    pub compliance_level: ComplianceLevel,
    pub ai_summary: String,
    pub ai_remediation_plan: String,
    pub ai_model: String,
    pub total_issues: usize,
    pub critical_issues: usize,
    pub serious_issues: usize,
    pub moderate_issues: usize,
    pub minor_issues: usize,
    pub issues_json: String,
    pub status: String,
    pub error_message: Option<String>,
}

/// One import row per completed scan, with issue counts aggregated by impact
/// and the full issue list embedded as a single JSON field.
pub fn transform_rows(results: &[ScanResult], model_id: &str) -> Result<Vec<ImportRow>> {
    results
        .iter()
        .map(|r| {
            let mut critical = 0;
            let mut serious = 0;
            let mut moderate = 0;
            let mut minor = 0;
            for issue in &r.issues {
                match issue.impact {
                    Impact::Critical => critical += 1,
                    Impact::Serious => serious += 1,
                    Impact::Moderate => moderate += 1,
                    Impact::Minor => minor += 1,
                }
            }
            let issues_json = serde_json::to_string(&r.issues)
                .with_context(|| format!("serializing issues for job {}", r.job_id))?;

            Ok(ImportRow {
                job_id: r.job_id.clone(),
                url: r.url.clone(),
                page_title: r.page_title.clone(),
                compliance_level: r.compliance_level,
                ai_summary: r.summary.clone(),
                ai_remediation_plan: r.remediation_plan.clone(),
                ai_model: model_id.to_string(),
                total_issues: r.issues.len(),
                critical_issues: critical,
                serious_issues: serious,
                moderate_issues: moderate,
                minor_issues: minor,
                issues_json,
                status: r.status.clone(),
                error_message: None,
            })
        })
        .collect()
}

pub const CSV_HEADER: [&str; 15] = [
    "job_id",
    "url",
    "page_title",
    "compliance_level",
    "ai_summary",
    "ai_remediation_plan",
    "ai_model",
    "total_issues",
    "critical_issues",
    "serious_issues",
    "moderate_issues",
    "minor_issues",
    "issues_json",
    "status",
    "error_message",
];

pub fn write_csv(path: &Path, rows: &[ImportRow]) -> Result<()> {
    std::fs::write(path, render_csv(rows))
        .with_context(|| format!("writing output csv: {}", path.display()))
}

pub fn render_csv(rows: &[ImportRow]) -> String {
    let mut out = String::new();
    out.push_str(&CSV_HEADER.join(","));
    out.push('\n');
    for row in rows {
        let fields = [
            row.job_id.clone(),
            row.url.clone(),
            row.page_title.clone(),
            row.compliance_level.as_str().to_string(),
            row.ai_summary.clone(),
            row.ai_remediation_plan.clone(),
            row.ai_model.clone(),
            row.total_issues.to_string(),
            row.critical_issues.to_string(),
            row.serious_issues.to_string(),
            row.moderate_issues.to_string(),
            row.minor_issues.to_string(),
            row.issues_json.clone(),
            row.status.clone(),
            row.error_message.clone().unwrap_or_default(),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

pub fn csv_field(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
