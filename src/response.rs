use crate::parser::ComplianceLevel;
use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Impact {
    Critical,
    Serious,
    Moderate,
    Minor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub rule_id: String,
    pub criterion: String,
    pub impact: Impact,
    pub description: String,
    #[serde(default)]
    pub help_text: String,
    #[serde(default)]
    pub help_url: String,
    #[serde(default)]
    pub html_snippet: String,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub ai_explanation: String,
    #[serde(default)]
    pub ai_fix_suggestion: String,
    #[serde(default)]
    pub ai_priority: String,
}

pub const STATUS_COMPLETED: &str = "COMPLETED";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub job_id: String,
    pub url: String,
    #[serde(default)]
    pub page_title: String,
    pub compliance_level: ComplianceLevel,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub remediation_plan: String,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    STATUS_COMPLETED.to_string()
}

/// Parses the agent's raw output into scan results. Agents wrap JSON in
/// markdown fences or prose more often than not, so the array is located
/// rather than assumed. Reconciling results against the requested job set is
/// the processor's job, not this parser's.
pub fn parse_scan_results(output: &str) -> Result<Vec<ScanResult>> {
    let body = strip_code_fences(output)?;
    let json = extract_json_array(&body)
        .ok_or_else(|| anyhow!("no JSON array found in agent output"))?;
    let results: Vec<ScanResult> =
        serde_json::from_str(json).with_context(|| "parsing agent output JSON")?;
    Ok(results)
}

fn strip_code_fences(s: &str) -> Result<String> {
    let re = Regex::new(r"(?s)```(?:json)?\s*(.*?)```")?;
    match re.captures(s) {
        Some(cap) => Ok(cap[1].to_string()),
        None => Ok(s.to_string()),
    }
}

fn extract_json_array(s: &str) -> Option<&str> {
    let start = s.find('[')?;
    let end = s.rfind(']')?;
    (end > start).then(|| &s[start..=end])
}
