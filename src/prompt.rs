use crate::batch::MiniBatch;
use anyhow::Result;
use std::fmt::Write;

/// Renders the audit request for one mini-batch. The job listing and the
/// output contract are the only fixed parts; everything the agent needs to
/// know about WCAG itself lives on the agent side.
pub fn build_mini_batch_prompt(mini: &MiniBatch) -> Result<String> {
    let mut p = String::new();
    writeln!(
        p,
        "Run an accessibility audit for each of the following pages against its target WCAG conformance level."
    )?;
    writeln!(p)?;
    for scan in &mini.scans {
        writeln!(
            p,
            "- job_id: {} | url: {} | level: {}",
            scan.job_id,
            scan.url,
            scan.compliance_level.as_str()
        )?;
    }
    writeln!(p)?;
    writeln!(
        p,
        "Respond with a single JSON array containing one object per job, with fields: \
         job_id, url, page_title, compliance_level, summary, remediation_plan, issues."
    )?;
    writeln!(
        p,
        "Each issue object needs: id, rule_id, criterion, impact (CRITICAL|SERIOUS|MODERATE|MINOR), \
         description, help_text, help_url, html_snippet, selector, ai_explanation, \
         ai_fix_suggestion, ai_priority."
    )?;
    writeln!(p, "Do not wrap the array in prose.")?;
    Ok(p)
}
