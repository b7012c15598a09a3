use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceLevel {
    A,
    AA,
    AAA,
}

impl ComplianceLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A" => Some(ComplianceLevel::A),
            "AA" => Some(ComplianceLevel::AA),
            "AAA" => Some(ComplianceLevel::AAA),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceLevel::A => "A",
            ComplianceLevel::AA => "AA",
            ComplianceLevel::AAA => "AAA",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingScan {
    pub job_id: String,
    pub url: String,
    pub compliance_level: ComplianceLevel,
    pub contact_email: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedRow {
    pub row_number: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedInput {
    pub scans: Vec<PendingScan>,
    pub skipped: Vec<SkippedRow>,
    pub total_rows: usize,
}

/// Reads a pending-scan CSV. Only an unreadable file is an error; every
/// per-row problem lands in `skipped` with its 1-based row number (the
/// header is row 1).
pub fn parse_input_file(path: &Path) -> Result<ParsedInput> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading input: {}", path.display()))?;
    Ok(parse_rows(&raw))
}

pub fn parse_rows(raw: &str) -> ParsedInput {
    let mut scans = Vec::new();
    let mut skipped = Vec::new();
    let mut total_rows = 0usize;

    for (idx, line) in raw.lines().enumerate() {
        let row_number = idx + 1;
        if row_number == 1 || line.trim().is_empty() {
            continue;
        }
        total_rows += 1;

        let fields = split_fields(line);
        let field = |i: usize| fields.get(i).map(String::as_str).unwrap_or("").trim().to_string();

        let job_id = field(0);
        let url = field(1);
        let level = field(2);
        let email = field(3);
        let created_at = field(4);

        if job_id.is_empty() {
            skipped.push(SkippedRow {
                row_number,
                reason: "Empty job id".to_string(),
            });
            continue;
        }
        if url.is_empty() {
            skipped.push(SkippedRow {
                row_number,
                reason: "Empty URL".to_string(),
            });
            continue;
        }
        if !is_valid_url(&url) {
            skipped.push(SkippedRow {
                row_number,
                reason: "Invalid URL".to_string(),
            });
            continue;
        }
        let Some(compliance_level) = ComplianceLevel::parse(&level) else {
            skipped.push(SkippedRow {
                row_number,
                reason: format!("Invalid compliance level: {level}"),
            });
            continue;
        };

        let created_at = if created_at.is_empty() {
            None
        } else if time::OffsetDateTime::parse(&created_at, &Rfc3339).is_ok() {
            Some(created_at)
        } else {
            warn!("row {row_number}: unparseable created-at dropped: {created_at}");
            None
        };

        scans.push(PendingScan {
            job_id,
            url,
            compliance_level,
            contact_email: (!email.is_empty()).then_some(email),
            created_at,
        });
    }

    ParsedInput {
        scans,
        skipped,
        total_rows,
    }
}

fn is_valid_url(s: &str) -> bool {
    let rest = if let Some(r) = s.strip_prefix("https://") {
        r
    } else if let Some(r) = s.strip_prefix("http://") {
        r
    } else {
        return false;
    };
    let host = rest.split('/').next().unwrap_or("");
    !host.is_empty() && !s.chars().any(char::is_whitespace)
}

// Minimal RFC-4180 field splitting: quoted fields may contain commas,
// doubled quotes unescape to one quote. Records never span lines in this
// input format.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}
