//! Invoice number templates, e.g. `{prefix}-{year}-{seq:05}`.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use forgebill_core::{DomainError, DomainResult};

pub const DEFAULT_FORMAT: &str = "{prefix}-{seq:04}";

const MAX_SEQ_WIDTH: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Prefix,
    Year,
    Month,
    Seq { width: usize },
}

/// A parsed invoice number template.
///
/// Supported tokens: `{prefix}`, `{year}`, `{month}`, `{seq}` and `{seq:N}`.
/// Every template must contain exactly one sequence token so numbers stay
/// unique and traceable to generation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvoiceNumberFormat {
    source: String,
    segments: Vec<Segment>,
}

impl InvoiceNumberFormat {
    pub fn parse(template: &str) -> DomainResult<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut seq_tokens = 0;
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut token = String::new();
                    let mut closed = false;
                    for t in chars.by_ref() {
                        if t == '}' {
                            closed = true;
                            break;
                        }
                        token.push(t);
                    }
                    if !closed {
                        return Err(DomainError::validation(format!(
                            "unterminated token in invoice number format {template:?}"
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let segment = parse_token(&token)?;
                    if matches!(segment, Segment::Seq { .. }) {
                        seq_tokens += 1;
                    }
                    segments.push(segment);
                }
                '}' => {
                    return Err(DomainError::validation(format!(
                        "unbalanced '}}' in invoice number format {template:?}"
                    )));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        if seq_tokens != 1 {
            return Err(DomainError::validation(format!(
                "invoice number format {template:?} must contain exactly one {{seq}} token"
            )));
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn render(&self, prefix: &str, sequence: u64, issue_date: NaiveDate) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Prefix => out.push_str(prefix),
                Segment::Year => out.push_str(&format!("{:04}", issue_date.year())),
                Segment::Month => out.push_str(&format!("{:02}", issue_date.month())),
                Segment::Seq { width } => out.push_str(&format!("{sequence:0width$}")),
            }
        }
        out
    }
}

fn parse_token(token: &str) -> DomainResult<Segment> {
    match token {
        "prefix" => Ok(Segment::Prefix),
        "year" => Ok(Segment::Year),
        "month" => Ok(Segment::Month),
        "seq" => Ok(Segment::Seq { width: 1 }),
        other => {
            let width = other
                .strip_prefix("seq:")
                .and_then(|w| w.parse::<usize>().ok())
                .filter(|w| (1..=MAX_SEQ_WIDTH).contains(w))
                .ok_or_else(|| {
                    DomainError::validation(format!("unknown invoice number token {{{other}}}"))
                })?;
            Ok(Segment::Seq { width })
        }
    }
}

impl Default for InvoiceNumberFormat {
    fn default() -> Self {
        Self {
            source: DEFAULT_FORMAT.to_string(),
            segments: vec![
                Segment::Prefix,
                Segment::Literal("-".to_string()),
                Segment::Seq { width: 4 },
            ],
        }
    }
}

impl core::fmt::Display for InvoiceNumberFormat {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.source)
    }
}

impl TryFrom<String> for InvoiceNumberFormat {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InvoiceNumberFormat> for String {
    fn from(value: InvoiceNumberFormat) -> Self {
        value.source
    }
}
