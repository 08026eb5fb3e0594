//! Result types returned to the caller.

use crate::error::PageError;
use crate::registry::{JobId, JobStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Separator placed between pages by [`OcrResult::text`].
pub const PAGE_BREAK: &str = "\n\n--- PAGE BREAK ---\n\n";

/// Structured output of one OCR job. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub job_id: JobId,
    /// `Completed` for a returned result, `TimedOut` for the partial result
    /// carried by [`crate::error::OcrError::Timeout`].
    pub status: JobStatus,
    pub pages_processed: usize,
    /// Page count of the source document, before the page cap.
    pub total_pages: usize,
    /// Fewer pages were processed than the document has.
    pub truncated: bool,
    pub extracted_fields: ExtractedFields,
    pub raw_text_by_page: Vec<String>,
    /// Non-fatal per-page problems.
    pub warnings: Vec<PageError>,
    pub created_at: DateTime<Utc>,
    /// Time spent waiting for a gate slot.
    pub queue_wait_ms: u64,
    /// Time from admission to assembly.
    pub processing_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<OcrDebug>,
}

impl OcrResult {
    /// All page texts joined with [`PAGE_BREAK`].
    pub fn text(&self) -> String {
        self.raw_text_by_page.join(PAGE_BREAK)
    }

    pub fn is_partial(&self) -> bool {
        self.truncated || !self.warnings.is_empty()
    }
}

/// Raw OCR output for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    /// 0-based page index in the source document.
    pub page_index: usize,
    pub raw_text: String,
    pub processing_ms: u64,
}

/// Diagnostics attached when debug output is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrDebug {
    pub engine: String,
    pub language: String,
    pub page_limit: usize,
    pub timeout_ms: u64,
    pub pages: Vec<PageResult>,
}

/// How a field value was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    /// Fallback heuristic.
    Low,
    /// Pattern match without a label.
    Medium,
    /// Match adjacent to a label such as "Invoice No." or "Total".
    High,
}

/// A field value together with its confidence tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field<T> {
    pub value: T,
    pub confidence: Confidence,
}

impl<T> Field<T> {
    pub fn new(value: T, confidence: Confidence) -> Self {
        Self { value, confidence }
    }
}

/// Currency detected from symbols or ISO codes in the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    INR,
    USD,
    EUR,
    GBP,
}

impl Currency {
    pub fn symbol(self) -> &'static str {
        match self {
            Currency::INR => "₹",
            Currency::USD => "$",
            Currency::EUR => "€",
            Currency::GBP => "£",
        }
    }
}

/// Business fields parsed from the OCR text. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_name: Option<Field<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_number: Option<Field<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invoice_date: Option<Field<NaiveDate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<Field<NaiveDate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<Field<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_amount: Option<Field<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<Field<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<Field<Currency>>,
}

impl ExtractedFields {
    /// Number of the four header fields (vendor, number, date, total) found.
    pub fn key_fields_found(&self) -> usize {
        [
            self.vendor_name.is_some(),
            self.invoice_number.is_some(),
            self.invoice_date.is_some(),
            self.total_amount.is_some(),
        ]
        .iter()
        .filter(|found| **found)
        .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OcrResult {
        OcrResult {
            job_id: JobId::new(),
            status: JobStatus::Completed,
            pages_processed: 2,
            total_pages: 3,
            truncated: true,
            extracted_fields: ExtractedFields::default(),
            raw_text_by_page: vec!["one".into(), "two".into()],
            warnings: vec![],
            created_at: Utc::now(),
            queue_wait_ms: 0,
            processing_ms: 12,
            debug: None,
        }
    }

    #[test]
    fn text_joins_pages() {
        assert_eq!(sample().text(), "one\n\n--- PAGE BREAK ---\n\ntwo");
    }

    #[test]
    fn serialises_camel_case_and_omits_debug() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["pagesProcessed"], 2);
        assert_eq!(json["truncated"], true);
        assert_eq!(json["status"], "completed");
        assert!(json.get("debug").is_none());
    }

    #[test]
    fn confidence_orders_low_to_high() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
        let json = serde_json::to_string(&Confidence::High).unwrap();
        assert_eq!(json, "\"HIGH\"");
    }
}
