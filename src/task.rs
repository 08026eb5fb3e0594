//! Maps extracted invoice fields to a suggested payment task.
//!
//! The OCR core never creates tasks itself; this is the mapping a
//! task-creation collaborator can apply to an [`OcrResult`](crate::OcrResult).

use crate::output::{Currency, ExtractedFields};
use chrono::NaiveDate;
use serde::Serialize;

/// Amounts above this raise the priority by one level.
pub const LARGE_AMOUNT: f64 = 100_000.0;

/// Characters of OCR text quoted in the description.
const EXCERPT_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    /// Priority from the number of days left until the due date.
    pub fn from_days_until_due(days: i64) -> Self {
        match days {
            d if d < 3 => TaskPriority::Urgent,
            d if d < 7 => TaskPriority::High,
            d if d < 14 => TaskPriority::Medium,
            _ => TaskPriority::Low,
        }
    }

    /// Large amounts lift `Low` and `Medium` one level. `High` and `Urgent`
    /// are left alone.
    fn bump(self) -> Self {
        match self {
            TaskPriority::Low => TaskPriority::Medium,
            TaskPriority::Medium => TaskPriority::High,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedTask {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    pub priority: TaskPriority,
}

/// Build a payment task from the fields of one document.
///
/// `today` anchors the due-date priority; pass `Local::now().date_naive()`
/// in production.
pub fn suggest_task(fields: &ExtractedFields, ocr_text: &str, today: NaiveDate) -> SuggestedTask {
    let symbol = fields
        .currency
        .as_ref()
        .map_or(Currency::INR, |c| c.value)
        .symbol();
    let vendor = fields.vendor_name.as_ref().map(|f| f.value.as_str());
    let total = fields.total_amount.as_ref().map(|f| f.value);

    let mut title = String::from("Payment");
    if let Some(v) = vendor {
        title.push_str(" – ");
        title.push_str(v);
    }
    if let Some(t) = total {
        title.push_str(&format!(" – {symbol}{}", format_amount(t)));
    }

    let mut description = String::from("**Invoice Payment Request**\n\n");
    let mut line = |label: &str, value: Option<String>| {
        if let Some(v) = value {
            description.push_str(&format!("**{label}:** {v}\n"));
        }
    };
    line("Vendor", vendor.map(str::to_string));
    line(
        "Invoice #",
        fields.invoice_number.as_ref().map(|f| f.value.clone()),
    );
    line(
        "Invoice Date",
        fields.invoice_date.as_ref().map(|f| f.value.to_string()),
    );
    line(
        "Due Date",
        fields.due_date.as_ref().map(|f| f.value.to_string()),
    );
    line(
        "Total Amount",
        total.map(|t| format!("{symbol}{}", format_amount(t))),
    );
    line(
        "Tax Amount",
        fields
            .tax_amount
            .as_ref()
            .map(|f| format!("{symbol}{}", format_amount(f.value))),
    );

    description.push_str("\n---\n\n**OCR Extract (first 500 chars):**\n```\n");
    description.extend(ocr_text.chars().take(EXCERPT_CHARS));
    if ocr_text.chars().nth(EXCERPT_CHARS).is_some() {
        description.push_str("...");
    }
    description.push_str("\n```");

    let due_date = fields.due_date.as_ref().map(|f| f.value);
    let mut priority = due_date.map_or(TaskPriority::Medium, |due| {
        TaskPriority::from_days_until_due((due - today).num_days())
    });
    if total.is_some_and(|t| t > LARGE_AMOUNT) {
        priority = priority.bump();
    }

    SuggestedTask {
        title,
        description,
        due_date,
        priority,
    }
}

/// `118000.5` → `118,000.5`.
fn format_amount(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let digits = (cents / 100).to_string();
    let mut out = String::with_capacity(digits.len() + 6);
    if amount < 0.0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    let frac = cents % 100;
    if frac != 0 {
        out.push('.');
        out.push_str(format!("{frac:02}").trim_end_matches('0'));
    }
    out
}
