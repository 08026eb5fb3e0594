//! Field extraction: vendor, invoice number, dates and amounts from OCR text.
//!
//! Pure and total: the same pages always give the same fields, and nothing
//! here can fail. A field that cannot be read with any confidence is `None`.
//!
//! Header fields (vendor, invoice number, invoice date) come from the first
//! page only; later pages are terms, line items and signatures, which are
//! full of look-alike dates and codes. Amounts and the due date are searched
//! across all pages because totals usually sit on the last one.
//!
//! Each field is tried in tiers and the first tier that finds something
//! wins:
//!
//! | Tier | Meaning |
//! |------|---------|
//! | `HIGH`   | value next to a label ("Invoice No.", "Grand Total", …) |
//! | `MEDIUM` | a recognisable pattern without a label |
//! | `LOW`    | positional or "largest number" fallback |

use crate::output::{Confidence, Currency, ExtractedFields, Field};
use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

// ── Building blocks ──────────────────────────────────────────────────────

/// A date token: ISO, day/month/year with `-` `/` `.`, or with a month name.
const DATE: &str = r"(?:\d{4}[-/.]\d{1,2}[-/.]\d{1,2}|\d{1,2}[-/.]\d{1,2}[-/.]\d{2,4}|\d{1,2}[ -](?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?,?[ -]\d{2,4}|(?:jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.? \d{1,2},? \d{4})";

/// An amount with optional grouping and decimal part, in any of the common
/// separator conventions. Interpreted by [`parse_amount`].
const NUM: &str = r"\d+(?:[,.'\x{A0}]\d{2,3}| \d{3})*(?:[.,]\d{1,2})?";

/// Optional currency marker in front of an amount.
const CUR: &str = r"(?:[₹$€£]|\brs\.?|\binr\b|\busd\b|\beur\b|\bgbp\b)";

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

static RE_DATE_ANY: Lazy<Regex> = Lazy::new(|| re(&format!(r"(?i)\b({DATE})\b")));

static RE_INVOICE_DATE: Lazy<Regex> = Lazy::new(|| {
    re(&format!(
        r"(?i)\b(?:invoice[ \t]*date|bill[ \t]*date|date[ \t]*of[ \t]*(?:issue|invoice)|issue[ \t]*date|issued[ \t]*on|issued|dated|date)\b[ \t]*[:\-]?[ \t]*({DATE})\b"
    ))
});

static RE_DUE_DATE: Lazy<Regex> = Lazy::new(|| {
    re(&format!(
        r"(?i)\b(?:payment[ \t]*due[ \t]*date|due[ \t]*date|payment[ \t]*due|pay[ \t]*by|due[ \t]*on|due[ \t]*by)\b[ \t]*[:\-]?[ \t]*({DATE})\b"
    ))
});

static RE_INVOICE_NO_LABEL: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)\b(?:invoice|inv|bill|receipt|ref(?:erence)?)\b[ \t]*(?:no\.?|number|num|#|id)?[ \t]*[:#]?[ \t]*([A-Z0-9][A-Z0-9\-/]{2,})")
});

static RE_HASH_TOKEN: Lazy<Regex> = Lazy::new(|| re(r"(?i)#[ \t]*([A-Z0-9][A-Z0-9\-]{4,19})"));

static RE_CODE_TOKEN: Lazy<Regex> =
    Lazy::new(|| re(r"\b([A-Z]{2,5}[-/]?\d{3,}[A-Z0-9\-/]*)\b"));

static RE_VENDOR_LABEL: Lazy<Regex> = Lazy::new(|| {
    re(r"(?im)^[ \t]*(?:from|vendor(?:[ \t]*name)?|supplier|seller|sold[ \t]*by|billed[ \t]*by|company(?:[ \t]*name)?)[ \t]*[:\-][ \t]*([^\n]+)$")
});

static RE_COMPANY_SUFFIX: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)\b(?:pvt\.?[ \t]*ltd|private[ \t]+limited|ltd|limited|inc|llc|llp|gmbh|corp|corporation|plc)\b")
});

static RE_STRONG_TOTAL: Lazy<Regex> = Lazy::new(|| {
    re(&format!(
        r"(?i)\b(?:grand[ \t]*total|total[ \t]*amount(?:[ \t]*due|[ \t]*payable)?|total[ \t]*payable|total[ \t]*due|amount[ \t]*due|amount[ \t]*payable|balance[ \t]*due|net[ \t]*payable|net[ \t]*amount)\b[ \t]*(?:\([^)\n]*\))?[ \t]*[:\-]?[ \t]*{CUR}?[ \t]*({NUM})"
    ))
});

static RE_PLAIN_TOTAL: Lazy<Regex> = Lazy::new(|| {
    re(&format!(
        r"(?i)\btotal\b[ \t]*(?:\([^)\n]*\))?[ \t]*[:\-]?[ \t]*{CUR}?[ \t]*({NUM})"
    ))
});

static RE_SUBTOTAL: Lazy<Regex> = Lazy::new(|| {
    re(&format!(
        r"(?i)\b(?:sub[ \t]*-?[ \t]*total|taxable[ \t]*(?:value|amount))\b[ \t]*(?:\([^)\n]*\))?[ \t]*[:\-]?[ \t]*{CUR}?[ \t]*({NUM})"
    ))
});

static RE_TAX: Lazy<Regex> = Lazy::new(|| {
    re(&format!(
        r"(?i)\b(?:total[ \t]*tax|tax[ \t]*amount|igst|cgst|sgst|gst|vat|tax)\b[ \t]*(?:\(?[ \t]*\d{{1,2}}(?:\.\d+)?[ \t]*%[ \t]*\)?)?[ \t]*[:\-]?[ \t]*{CUR}?[ \t]*({NUM})"
    ))
});

static RE_CURRENCY_AMOUNT: Lazy<Regex> =
    Lazy::new(|| re(&format!(r"(?i){CUR}[ \t]*({NUM})")));

static RE_DECIMAL_AMOUNT: Lazy<Regex> =
    Lazy::new(|| re(r"\b(\d+(?:[,'\x{A0}]\d{3})*[.,]\d{2})\b"));

static RE_CURRENCY: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)(₹|€|£|\$|\binr\b|\busd\b|\beur\b|\bgbp\b|\brs\b)"));

/// Title lines that are never the vendor.
const GENERIC_HEADINGS: &[&str] = &[
    "invoice",
    "tax invoice",
    "retail invoice",
    "proforma invoice",
    "commercial invoice",
    "bill",
    "bill of supply",
    "receipt",
    "cash memo",
    "estimate",
    "quotation",
    "original",
    "duplicate",
    "original for recipient",
    "statement",
];

// ── Entry point ──────────────────────────────────────────────────────────

/// Extract business fields from the raw text of each page, in page order.
pub fn extract_fields(pages: &[String]) -> ExtractedFields {
    let first = pages.first().map(String::as_str).unwrap_or("");
    let all = pages.join("\n");

    let fields = ExtractedFields {
        vendor_name: vendor_name(first),
        invoice_number: invoice_number(first),
        invoice_date: invoice_date(first),
        due_date: due_date(&all),
        total_amount: total_amount(&all),
        tax_amount: labelled_amount(&RE_TAX, &all),
        subtotal: labelled_amount(&RE_SUBTOTAL, &all),
        currency: currency(&all),
    };
    debug!(
        "Extracted {}/4 key fields from {} pages",
        fields.key_fields_found(),
        pages.len()
    );
    fields
}

// ── Vendor ───────────────────────────────────────────────────────────────

fn vendor_name(text: &str) -> Option<Field<String>> {
    if let Some(caps) = RE_VENDOR_LABEL.captures(text) {
        if let Some(name) = clean_vendor(&caps[1]) {
            return Some(Field::new(name, Confidence::High));
        }
    }

    let head: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(15)
        .collect();

    if let Some(line) = head.iter().find(|l| RE_COMPANY_SUFFIX.is_match(l)) {
        if let Some(name) = clean_vendor(line) {
            return Some(Field::new(name, Confidence::Medium));
        }
    }

    head.iter()
        .take(10)
        .filter(|l| l.chars().count() >= 5)
        .filter(|l| l.chars().filter(|c| c.is_alphabetic()).count() >= 3)
        .filter(|l| !is_generic_heading(l))
        .find_map(|l| clean_vendor(l))
        .map(|name| Field::new(name, Confidence::Low))
}

fn clean_vendor(raw: &str) -> Option<String> {
    let name: String = raw
        .trim()
        .trim_end_matches([',', ';', ':', '-'])
        .chars()
        .take(80)
        .collect();
    let name = name.trim();
    (name.chars().filter(|c| c.is_alphabetic()).count() >= 2).then(|| name.to_string())
}

fn is_generic_heading(line: &str) -> bool {
    let key = line
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    GENERIC_HEADINGS.contains(&key.as_str())
}

// ── Invoice number ───────────────────────────────────────────────────────

fn invoice_number(text: &str) -> Option<Field<String>> {
    let usable = |token: &str| {
        let token = token.trim_end_matches(['-', '/']);
        (token.chars().any(|c| c.is_ascii_digit()) && parse_date(token).is_none())
            .then(|| token.to_string())
    };

    RE_INVOICE_NO_LABEL
        .captures_iter(text)
        .find_map(|c| usable(&c[1]))
        .map(|v| Field::new(v, Confidence::High))
        .or_else(|| {
            RE_HASH_TOKEN
                .captures_iter(text)
                .chain(RE_CODE_TOKEN.captures_iter(text))
                .find_map(|c| usable(&c[1]))
                .map(|v| Field::new(v, Confidence::Medium))
        })
}

// ── Dates ────────────────────────────────────────────────────────────────

fn invoice_date(text: &str) -> Option<Field<NaiveDate>> {
    let labelled = RE_INVOICE_DATE.captures_iter(text).find_map(|c| {
        let whole = c.get(0)?;
        let before = line_before(text, whole.start());
        let before = before.trim_end();
        if before.ends_with("due") || before.ends_with("pay") {
            return None;
        }
        parse_date(&c[1])
    });
    if let Some(d) = labelled {
        return Some(Field::new(d, Confidence::High));
    }

    RE_DATE_ANY
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter(|m| {
            let line = line_around(text, m.start(), m.end());
            !line.contains("due") && !line.contains("pay by")
        })
        .find_map(|m| parse_date(m.as_str()))
        .map(|d| Field::new(d, Confidence::Medium))
}

fn due_date(text: &str) -> Option<Field<NaiveDate>> {
    RE_DUE_DATE
        .captures_iter(text)
        .find_map(|c| parse_date(&c[1]))
        .map(|d| Field::new(d, Confidence::High))
}

/// Parse one date token, trying day-first before month-first.
pub fn parse_date(token: &str) -> Option<NaiveDate> {
    let token = token.trim();

    if token.chars().any(|c| c.is_ascii_alphabetic()) {
        let spaced = token.replace(['-', ','], " ").replace('.', "");
        let cleaned = spaced.split_whitespace().collect::<Vec<_>>().join(" ");
        return ["%d %B %Y", "%d %B %y", "%B %d %Y"]
            .iter()
            .filter_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
            .find(|d| plausible(*d));
    }

    let parts: Vec<&str> = token.split(['-', '/', '.']).collect();
    let [a, b, c] = parts.as_slice() else {
        return None;
    };
    let num = |s: &str| s.parse::<u32>().ok();

    let candidates: Vec<(i32, u32, u32)> = if a.len() == 4 {
        vec![(num(a)? as i32, num(b)?, num(c)?)]
    } else {
        let year = match c.len() {
            4 => num(c)? as i32,
            2 => 2000 + num(c)? as i32,
            _ => return None,
        };
        let (x, y) = (num(a)?, num(b)?);
        // dd/mm first, then mm/dd.
        vec![(year, y, x), (year, x, y)]
    };

    candidates
        .into_iter()
        .filter_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
        .find(|d| plausible(*d))
}

fn plausible(d: NaiveDate) -> bool {
    (1970..=2099).contains(&d.year())
}

/// Lower-cased text of the current line up to byte offset `at`.
fn line_before(text: &str, at: usize) -> String {
    let start = text[..at].rfind('\n').map_or(0, |i| i + 1);
    text[start..at].to_lowercase()
}

/// Lower-cased full line containing `start..end`.
fn line_around(text: &str, start: usize, end: usize) -> String {
    let from = text[..start].rfind('\n').map_or(0, |i| i + 1);
    let to = text[end..].find('\n').map_or(text.len(), |i| end + i);
    text[from..to].to_lowercase()
}

// ── Amounts ──────────────────────────────────────────────────────────────

fn total_amount(text: &str) -> Option<Field<f64>> {
    if let Some(v) = last_labelled(&RE_STRONG_TOTAL, text, false) {
        return Some(Field::new(v, Confidence::High));
    }
    if let Some(v) = last_labelled(&RE_PLAIN_TOTAL, text, true) {
        return Some(Field::new(v, Confidence::High));
    }

    let marked = RE_CURRENCY_AMOUNT
        .captures_iter(text)
        .filter_map(|c| parse_amount(&c[1]));
    if let Some(v) = largest(marked) {
        return Some(Field::new(v, Confidence::Medium));
    }

    // Dates look like decimals ("15.03" in 15.03.2024); blank them first.
    let without_dates = RE_DATE_ANY.replace_all(text, " ");
    let decimals = RE_DECIMAL_AMOUNT
        .captures_iter(&without_dates)
        .filter_map(|c| parse_amount(&c[1]));
    largest(decimals).map(|v| Field::new(v, Confidence::Low))
}

/// Last positive amount captured by `re`. With `skip_sub`, matches preceded
/// by "sub" on the same line ("Sub-total") are ignored.
fn last_labelled(re: &Regex, text: &str, skip_sub: bool) -> Option<f64> {
    re.captures_iter(text)
        .filter(|c| {
            !skip_sub
                || c.get(0).is_none_or(|m| {
                    !line_before(text, m.start())
                        .trim_end_matches(['-', ' ', '\t'])
                        .ends_with("sub")
                })
        })
        .filter_map(|c| parse_amount(&c[1]))
        .filter(|v| *v > 0.0)
        .last()
}

fn largest(values: impl Iterator<Item = f64>) -> Option<f64> {
    values.filter(|v| *v > 0.0).reduce(f64::max)
}

fn labelled_amount(re: &Regex, text: &str) -> Option<Field<f64>> {
    re.captures_iter(text)
        .filter_map(|c| parse_amount(&c[1]))
        .find(|v| *v > 0.0)
        .map(|v| Field::new(v, Confidence::High))
}

/// Interpret an amount token regardless of separator convention.
///
/// The last `,` or `.` is the decimal point when one or two digits follow
/// it; every other separator is grouping. `1,234.56`, `1.234,56`,
/// `1 234,56` and `1,23,456.00` all parse as expected; `1.234` is read as
/// one thousand two hundred thirty-four.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let s: String = raw
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{a0}' | '\''))
        .collect();

    let normalized = match s.rfind([',', '.']) {
        Some(i) if (1..=2).contains(&(s.len() - i - 1)) => {
            let (int, frac) = s.split_at(i);
            format!("{}.{}", int.replace([',', '.'], ""), &frac[1..])
        }
        _ => s.replace([',', '.'], ""),
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

// ── Currency ─────────────────────────────────────────────────────────────

fn currency(text: &str) -> Option<Field<Currency>> {
    let m = RE_CURRENCY.find(text)?;
    let token = m.as_str().to_lowercase();
    let (currency, confidence) = match token.as_str() {
        "₹" | "inr" => (Currency::INR, Confidence::High),
        "rs" => (Currency::INR, Confidence::Medium),
        "$" | "usd" => (Currency::USD, Confidence::High),
        "€" | "eur" => (Currency::EUR, Confidence::High),
        "£" | "gbp" => (Currency::GBP, Confidence::High),
        _ => return None,
    };
    Some(Field::new(currency, confidence))
}
