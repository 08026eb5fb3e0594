//! Prompts for the vision-model OCR backend.
//!
//! Kept in one place so prompt changes never touch the engine's error
//! handling, and so tests can inspect them without a provider.

/// System prompt asking for a verbatim transcription.
///
/// The field extractor works on plain text the way a classic OCR engine emits
/// it, so the model is told not to summarise, translate or reformat.
pub const TRANSCRIBE_SYSTEM_PROMPT: &str = r#"You are an OCR engine. Transcribe every piece of text visible in the page image exactly as printed.

Rules:
1. Output plain text only. No Markdown, no code fences, no commentary.
2. Keep the reading order a human would use, one printed line per output line.
3. Copy numbers, dates, currency symbols and reference codes character for character. Never reformat or round them.
4. Keep table rows on one line, separating cells with two spaces.
5. Do not translate, correct, summarise or invent text. If a word is illegible, skip it.
6. If the page has no text, output nothing."#;

/// Human-readable names for the tesseract language codes we expect.
fn language_name(code: &str) -> &str {
    match code {
        "eng" => "English",
        "hin" => "Hindi",
        "deu" => "German",
        "fra" => "French",
        "spa" => "Spanish",
        "ita" => "Italian",
        "por" => "Portuguese",
        "nld" => "Dutch",
        "tam" => "Tamil",
        "tel" => "Telugu",
        "ben" => "Bengali",
        "mar" => "Marathi",
        other => other,
    }
}

/// User-turn text carrying the language hint, e.g. `eng+hin` →
/// "The page is written in English and Hindi."
pub fn language_instruction(language: &str) -> String {
    let names: Vec<&str> = language
        .split('+')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(language_name)
        .collect();
    match names.as_slice() {
        [] => "Transcribe this page.".to_string(),
        [one] => format!("The page is written in {one}. Transcribe it."),
        [init @ .., last] => format!(
            "The page is written in {} and {last}. Transcribe it.",
            init.join(", ")
        ),
    }
}
