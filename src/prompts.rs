//! Prompts for voter-list page extraction.
//!
//! Every page gets the same fixed instruction. Callers can override it via
//! [`crate::config::ExtractionConfig::system_prompt`]; whatever the prompt
//! says, the response still goes through the tolerant parser in
//! [`crate::pipeline::parse`].

/// Default instruction sent with every page image.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are reading one scanned page of an Indian electoral roll (voter list) printed in Marathi.

Parse this image of a voter-list page and return a list of records with the fields name, age, gender, address, epic_number.

Rules:
1. One record per elector box on the page. Keep the order in which boxes appear (left to right, top to bottom).
2. Copy text in the language and script as printed. Do not translate or transliterate names or addresses.
3. "age" is the number printed after the age label (वय). Use digits as printed.
4. "gender" is the value printed after the gender label (लिंग), e.g. पुरुष or स्त्री.
5. "address" is the house number / address line of the elector, if printed.
6. "epic_number" is the alphanumeric elector ID printed at the top of the box (e.g. ABC1234567).
7. If a field is illegible or missing, use an empty string "" for it. Never guess.
8. Ignore page headers, footers, section titles, photos and summary tables.

Output format:
Return ONLY a JSON array, no commentary and no markdown fences:
[{"name": "...", "age": "...", "gender": "...", "address": "...", "epic_number": "..."}]
If the page contains no elector records, return []."#;

/// User-turn text accompanying the image.
pub fn page_instruction(page_num: usize) -> String {
    format!("Page {page_num} of the voter list. Return the JSON array of records.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_every_field() {
        for field in ["name", "age", "gender", "address", "epic_number"] {
            assert!(DEFAULT_SYSTEM_PROMPT.contains(field), "missing {field}");
        }
    }

    #[test]
    fn prompt_asks_for_empty_values_not_guesses() {
        assert!(DEFAULT_SYSTEM_PROMPT.contains("empty string"));
        assert!(DEFAULT_SYSTEM_PROMPT.contains("as printed"));
    }
}
