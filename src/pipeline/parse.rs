//! Response parsing: free-form model output → typed [`VoterRecord`]s.
//!
//! Vision models are told to answer with a bare JSON array, and mostly do.
//! The rest of the time they wrap it in ```` ```json ```` fences, put a
//! sentence in front, nest it under a `"voters"` key, rename fields, emit
//! ages as numbers, or run out of tokens half-way through the array.
//! [`parse_records`] accepts all of those. It is a pure function so it can be
//! tested without any inference call.
//!
//! ## Resolution order
//!
//! 1. Strip a BOM / zero-width spaces, then take the first fenced block if any
//! 2. Parse the whole text as JSON; failing that, the first `[` / `{` that
//!    starts a JSON value holding records, salvaging complete objects from
//!    a truncated array along the way
//! 3. Locate the record list: a top-level array, a known container key, any
//!    array-of-objects value, or a single record object
//! 4. Map each object to a record by normalised key; unknown keys are ignored,
//!    missing keys become empty values, all-empty entries are dropped
//!
//! ZWJ / ZWNJ are left alone: they change how Devanagari conjuncts render.

use crate::record::{Age, VoterRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

/// Why a response could not be turned into a record list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("response is empty")]
    Empty,

    #[error("no JSON found in response (starts with {0:?})")]
    NoJson(String),

    #[error("JSON does not contain a record list: {0}")]
    NotARecordList(String),
}

/// Keys that commonly wrap the list, checked in this order.
const CONTAINER_KEYS: &[&str] = &[
    "voters", "records", "data", "entries", "items", "results", "electors", "voterlist",
];

const NAME_KEYS: &[&str] = &["name", "fullname", "votername", "electorname", "नाव", "मतदाराचेनाव"];
const AGE_KEYS: &[&str] = &["age", "वय"];
const GENDER_KEYS: &[&str] = &["gender", "sex", "लिंग"];
const ADDRESS_KEYS: &[&str] = &["address", "houseno", "housenumber", "houseaddress", "पत्ता", "घरक्रमांक"];
const EPIC_KEYS: &[&str] = &[
    "epicnumber", "epic", "epicno", "epicid", "voterid", "voteridnumber", "electorid",
];

/// Placeholder values models use for "could not read".
const PLACEHOLDERS: &[&str] = &["null", "none", "n/a", "na", "-", "--"];

/// Nesting depth searched for a container key.
const MAX_CONTAINER_DEPTH: usize = 3;

static RE_FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Parse one page's raw model output.
///
/// `Ok(vec![])` means the model answered with an empty list: the page
/// succeeded and has no electors. Anything that is not a record list is an
/// error so the caller can count the page as failed.
pub fn parse_records(raw: &str) -> Result<Vec<VoterRecord>, ParseError> {
    let cleaned = raw.replace(['\u{FEFF}', '\u{200B}'], "");
    let text = unfence(cleaned.trim()).trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let value = find_json(text).ok_or_else(|| ParseError::NoJson(preview(text)))?;
    let entries = record_list(&value, 0)?;

    let mut objects = 0usize;
    let mut records = Vec::with_capacity(entries.len());
    for entry in &entries {
        if let Value::Object(obj) = entry {
            objects += 1;
            let record = record_from_object(obj);
            if !record.is_blank() {
                records.push(record);
            }
        }
    }

    if objects == 0 && !entries.is_empty() {
        return Err(ParseError::NotARecordList(format!(
            "{} entries, none of them objects",
            entries.len()
        )));
    }
    Ok(records)
}

fn unfence(text: &str) -> &str {
    match RE_FENCED_BLOCK.captures(text).and_then(|c| c.get(1)) {
        Some(body) => body.as_str(),
        None => text,
    }
}

fn preview(text: &str) -> String {
    text.chars().take(40).collect()
}

/// Locate the JSON array or object in `text` that holds the records.
///
/// Brackets in surrounding prose ("Page [3] of 40") also parse as JSON, so
/// every `[` / `{` is tried until one yields a record list. If none does,
/// the first JSON value seen is returned so the caller can report why.
fn find_json(text: &str) -> Option<Value> {
    let mut first = None;
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        if v.is_array() || v.is_object() {
            if holds_records(&v) {
                return Some(v);
            }
            first = Some(v);
        }
    }

    for (pos, ch) in text.char_indices() {
        if ch != '[' && ch != '{' {
            continue;
        }
        let mut stream = serde_json::Deserializer::from_str(&text[pos..]).into_iter::<Value>();
        let candidate = match stream.next() {
            Some(Ok(v)) => Some(v),
            _ if ch == '[' => salvage_truncated_array(&text[pos..]).map(Value::Array),
            _ => None,
        };
        if let Some(v) = candidate {
            if holds_records(&v) {
                return Some(v);
            }
            first.get_or_insert(v);
        }
    }
    first
}

/// An empty list, or a list with at least one object in it.
fn holds_records(value: &Value) -> bool {
    record_list(value, 0)
        .is_ok_and(|items| items.is_empty() || items.iter().any(Value::is_object))
}

/// Recover the complete leading elements of an array cut off mid-way.
fn salvage_truncated_array(text: &str) -> Option<Vec<Value>> {
    let mut rest = text.strip_prefix('[')?;
    let mut items = Vec::new();
    loop {
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == ',');
        if rest.is_empty() || rest.starts_with(']') {
            break;
        }
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        match stream.next() {
            Some(Ok(v)) if v.is_object() => {
                items.push(v);
                rest = &rest[stream.byte_offset()..];
            }
            _ => break,
        }
    }
    (!items.is_empty()).then_some(items)
}

fn record_list(value: &Value, depth: usize) -> Result<Vec<Value>, ParseError> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(obj) => {
            if looks_like_record(obj) {
                return Ok(vec![value.clone()]);
            }
            if depth < MAX_CONTAINER_DEPTH {
                if let Some(inner) = container_value(obj) {
                    return record_list(inner, depth + 1);
                }
            }
            Err(ParseError::NotARecordList(format!(
                "object with keys {:?}",
                obj.keys().take(5).collect::<Vec<_>>()
            )))
        }
        other => Err(ParseError::NotARecordList(format!("top-level {}", kind(other)))),
    }
}

/// The value under a known container key, else the only array-of-objects
/// or nested object value.
fn container_value(obj: &Map<String, Value>) -> Option<&Value> {
    for (key, v) in obj {
        if CONTAINER_KEYS.contains(&normalise_key(key).as_str())
            && (v.is_array() || v.is_object())
        {
            return Some(v);
        }
    }

    let mut candidates = obj.values().filter(|v| match v {
        Value::Array(items) => items.iter().any(Value::is_object),
        Value::Object(_) => true,
        _ => false,
    });
    let first = candidates.next()?;
    candidates.next().is_none().then_some(first)
}

fn looks_like_record(obj: &Map<String, Value>) -> bool {
    obj.keys().any(|k| {
        let k = normalise_key(k);
        [NAME_KEYS, AGE_KEYS, GENDER_KEYS, ADDRESS_KEYS, EPIC_KEYS]
            .iter()
            .any(|keys| keys.contains(&k.as_str()))
    })
}

/// Lowercase and drop separators: `"EPIC Number"`, `"epic_number"` and
/// `"epicNumber"` all become `"epicnumber"`. Devanagari vowel signs are
/// combining marks, so only explicit separators are removed.
fn normalise_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '_' | '-' | '.' | ':'))
        .flat_map(char::to_lowercase)
        .collect()
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    obj.iter()
        .find(|(k, _)| keys.contains(&normalise_key(k).as_str()))
        .map(|(_, v)| v)
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> String {
    let text = match field(obj, keys) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    if PLACEHOLDERS.contains(&text.to_lowercase().as_str()) {
        String::new()
    } else {
        text
    }
}

fn age_field(obj: &Map<String, Value>) -> Age {
    match field(obj, AGE_KEYS) {
        Some(Value::Number(n)) => match n.as_u64().and_then(|v| u32::try_from(v).ok()) {
            Some(years) => Age::Years(years),
            None => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&f) => {
                    Age::Years(f as u32)
                }
                _ => Age::Text(n.to_string()),
            },
        },
        Some(Value::String(_)) => {
            let text = text_field(obj, AGE_KEYS);
            Age::from_text(&text)
        }
        _ => Age::default(),
    }
}

fn record_from_object(obj: &Map<String, Value>) -> VoterRecord {
    VoterRecord {
        name: text_field(obj, NAME_KEYS),
        age: age_field(obj),
        gender: text_field(obj, GENDER_KEYS),
        address: text_field(obj, ADDRESS_KEYS),
        epic_number: text_field(obj, EPIC_KEYS),
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str, age: Age, gender: &str, address: &str, epic: &str) -> VoterRecord {
        VoterRecord {
            name: name.into(),
            age,
            gender: gender.into(),
            address: address.into(),
            epic_number: epic.into(),
        }
    }

    #[test]
    fn bare_array() {
        let raw = r#"[{"name":"सुनील पाटील","age":"42","gender":"पुरुष","address":"12","epic_number":"ABC1234567"}]"#;
        let records = parse_records(raw).unwrap();
        assert_eq!(
            records,
            vec![rec("सुनील पाटील", Age::Years(42), "पुरुष", "12", "ABC1234567")]
        );
    }

    #[test]
    fn numeric_and_textual_ages() {
        let raw = r#"[
            {"name":"A","age":35},
            {"name":"B","age":"४८"},
            {"name":"C","age":"अस्पष्ट"},
            {"name":"D","age":61.0}
        ]"#;
        let ages: Vec<Age> = parse_records(raw).unwrap().into_iter().map(|r| r.age).collect();
        assert_eq!(
            ages,
            vec![
                Age::Years(35),
                Age::Years(48),
                Age::Text("अस्पष्ट".into()),
                Age::Years(61)
            ]
        );
    }

    #[test]
    fn missing_fields_become_empty() {
        let records = parse_records(r#"[{"name":"मीरा"}]"#).unwrap();
        assert_eq!(records[0].name, "मीरा");
        assert!(records[0].age.is_empty());
        assert_eq!(records[0].epic_number, "");
    }

    #[test]
    fn extra_fields_are_ignored() {
        let raw = r#"[{"name":"X","serial_no":4,"photo":true,"relation":"वडील","epic":"XYZ0000001"}]"#;
        let records = parse_records(raw).unwrap();
        assert_eq!(records[0].epic_number, "XYZ0000001");
    }

    #[test]
    fn container_key_and_fences() {
        let raw = "Here are the records:\n```json\n{\"voters\": [{\"name\": \"A\", \"EPIC Number\": \"E1\"}, {\"name\": \"B\"}]}\n```\nLet me know if you need more.";
        let records = parse_records(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].epic_number, "E1");
    }

    #[test]
    fn nested_unknown_container() {
        let raw = r#"{"page": 3, "result": {"list": [{"Name": "A", "Sex": "F"}]}}"#;
        let records = parse_records(raw).unwrap();
        assert_eq!(records[0].gender, "F");
    }

    #[test]
    fn single_record_object() {
        let records = parse_records(r#"{"name":"एकटा","age":70}"#).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].age, Age::Years(70));
    }

    #[test]
    fn prose_before_unfenced_json() {
        let raw = "Sure! [see below]\n[{\"name\": \"A\"}]";
        assert_eq!(parse_records(raw).unwrap().len(), 1);
    }

    #[test]
    fn bracketed_number_in_prose_is_skipped() {
        let raw = "Page [3] of the voter list:\n[{\"name\":\"A\",\"epic_number\":\"E1\"}]";
        let records = parse_records(raw).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].epic_number, "E1");

        let raw = "Section {2}, part [1, 2]: []";
        assert_eq!(parse_records(raw).unwrap(), vec![]);
    }

    #[test]
    fn marathi_keys() {
        let raw = r#"[{"नाव":"राम","वय":"५०","लिंग":"पुरुष","पत्ता":"घर 4"}]"#;
        let r = &parse_records(raw).unwrap()[0];
        assert_eq!(r.name, "राम");
        assert_eq!(r.age, Age::Years(50));
        assert_eq!(r.address, "घर 4");
    }

    #[test]
    fn truncated_array_keeps_complete_objects() {
        let raw = r#"[{"name":"A","age":30},{"name":"B","age":31},{"name":"C","ag"#;
        let names: Vec<String> = parse_records(raw).unwrap().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn placeholders_and_blank_entries() {
        let raw = r#"[{"name":"N/A","age":null,"gender":"-"},{"name":"B","gender":"null"}]"#;
        let records = parse_records(raw).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "B");
        assert_eq!(records[0].gender, "");
    }

    #[test]
    fn empty_list_is_a_successful_empty_page() {
        assert_eq!(parse_records("[]").unwrap(), vec![]);
        assert_eq!(parse_records("```json\n[]\n```").unwrap(), vec![]);
    }

    #[test]
    fn empty_or_prose_fails_closed() {
        assert_eq!(parse_records("   "), Err(ParseError::Empty));
        assert!(matches!(
            parse_records("I'm sorry, I cannot read this page."),
            Err(ParseError::NoJson(_))
        ));
    }

    #[test]
    fn non_record_json_fails_closed() {
        assert!(matches!(
            parse_records(r#"["a","b"]"#),
            Err(ParseError::NotARecordList(_))
        ));
        assert!(matches!(
            parse_records(r#"{"status":"ok","count":3}"#),
            Err(ParseError::NotARecordList(_))
        ));
    }

    #[test]
    fn bom_is_stripped() {
        let raw = "\u{FEFF}[{\"name\":\"A\"}]";
        assert_eq!(parse_records(raw).unwrap().len(), 1);
    }

    #[test]
    fn normalise_key_variants() {
        assert_eq!(normalise_key("EPIC Number"), "epicnumber");
        assert_eq!(normalise_key("epic_number"), "epicnumber");
        assert_eq!(normalise_key("epicNumber"), "epicnumber");
        assert_eq!(normalise_key("मतदाराचे नाव"), "मतदाराचेनाव");
    }
}
