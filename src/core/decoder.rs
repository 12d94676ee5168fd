use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Tags whose values are booleans rather than numbers.
const BOOLEAN_TAGS: &[&str] = &["ignition", "motion"];

/// A single decoded sensor value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SensorValue {
    Bool(bool),
    Number(f64),
    /// Value that did not parse as a finite number; kept verbatim.
    Text(String),
}

/// Typed view over a tagged sensor payload.
///
/// A missing tag is a missing key. `malformed_tags` counts segments that were
/// skipped so the caller can report data quality.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedSensorMap {
    values: HashMap<String, SensorValue>,
    pub malformed_tags: usize,
}

impl DecodedSensorMap {
    pub fn get(&self, tag: &str) -> Option<&SensorValue> {
        self.values.get(tag)
    }

    /// Numeric value of a tag, if present and numeric.
    pub fn number(&self, tag: &str) -> Option<f64> {
        match self.values.get(tag) {
            Some(SensorValue::Number(v)) => Some(*v),
            _ => None,
        }
    }

    /// Boolean value of a tag, if present and boolean.
    pub fn flag(&self, tag: &str) -> Option<bool> {
        match self.values.get(tag) {
            Some(SensorValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.values.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// Decode a `<tag1>value1<tag2>value2...` payload.
///
/// A value runs from the tag's closing `>` up to the next `<`. Segments
/// without a closing `>` or with an empty tag name are skipped, and a repeated
/// tag keeps its last value. Never fails: `None` or empty input yields an
/// empty map.
pub fn decode_sensors(payload: Option<&str>) -> DecodedSensorMap {
    let mut decoded = DecodedSensorMap::default();
    let Some(payload) = payload else {
        return decoded;
    };

    // Anything before the first '<' is not part of a tag.
    for segment in payload.split('<').skip(1) {
        if segment.trim().is_empty() {
            continue;
        }
        let Some((tag, value)) = segment.split_once('>') else {
            decoded.malformed_tags += 1;
            continue;
        };
        let tag = tag.trim();
        if tag.is_empty() {
            decoded.malformed_tags += 1;
            continue;
        }
        decoded
            .values
            .insert(tag.to_string(), decode_value(tag, value.trim()));
    }

    decoded
}

fn decode_value(tag: &str, value: &str) -> SensorValue {
    if BOOLEAN_TAGS.contains(&tag) {
        return SensorValue::Bool(value.eq_ignore_ascii_case("true"));
    }
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => SensorValue::Number(v),
        _ => SensorValue::Text(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_and_missing_payloads() {
        assert!(decode_sensors(None).is_empty());
        assert!(decode_sensors(Some("")).is_empty());
        assert!(decode_sensors(Some("no tags here")).is_empty());
    }

    #[test]
    fn ignition_is_case_insensitive() {
        let map = decode_sensors(Some("<ignition>TRUE<motion>False<"));
        assert_eq!(map.flag("ignition"), Some(true));
        assert_eq!(map.flag("motion"), Some(false));
    }

    #[test]
    fn numeric_values_decode_to_float() {
        let map = decode_sensors(Some("<foo>12.5<io87>123456<"));
        assert_eq!(map.number("foo"), Some(12.5));
        assert_eq!(map.number("io87"), Some(123456.0));
    }

    #[test]
    fn non_numeric_value_kept_as_text() {
        let map = decode_sensors(Some("<driver>ABC-12<sat>7"));
        assert_eq!(map.get("driver"), Some(&SensorValue::Text("ABC-12".into())));
        assert_eq!(map.number("driver"), None);
        assert_eq!(map.number("sat"), Some(7.0));
    }

    #[test]
    fn non_finite_numbers_stay_text() {
        let map = decode_sensors(Some("<power>NaN<hdop>inf"));
        assert_eq!(map.number("power"), None);
        assert_eq!(map.get("power"), Some(&SensorValue::Text("NaN".into())));
        assert_eq!(map.number("hdop"), None);
    }

    #[test]
    fn duplicate_tag_last_wins() {
        let map = decode_sensors(Some("<sat>3<sat>9<"));
        assert_eq!(map.number("sat"), Some(9.0));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn malformed_segments_are_skipped() {
        let map = decode_sensors(Some("<broken<>5<sat>8"));
        assert_eq!(map.number("sat"), Some(8.0));
        assert_eq!(map.len(), 1);
        assert_eq!(map.malformed_tags, 2);
    }

    #[test]
    fn empty_value_is_empty_text() {
        let map = decode_sensors(Some("<io85><sat>4"));
        assert_eq!(map.get("io85"), Some(&SensorValue::Text(String::new())));
        assert!(map.contains("io85"));
    }

    #[test]
    fn missing_tag_has_no_key() {
        let map = decode_sensors(Some("<sat>4"));
        assert!(!map.contains("io87"));
        assert_eq!(map.get("io87"), None);
    }

    proptest! {
        #[test]
        fn decoder_never_panics(payload in ".*") {
            let _ = decode_sensors(Some(&payload));
        }

        #[test]
        fn embedded_ignition_true_always_decodes(prefix in "[a-z0-9<>]{0,20}", case in "(true|TRUE|True|tRuE)") {
            let payload = format!("{prefix}<ignition>{case}<");
            let map = decode_sensors(Some(&payload));
            prop_assert_eq!(map.flag("ignition"), Some(true));
        }
    }
}
