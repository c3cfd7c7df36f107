//! Field normalization for values scraped out of wiki tables and infoboxes.
//!
//! Each raw value runs through [`RULES`] in order and the first rule that
//! claims it decides the typed result. Anything unclaimed stays text.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::value::{AttrValue, Attributes};

pub const ELEMENTS: [&str; 7] = ["physical", "earth", "fire", "energy", "ice", "holy", "death"];

const TRUE_GLYPHS: [&str; 5] = ["✓", "✔", "✔️", "☑", "✅"];
const FALSE_GLYPHS: [&str; 5] = ["✗", "✘", "✕", "❌", "×"];

const INT_LABELS: [&str; 7] = [
    "imbuing slots",
    "upgrade classification",
    "armor",
    "defense",
    "attack",
    "level",
    "capacity",
];
const FLOAT_LABELS: [&str; 2] = ["weight", "speed"];
const RANGE_LABELS: [&str; 3] = ["damage", "range", "attack"];
const PRICE_LABELS: [&str; 5] = ["value", "sold for", "bought for", "sell value", "buy value"];
const PLAIN_TEXT_LABELS: [&str; 2] = ["version", "name"];

static ELEMENT_PERCENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(physical|earth|fire|energy|ice|holy|death)\b\s*:?\s*([+-]?\d+)\s*%")
        .expect("element percent pattern")
});
static ATTRIBUTE_BONUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>[^\d]+?)\s*:?\s*(?P<value>[+-]?\d+)$").expect("attribute bonus pattern")
});
static THOUSANDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d),(\d{3})").expect("thousands pattern"));
static FIRST_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[+-]?\d+").expect("int pattern"));
static FIRST_FLOAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[+-]?\d+(?:\.\d+)?").expect("float pattern"));
static BASE_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([+-]?\d+)\s*\(\s*(\d+)\s*-\s*(\d+)\s*\)").expect("base range pattern")
});
static PLAIN_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*-\s*(\d+)").expect("plain range pattern"));

/// A value as it came out of the page, before typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    Text(String),
    List(Vec<String>),
}

impl RawValue {
    pub fn joined(&self, separator: &str) -> String {
        match self {
            Self::Text(text) => text.trim().to_string(),
            Self::List(items) => items
                .iter()
                .map(|item| item.trim())
                .filter(|item| !item.is_empty())
                .collect::<Vec<_>>()
                .join(separator),
        }
    }
}

pub struct FieldRule {
    pub name: &'static str,
    pub apply: fn(&str, &RawValue) -> Option<AttrValue>,
}

pub const RULES: &[FieldRule] = &[
    FieldRule {
        name: "glyph",
        apply: glyph_rule,
    },
    FieldRule {
        name: "resistances",
        apply: resistance_rule,
    },
    FieldRule {
        name: "attribute_bonus",
        apply: attribute_bonus_rule,
    },
    FieldRule {
        name: "release_notes",
        apply: release_notes_rule,
    },
    FieldRule {
        name: "numeric",
        apply: numeric_rule,
    },
    FieldRule {
        name: "range",
        apply: range_rule,
    },
    FieldRule {
        name: "trade_price",
        apply: trade_price_rule,
    },
];

pub fn normalize_field(label: &str, raw: RawValue) -> AttrValue {
    if is_plain_text_label(label) {
        return AttrValue::String(raw.joined(" "));
    }
    for rule in RULES {
        if let Some(value) = (rule.apply)(label, &raw) {
            return value;
        }
    }
    match raw {
        RawValue::Text(text) => AttrValue::String(text.trim().to_string()),
        RawValue::List(items) => AttrValue::List(
            items
                .iter()
                .map(|item| parse_glyph(item).unwrap_or_else(|| AttrValue::text(item.trim())))
                .collect(),
        ),
    }
}

pub fn normalize_text(label: &str, text: &str) -> AttrValue {
    normalize_field(label, RawValue::Text(text.to_string()))
}

fn glyph_rule(_label: &str, raw: &RawValue) -> Option<AttrValue> {
    match raw {
        RawValue::Text(text) => parse_glyph(text),
        RawValue::List(_) => None,
    }
}

fn parse_glyph(text: &str) -> Option<AttrValue> {
    let trimmed = text.trim();
    if TRUE_GLYPHS.contains(&trimmed) {
        return Some(AttrValue::Bool(true));
    }
    if FALSE_GLYPHS.contains(&trimmed) {
        return Some(AttrValue::Bool(false));
    }
    None
}

/// Claims values carrying at least one element percentage. Entries that are
/// not element percentages stay in the map: bonuses merge by name and
/// anything else lands under `"other"`.
fn resistance_rule(_label: &str, raw: &RawValue) -> Option<AttrValue> {
    let entries = match raw {
        RawValue::Text(text) => text.split(',').map(str::to_string).collect::<Vec<_>>(),
        RawValue::List(items) => items.clone(),
    };

    let mut map = Attributes::new();
    let mut leftovers = Vec::new();
    for entry in &entries {
        let mut matched = false;
        for capture in ELEMENT_PERCENT.captures_iter(entry) {
            if let Ok(percent) = capture[2].parse::<i64>() {
                map.insert(capture[1].to_ascii_lowercase(), AttrValue::Int(percent));
                matched = true;
            }
        }
        let rest = if matched {
            ELEMENT_PERCENT.replace_all(entry, "").into_owned()
        } else {
            entry.clone()
        };
        let rest = rest.trim_matches(|ch: char| ch.is_whitespace() || ch == ',' || ch == ';');
        if !rest.is_empty() {
            leftovers.push(rest.to_string());
        }
    }
    if map.is_empty() {
        return None;
    }

    let mut other = Vec::new();
    for leftover in leftovers {
        match parse_attribute_bonus(&leftover) {
            Some((name, value)) => {
                map.entry(name).or_insert(AttrValue::Int(value));
            }
            None => other.push(AttrValue::text(leftover)),
        }
    }
    if !other.is_empty() {
        map.insert("other".to_string(), AttrValue::List(other));
    }
    Some(AttrValue::Map(map))
}

fn attribute_bonus_rule(label: &str, raw: &RawValue) -> Option<AttrValue> {
    if is_claimed_label(label) {
        return None;
    }
    match raw {
        RawValue::Text(text) => {
            let (name, value) = parse_attribute_bonus(text)?;
            let mut map = Attributes::new();
            map.insert(name, AttrValue::Int(value));
            Some(AttrValue::Map(map))
        }
        RawValue::List(items) => {
            let entries = items
                .iter()
                .map(|item| item.trim())
                .filter(|item| !item.is_empty())
                .collect::<Vec<_>>();
            let mut map = Attributes::new();
            let mut other = Vec::new();
            for entry in &entries {
                match parse_attribute_bonus(entry) {
                    Some((name, value)) => {
                        map.insert(name, AttrValue::Int(value));
                    }
                    None => other.push(AttrValue::text(*entry)),
                }
            }
            if map.is_empty() || other.len() * 2 >= entries.len() {
                return None;
            }
            if !other.is_empty() {
                map.insert("other".to_string(), AttrValue::List(other));
            }
            Some(AttrValue::Map(map))
        }
    }
}

/// `"magic level +3"` → `("magic level", 3)`. The free text must carry a
/// letter and no digits.
pub fn parse_attribute_bonus(text: &str) -> Option<(String, i64)> {
    let capture = ATTRIBUTE_BONUS.captures(text.trim())?;
    let name = capture["name"].trim().trim_end_matches(':').trim();
    if !name.chars().any(char::is_alphabetic) {
        return None;
    }
    let value = capture["value"].parse::<i64>().ok()?;
    Some((name.to_lowercase(), value))
}

fn release_notes_rule(_label: &str, raw: &RawValue) -> Option<AttrValue> {
    match raw {
        RawValue::List(items)
            if items
                .iter()
                .any(|item| item.to_ascii_lowercase().contains("update")) =>
        {
            Some(AttrValue::String(raw.joined(" ")))
        }
        _ => None,
    }
}

fn numeric_rule(label: &str, raw: &RawValue) -> Option<AttrValue> {
    let RawValue::Text(text) = raw else {
        return None;
    };
    let key = label_key(label);
    if RANGE_LABELS.contains(&key.as_str()) && looks_like_range(text) {
        return None;
    }
    let cleaned = THOUSANDS.replace_all(text, "$1$2");
    if INT_LABELS.contains(&key.as_str()) {
        let found = FIRST_INT.find(&cleaned)?;
        return found.as_str().parse::<i64>().ok().map(AttrValue::Int);
    }
    if FLOAT_LABELS.contains(&key.as_str()) {
        let found = FIRST_FLOAT.find(&cleaned)?;
        return found.as_str().parse::<f64>().ok().map(AttrValue::Float);
    }
    None
}

fn range_rule(label: &str, raw: &RawValue) -> Option<AttrValue> {
    let RawValue::Text(text) = raw else {
        return None;
    };
    if !RANGE_LABELS.contains(&label_key(label).as_str()) {
        return None;
    }
    parse_range(text)
}

/// Parses `"50 (45-55)"` or `"50-60"`; the parenthesised form is tried first.
pub fn parse_range(text: &str) -> Option<AttrValue> {
    if let Some(capture) = BASE_RANGE.captures(text) {
        return Some(AttrValue::Range {
            base: Some(capture[1].parse().ok()?),
            min: capture[2].parse().ok()?,
            max: capture[3].parse().ok()?,
        });
    }
    let capture = PLAIN_RANGE.captures(text)?;
    Some(AttrValue::Range {
        base: None,
        min: capture[1].parse().ok()?,
        max: capture[2].parse().ok()?,
    })
}

fn looks_like_range(text: &str) -> bool {
    BASE_RANGE.is_match(text) || PLAIN_RANGE.is_match(text)
}

fn trade_price_rule(label: &str, raw: &RawValue) -> Option<AttrValue> {
    let RawValue::Text(text) = raw else {
        return None;
    };
    if !PRICE_LABELS.contains(&label_key(label).as_str()) {
        return None;
    }
    if !text.chars().any(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let cleaned = text
        .to_ascii_lowercase()
        .replace("gp", "")
        .replace(',', "")
        .trim()
        .to_string();
    cleaned.parse::<i64>().ok().map(AttrValue::Int)
}

fn label_key(label: &str) -> String {
    label
        .trim()
        .trim_end_matches(':')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

fn is_plain_text_label(label: &str) -> bool {
    PLAIN_TEXT_LABELS.contains(&label_key(label).as_str())
}

fn is_claimed_label(label: &str) -> bool {
    let key = label_key(label);
    let key = key.as_str();
    INT_LABELS.contains(&key)
        || FLOAT_LABELS.contains(&key)
        || RANGE_LABELS.contains(&key)
        || PRICE_LABELS.contains(&key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, i64)]) -> AttrValue {
        AttrValue::Map(
            entries
                .iter()
                .map(|(key, value)| (key.to_string(), AttrValue::Int(*value)))
                .collect(),
        )
    }

    fn list(items: &[&str]) -> RawValue {
        RawValue::List(items.iter().map(|item| item.to_string()).collect())
    }

    #[test]
    fn glyphs_become_booleans() {
        assert_eq!(normalize_text("Stackable", "✓"), AttrValue::Bool(true));
        assert_eq!(normalize_text("Marketable", " ✗ "), AttrValue::Bool(false));
    }

    #[test]
    fn resistances_parse_comma_and_space_separated() {
        assert_eq!(
            normalize_text("Resist", "physical +5%, fire -3%"),
            map(&[("physical", 5), ("fire", -3)])
        );
        assert_eq!(
            normalize_text("Protection", "Earth 8% Death -2%"),
            map(&[("earth", 8), ("death", -2)])
        );
        assert_eq!(
            normalize_field("Resists", list(&["ice +4%", "holy 1%"])),
            map(&[("ice", 4), ("holy", 1)])
        );
    }

    #[test]
    fn mixed_resistance_lists_keep_every_entry() {
        assert_eq!(
            normalize_field("Attributes", list(&["magic level +1", "fire +5%"])),
            map(&[("fire", 5), ("magic level", 1)])
        );
        assert_eq!(
            normalize_text("Protection", "death +10%, drains mana"),
            AttrValue::Map(Attributes::from([
                ("death".to_string(), AttrValue::Int(10)),
                (
                    "other".to_string(),
                    AttrValue::List(vec![AttrValue::text("drains mana")])
                ),
            ]))
        );
    }

    #[test]
    fn attribute_strings_become_single_entry_maps() {
        assert_eq!(
            normalize_text("Attributes", "magic level +3"),
            map(&[("magic level", 3)])
        );
        assert_eq!(
            normalize_text("Attributes", "distance fighting -2"),
            map(&[("distance fighting", -2)])
        );
    }

    #[test]
    fn attribute_lists_promote_when_most_entries_match() {
        assert_eq!(
            normalize_field(
                "Attributes",
                list(&["magic level +2", "shielding +1", "regeneration"])
            ),
            AttrValue::Map(Attributes::from([
                ("magic level".to_string(), AttrValue::Int(2)),
                ("shielding".to_string(), AttrValue::Int(1)),
                (
                    "other".to_string(),
                    AttrValue::List(vec![AttrValue::text("regeneration")])
                ),
            ]))
        );
        assert_eq!(
            normalize_field("Notes", list(&["speed +10", "rare", "quest item"])),
            AttrValue::List(vec![
                AttrValue::text("speed +10"),
                AttrValue::text("rare"),
                AttrValue::text("quest item"),
            ])
        );
    }

    #[test]
    fn update_lists_flatten_to_text() {
        assert_eq!(
            normalize_field("Released", list(&["Update 8.0", "December 2007"])),
            AttrValue::text("Update 8.0 December 2007")
        );
    }

    #[test]
    fn version_is_always_text() {
        assert_eq!(normalize_text("Version", "Update 10"), AttrValue::text("Update 10"));
        assert_eq!(
            normalize_field("Version", list(&["8.0", "8.1"])),
            AttrValue::text("8.0 8.1")
        );
    }

    #[test]
    fn numeric_labels_extract_first_number() {
        assert_eq!(normalize_text("Armor", "5"), AttrValue::Int(5));
        assert_eq!(normalize_text("Defense", "20 +1"), AttrValue::Int(20));
        assert_eq!(normalize_text("Capacity", "1,200 oz"), AttrValue::Int(1200));
        assert_eq!(normalize_text("Weight", "13.00 oz"), AttrValue::Float(13.0));
        assert_eq!(normalize_text("Speed", "none"), AttrValue::text("none"));
    }

    #[test]
    fn ranges_parse_both_shapes() {
        assert_eq!(
            normalize_text("Damage", "50-60"),
            AttrValue::Range {
                base: None,
                min: 50,
                max: 60
            }
        );
        assert_eq!(
            normalize_text("Damage", "50 (45-55)"),
            AttrValue::Range {
                base: Some(50),
                min: 45,
                max: 55
            }
        );
        assert_eq!(
            normalize_text("Attack", "50 (45-55)"),
            AttrValue::Range {
                base: Some(50),
                min: 45,
                max: 55
            }
        );
        assert_eq!(normalize_text("Attack", "35"), AttrValue::Int(35));
        assert_eq!(normalize_text("Range", "6"), AttrValue::text("6"));
    }

    #[test]
    fn trade_prices_drop_gold_suffix() {
        assert_eq!(normalize_text("Value", "2,300 gp"), AttrValue::Int(2300));
        assert_eq!(normalize_text("Sold For", "40gp"), AttrValue::Int(40));
        assert_eq!(
            normalize_text("Value", "Negotiable"),
            AttrValue::text("Negotiable")
        );
    }

    #[test]
    fn unmatched_values_pass_through() {
        assert_eq!(normalize_text("Slot", " head "), AttrValue::text("head"));
        assert_eq!(
            normalize_field("Dropped By", list(&["Dragon", "✓"])),
            AttrValue::List(vec![AttrValue::text("Dragon"), AttrValue::Bool(true)])
        );
    }

    #[test]
    fn bonus_parser_requires_letters_without_digits() {
        assert_eq!(parse_attribute_bonus("+3"), None);
        assert_eq!(parse_attribute_bonus("update 8.0"), None);
        assert_eq!(
            parse_attribute_bonus("Club Fighting: +2"),
            Some(("club fighting".to_string(), 2))
        );
    }

    #[test]
    fn rules_are_ordered_as_documented() {
        let names = RULES.iter().map(|rule| rule.name).collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                "glyph",
                "resistances",
                "attribute_bonus",
                "release_notes",
                "numeric",
                "range",
                "trade_price"
            ]
        );
    }
}
