//! Category and vocation inference for records whose source page leaves them
//! implicit.

use std::collections::BTreeSet;
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::catalog::{ITEM_CATEGORIES, UNKNOWN_CATEGORY};
use crate::value::{AttrValue, Attributes, lookup};

const CLASSIFICATION_LABELS: [&str; 4] = ["Classification", "Category", "Item Class", "Type"];
const PROPERTY_GROUPS: [&str; 2] = ["General Properties", "Requirements"];
const VOCATION_LABELS: [&str; 3] = ["Vocation", "Vocations", "Voc"];
const LEVEL_PATHS: [&[&str]; 5] = [
    &["General Properties", "Level"],
    &["Requirements", "Level"],
    &["Required Level"],
    &["Lvl"],
    &["Level"],
];

/// Ordered name keywords; the first hit decides.
const NAME_KEYWORDS: &[(&str, &str)] = &[
    ("helmet", "Helmets"),
    ("mask", "Helmets"),
    ("leg", "Legs"),
    ("shorts", "Legs"),
    ("pants", "Legs"),
    ("boot", "Boots"),
    ("shoe", "Boots"),
    ("amulet", "Amulets_and_Necklaces"),
    ("necklace", "Amulets_and_Necklaces"),
    ("ring", "Rings"),
    ("shield", "Shields"),
    ("spellbook", "Spellbooks"),
    ("book", "Spellbooks"),
    ("quiver", "Quivers"),
];

const WEAPON_KEYWORDS: &[(&str, &str)] = &[
    ("throwing", "Throwing_Weapons"),
    ("spear", "Throwing_Weapons"),
    ("star", "Throwing_Weapons"),
    ("axe", "Axes"),
    ("club", "Clubs"),
    ("mace", "Clubs"),
    ("hammer", "Clubs"),
    ("sword", "Swords"),
    ("blade", "Swords"),
    ("sabre", "Swords"),
    ("rapier", "Swords"),
    ("wand", "Wands"),
    ("rod", "Rods"),
];

static FIRST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("number pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Vocation {
    Sorcerers,
    Druids,
    Knights,
    Paladins,
    Monks,
}

impl Vocation {
    pub const ALL: [Vocation; 5] = [
        Vocation::Sorcerers,
        Vocation::Druids,
        Vocation::Knights,
        Vocation::Paladins,
        Vocation::Monks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sorcerers => "sorcerers",
            Self::Druids => "druids",
            Self::Knights => "knights",
            Self::Paladins => "paladins",
            Self::Monks => "monks",
        }
    }

    fn singular(self) -> &'static str {
        match self {
            Self::Sorcerers => "sorcerer",
            Self::Druids => "druid",
            Self::Knights => "knight",
            Self::Paladins => "paladin",
            Self::Monks => "monk",
        }
    }
}

impl fmt::Display for Vocation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

pub type VocationSet = BTreeSet<Vocation>;

/// Accepts singular, plural and promoted forms ("Master Sorcerer", "knights").
pub fn canonicalize_vocation(token: &str) -> Option<Vocation> {
    let lowered = token.trim().to_ascii_lowercase();
    let base = ["master ", "elder ", "elite ", "royal ", "exalted "]
        .iter()
        .find_map(|prefix| lowered.strip_prefix(prefix))
        .unwrap_or(&lowered)
        .trim();
    Vocation::ALL
        .into_iter()
        .find(|vocation| base == vocation.as_str() || base == vocation.singular())
}

pub fn infer_category(attributes: &Attributes, name: &str) -> String {
    if let Some(category) = classification_category(attributes) {
        return category.to_string();
    }
    if let Some(category) = combat_category(attributes, name) {
        return category.to_string();
    }
    name_keyword_category(name)
        .unwrap_or(UNKNOWN_CATEGORY)
        .to_string()
}

fn classification_category(attributes: &Attributes) -> Option<&'static str> {
    let declared = CLASSIFICATION_LABELS.iter().find_map(|label| {
        find_field(attributes, label)
            .map(AttrValue::flatten_text)
            .filter(|text| !text.trim().is_empty())
    })?;
    let declared = declared.trim().replace(' ', "_").to_ascii_lowercase();

    if let Some(category) = ITEM_CATEGORIES
        .iter()
        .find(|category| category.name.to_ascii_lowercase() == declared)
    {
        return Some(category.name);
    }
    ITEM_CATEGORIES
        .iter()
        .find(|category| {
            let known = category.name.to_ascii_lowercase();
            known.contains(&declared) || declared.contains(&known)
        })
        .map(|category| category.name)
}

fn combat_category(attributes: &Attributes, name: &str) -> Option<&'static str> {
    if has_field(attributes, "Defense") && name_has_keyword(name, "shield") {
        return Some("Shields");
    }
    if has_field(attributes, "Armor") {
        return Some(name_keyword_category(name).unwrap_or("Armors"));
    }
    if has_field(attributes, "Attack") {
        return keyword_lookup(name, WEAPON_KEYWORDS);
    }
    None
}

fn name_keyword_category(name: &str) -> Option<&'static str> {
    keyword_lookup(name, NAME_KEYWORDS)
}

fn keyword_lookup(name: &str, table: &[(&str, &'static str)]) -> Option<&'static str> {
    table
        .iter()
        .find(|(keyword, _)| name_has_keyword(name, keyword))
        .map(|(_, category)| *category)
}

/// Words that contain a keyword without being about it.
const KEYWORD_FALSE_FRIENDS: &[(&str, &str)] = &[
    ("rod", "dragon"),
    ("rod", "prod"),
    ("ring", "string"),
    ("ring", "spring"),
    ("leg", "elegant"),
    ("leg", "legend"),
    ("leg", "legion"),
    ("mace", "grimace"),
    ("star", "mustard"),
];

/// Case-insensitive substring match per name word, so "Soulquiver" hits
/// "quiver" while "Dragon" never hits "rod".
fn name_has_keyword(name: &str, keyword: &str) -> bool {
    name.split(|ch: char| !ch.is_alphanumeric())
        .map(str::to_ascii_lowercase)
        .any(|word| {
            word.contains(keyword)
                && !KEYWORD_FALSE_FRIENDS
                    .iter()
                    .any(|(claimed, host)| *claimed == keyword && word.contains(host))
        })
}

/// Finds a field by label at the top level or inside one level of grouping.
fn find_field<'a>(attributes: &'a Attributes, label: &str) -> Option<&'a AttrValue> {
    let top = attributes
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(label))
        .map(|(_, value)| value);
    top.or_else(|| {
        attributes.values().filter_map(AttrValue::as_map).find_map(|group| {
            group
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(label))
                .map(|(_, value)| value)
        })
    })
}

fn has_field(attributes: &Attributes, label: &str) -> bool {
    find_field(attributes, label).is_some_and(|value| !value.is_blank())
}

/// Vocations named by an explicit field, or `None` when no such field exists.
pub fn explicit_vocations(attributes: &Attributes) -> Option<VocationSet> {
    let field = VOCATION_LABELS.iter().find_map(|label| {
        let top = attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(label))
            .map(|(_, value)| value);
        top.or_else(|| {
            PROPERTY_GROUPS.iter().find_map(|group| {
                attributes.get(*group)?.as_map()?.iter().find_map(|(key, value)| {
                    key.eq_ignore_ascii_case(label).then_some(value)
                })
            })
        })
    })?;

    let texts = match field {
        AttrValue::List(items) => items.iter().map(AttrValue::flatten_text).collect(),
        other => vec![other.flatten_text()],
    };
    let mut vocations = VocationSet::new();
    for text in texts {
        for token in text
            .split(',')
            .flat_map(|part| part.split(" and "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
        {
            match canonicalize_vocation(token) {
                Some(vocation) => {
                    vocations.insert(vocation);
                }
                None => tracing::debug!(token, "dropping unrecognized vocation token"),
            }
        }
    }
    Some(vocations)
}

enum Selector {
    Category(&'static str),
    NameKeyword(&'static str),
}

/// Categories and name keywords that restrict an item to one vocation.
const VOCATION_EXCLUSIVITY: &[(Selector, Vocation)] = &[
    (Selector::NameKeyword("quiver"), Vocation::Paladins),
    (Selector::Category("Quivers"), Vocation::Paladins),
    (Selector::Category("Clubs"), Vocation::Knights),
    (Selector::Category("Axes"), Vocation::Knights),
    (Selector::Category("Swords"), Vocation::Knights),
    (Selector::Category("Rods"), Vocation::Druids),
    (Selector::Category("Wands"), Vocation::Sorcerers),
    (Selector::Category("Throwing_Weapons"), Vocation::Paladins),
    (Selector::Category("Fist_Fighting_Weapons"), Vocation::Monks),
];

/// Empty set means usable by every vocation.
pub fn infer_vocations(attributes: &Attributes, category: &str, name: &str) -> VocationSet {
    if let Some(explicit) = explicit_vocations(attributes) {
        return explicit;
    }
    VOCATION_EXCLUSIVITY
        .iter()
        .find(|(selector, _)| match selector {
            Selector::Category(expected) => expected.eq_ignore_ascii_case(category.trim()),
            Selector::NameKeyword(keyword) => name_has_keyword(name, keyword),
        })
        .map(|(_, vocation)| VocationSet::from([*vocation]))
        .unwrap_or_default()
}

/// Smallest level requirement found in the known locations, 0 when none.
pub fn derive_level(attributes: &Attributes) -> i64 {
    LEVEL_PATHS
        .iter()
        .filter_map(|path| lookup(attributes, path))
        .filter_map(level_number)
        .min()
        .unwrap_or(0)
}

fn level_number(value: &AttrValue) -> Option<i64> {
    match value {
        AttrValue::Int(level) => Some(*level),
        AttrValue::Float(level) => Some(level.trunc() as i64),
        AttrValue::String(text) => FIRST_NUMBER
            .find(text)
            .and_then(|found| found.as_str().parse().ok()),
        _ => None,
    }
}
