//! Read-side views over stored items. Filters are plain values passed in per
//! request; nothing here touches the database.

use serde::Serialize;

use crate::infer::{Vocation, VocationSet, derive_level, infer_vocations};
use crate::store::Record;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub category: Option<String>,
    pub min_level: Option<i64>,
    pub max_level: Option<i64>,
    pub vocation: Option<Vocation>,
}

impl ItemFilter {
    /// Items a character of `level` and `vocation` can wear.
    pub fn for_character(level: i64, vocation: Option<Vocation>) -> Self {
        Self {
            max_level: Some(level),
            vocation,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemView {
    pub record: Record,
    pub level: i64,
    pub vocations: VocationSet,
}

impl ItemView {
    pub fn from_record(record: Record) -> Self {
        let level = derive_level(&record.attributes);
        let vocations = infer_vocations(&record.attributes, &record.category, &record.name);
        Self {
            record,
            level,
            vocations,
        }
    }

    /// Unrestricted items suit every vocation.
    pub fn usable_by(&self, vocation: Vocation) -> bool {
        self.vocations.is_empty() || self.vocations.contains(&vocation)
    }
}

pub fn matches(view: &ItemView, filter: &ItemFilter) -> bool {
    if let Some(category) = &filter.category
        && !view.record.category.eq_ignore_ascii_case(category.trim())
    {
        return false;
    }
    if filter.min_level.is_some_and(|min| view.level < min) {
        return false;
    }
    if filter.max_level.is_some_and(|max| view.level > max) {
        return false;
    }
    filter
        .vocation
        .is_none_or(|vocation| view.usable_by(vocation))
}

/// Filters records into views ordered by level, then category and name.
pub fn filter_items(records: Vec<Record>, filter: &ItemFilter) -> Vec<ItemView> {
    let mut views = records
        .into_iter()
        .map(ItemView::from_record)
        .filter(|view| matches(view, filter))
        .collect::<Vec<_>>();
    views.sort_by(|left, right| {
        left.level
            .cmp(&right.level)
            .then_with(|| left.record.category.cmp(&right.record.category))
            .then_with(|| left.record.name.cmp(&right.record.name))
    });
    views
}

/// Distinct categories present in `records`, sorted.
pub fn categories(records: &[Record]) -> Vec<String> {
    let mut names = records
        .iter()
        .map(|record| record.category.clone())
        .collect::<Vec<_>>();
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{AttrValue, Attributes};

    fn item(name: &str, category: &str, level: i64) -> Record {
        let mut record = Record::item(name, category);
        if level > 0 {
            record.attributes.insert(
                "General Properties".to_string(),
                AttrValue::Map(Attributes::from([(
                    "Level".to_string(),
                    AttrValue::Int(level),
                )])),
            );
        }
        record
    }

    fn sample() -> Vec<Record> {
        vec![
            item("Wand of Vortex", "Wands", 7),
            item("Snakebite Rod", "Rods", 7),
            item("Plate Armor", "Armors", 0),
            item("Magic Plate Armor", "Armors", 60),
            item("Giant Sword", "Swords", 55),
        ]
    }

    #[test]
    fn vocation_filter_keeps_unrestricted_items() {
        let filter = ItemFilter {
            vocation: Some(Vocation::Sorcerers),
            ..ItemFilter::default()
        };
        let names = filter_items(sample(), &filter)
            .into_iter()
            .map(|view| view.record.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Plate Armor", "Wand of Vortex", "Magic Plate Armor"]);
    }

    #[test]
    fn character_filter_caps_level() {
        let views = filter_items(sample(), &ItemFilter::for_character(55, Some(Vocation::Knights)));
        let names = views
            .iter()
            .map(|view| view.record.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Plate Armor", "Giant Sword"]);
        assert_eq!(views[1].vocations, VocationSet::from([Vocation::Knights]));
    }

    #[test]
    fn category_and_min_level_filters() {
        let filter = ItemFilter {
            category: Some("armors".to_string()),
            min_level: Some(1),
            ..ItemFilter::default()
        };
        let views = filter_items(sample(), &filter);
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].record.name, "Magic Plate Armor");
        assert_eq!(views[0].level, 60);
    }

    #[test]
    fn categories_are_distinct_and_sorted() {
        assert_eq!(
            categories(&sample()),
            vec!["Armors", "Rods", "Swords", "Wands"]
        );
    }
}
