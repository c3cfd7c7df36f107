pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Where the name and image live in a category's listing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingLayout {
    /// Name anchor and image share one cell.
    Combined { column: usize },
    /// Plain-text name in one column, image in another.
    Split {
        name_column: usize,
        image_column: usize,
    },
}

impl ListingLayout {
    pub fn image_column(self) -> usize {
        match self {
            Self::Combined { column } => column,
            Self::Split { image_column, .. } => image_column,
        }
    }

    pub fn name_column(self) -> usize {
        match self {
            Self::Combined { column } => column,
            Self::Split { name_column, .. } => name_column,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemCategory {
    pub name: &'static str,
    pub page: &'static str,
    pub layout: ListingLayout,
}

const COMBINED: ListingLayout = ListingLayout::Combined { column: 0 };
const SPLIT: ListingLayout = ListingLayout::Split {
    name_column: 0,
    image_column: 1,
};

pub const ITEM_CATEGORIES: &[ItemCategory] = &[
    ItemCategory {
        name: "Helmets",
        page: "Helmets",
        layout: COMBINED,
    },
    ItemCategory {
        name: "Armors",
        page: "Armors",
        layout: COMBINED,
    },
    ItemCategory {
        name: "Legs",
        page: "Legs",
        layout: COMBINED,
    },
    ItemCategory {
        name: "Boots",
        page: "Boots",
        layout: COMBINED,
    },
    ItemCategory {
        name: "Shields",
        page: "Shields",
        layout: SPLIT,
    },
    ItemCategory {
        name: "Spellbooks",
        page: "Spellbooks",
        layout: COMBINED,
    },
    ItemCategory {
        name: "Amulets_and_Necklaces",
        page: "Amulets_and_Necklaces",
        layout: COMBINED,
    },
    ItemCategory {
        name: "Rings",
        page: "Rings",
        layout: COMBINED,
    },
    ItemCategory {
        name: "Quivers",
        page: "Quivers",
        layout: ListingLayout::Combined { column: 1 },
    },
    ItemCategory {
        name: "Axes",
        page: "Axe_Weapons",
        layout: COMBINED,
    },
    ItemCategory {
        name: "Clubs",
        page: "Club_Weapons",
        layout: COMBINED,
    },
    ItemCategory {
        name: "Swords",
        page: "Sword_Weapons",
        layout: COMBINED,
    },
    ItemCategory {
        name: "Wands",
        page: "Wands",
        layout: SPLIT,
    },
    ItemCategory {
        name: "Rods",
        page: "Rods",
        layout: SPLIT,
    },
    ItemCategory {
        name: "Throwing_Weapons",
        page: "Throwing_Weapons",
        layout: SPLIT,
    },
    ItemCategory {
        name: "Fist_Fighting_Weapons",
        page: "Fist_Fighting_Weapons",
        layout: COMBINED,
    },
];

pub fn item_category(name: &str) -> Option<&'static ItemCategory> {
    let name = name.trim();
    ITEM_CATEGORIES
        .iter()
        .find(|category| category.name.eq_ignore_ascii_case(name))
}

pub fn listing_layout(category: &str) -> ListingLayout {
    item_category(category)
        .map(|category| category.layout)
        .unwrap_or(COMBINED)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatureCategory {
    pub name: &'static str,
    pub subcategories: &'static [&'static str],
}

pub const CREATURE_CATEGORIES: &[CreatureCategory] = &[
    CreatureCategory {
        name: "Amphibians",
        subcategories: &["Deeplings", "Frogs", "Quara", "Salamanders"],
    },
    CreatureCategory {
        name: "Demons",
        subcategories: &[
            "Arak Demons",
            "Archdemons",
            "Asuri",
            "Demon Lords",
            "Demons",
            "Dreamhaunters",
            "Hands",
            "Imps",
            "The Ruthless Seven",
            "The Ruthless Seven Minions",
            "Triangle of Terror",
            "Pit Demons",
            "Possessed Objects",
        ],
    },
    CreatureCategory {
        name: "Elementals",
        subcategories: &[
            "Bio-Elementals",
            "Blobs",
            "Cryo-Elementals",
            "Electro-Elementals",
            "Elemental Lords",
            "Geo-Elementals",
            "Hydro-Elementals",
            "Magma-Elementals",
            "Pyro-Elementals",
        ],
    },
    CreatureCategory {
        name: "Humanoids",
        subcategories: &[
            "Astral Shapers",
            "Chakoyas",
            "Corym",
            "Djinn",
            "Dwarves",
            "Dworcs",
            "Elves",
            "Fae",
            "Fungi",
            "Giants",
            "Gnomes",
            "Goblins",
            "Minotaurs",
            "Orclopses",
            "Orcs",
            "Pirats",
            "Trolls",
        ],
    },
    CreatureCategory {
        name: "Humans",
        subcategories: &[
            "Amazons",
            "Barbarians",
            "Monks",
            "Necromancers",
            "Outlaws",
            "Pirates",
            "Sorcerers",
            "Voodoo Cultists",
            "Lycanthropes",
            "Fafnar Cultists",
        ],
    },
    CreatureCategory {
        name: "Invertebrates",
        subcategories: &[
            "Annelids",
            "Arachnids",
            "Bonelords",
            "Cnidarians",
            "Crustaceans",
            "Hive Born",
            "Insects",
            "Mollusks",
            "Myriapods",
        ],
    },
    CreatureCategory {
        name: "Mammals",
        subcategories: &[
            "Apes",
            "Bats",
            "Bears",
            "Canines",
            "Felines",
            "Glires",
            "Hyaenids",
            "Mustelids",
            "Mutated Mammals",
            "Ungulates",
        ],
    },
    CreatureCategory {
        name: "Misc",
        subcategories: &["Birds", "Fishes", "Machines", "Anuma", "Hybrids"],
    },
    CreatureCategory {
        name: "Reptiles",
        subcategories: &[
            "Crocodilians",
            "Dragons",
            "Draken",
            "Hydras",
            "Lizards",
            "Serpents",
            "Tortoises",
            "Varanidae",
            "Wyrms",
            "Wyverns",
        ],
    },
    CreatureCategory {
        name: "Special Creatures",
        subcategories: &[
            "Arena Bosses",
            "Bosses",
            "Deprecated Creatures",
            "Event Creatures",
            "Shapeshifters",
            "Traps",
        ],
    },
    CreatureCategory {
        name: "The Undead",
        subcategories: &[
            "Ghosts",
            "Pharaohs",
            "Skeletons",
            "Undead Humanoids",
            "Vampires",
        ],
    },
];

/// `(category, subcategory)` pairs selected by the optional filters.
pub fn creature_targets(
    category: Option<&str>,
    subcategory: Option<&str>,
) -> Vec<(&'static str, &'static str)> {
    CREATURE_CATEGORIES
        .iter()
        .filter(|entry| category.is_none_or(|wanted| entry.name.eq_ignore_ascii_case(wanted.trim())))
        .flat_map(|entry| {
            entry
                .subcategories
                .iter()
                .map(move |subcategory| (entry.name, *subcategory))
        })
        .filter(|(_, name)| subcategory.is_none_or(|wanted| name.eq_ignore_ascii_case(wanted.trim())))
        .collect()
}

/// Wiki page path for a title: spaces become underscores.
pub fn page_path(title: &str) -> String {
    title.trim().replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_follow_category_table() {
        assert_eq!(listing_layout("Helmets"), ListingLayout::Combined { column: 0 });
        assert_eq!(listing_layout("Quivers"), ListingLayout::Combined { column: 1 });
        assert_eq!(
            listing_layout("wands"),
            ListingLayout::Split {
                name_column: 0,
                image_column: 1
            }
        );
        assert_eq!(listing_layout("Mystery"), ListingLayout::Combined { column: 0 });
    }

    #[test]
    fn known_categories_are_case_insensitive() {
        assert_eq!(
            item_category("amulets_and_necklaces").map(|c| c.name),
            Some("Amulets_and_Necklaces")
        );
        assert!(item_category("Unknown").is_none());
        assert_eq!(item_category("Axes").map(|c| c.page), Some("Axe_Weapons"));
    }

    #[test]
    fn creature_targets_filter_by_category_and_subcategory() {
        let reptiles = creature_targets(Some("Reptiles"), None);
        assert_eq!(reptiles.len(), 10);
        assert!(reptiles.iter().all(|(category, _)| *category == "Reptiles"));

        assert_eq!(
            creature_targets(None, Some("elves")),
            vec![("Humanoids", "Elves")]
        );
        assert!(creature_targets(Some("Nope"), None).is_empty());
    }

    #[test]
    fn page_path_uses_underscores() {
        assert_eq!(page_path("Demon Lords"), "Demon_Lords");
    }
}
