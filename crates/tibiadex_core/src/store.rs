use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params, params_from_iter};
use serde::Serialize;

use crate::value::{Attributes, attributes_to_json, decode_attributes, encode_attributes};

const STORE_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    name TEXT PRIMARY KEY,
    category TEXT NOT NULL,
    image_ref TEXT NOT NULL DEFAULT '',
    data_json TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_items_category ON items(category);

CREATE TABLE IF NOT EXISTS creatures (
    name TEXT PRIMARY KEY,
    category TEXT NOT NULL,
    subcategory TEXT NOT NULL DEFAULT '',
    image_ref TEXT NOT NULL DEFAULT '',
    data_json TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_creatures_category ON creatures(category);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Item,
    Creature,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Creature => "creature",
        }
    }

    fn table(self) -> &'static str {
        match self {
            Self::Item => "items",
            Self::Creature => "creatures",
        }
    }

    fn columns(self) -> &'static str {
        match self {
            Self::Item => "name, category, '' AS subcategory, image_ref, data_json",
            Self::Creature => "name, category, subcategory, image_ref, data_json",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub kind: EntityKind,
    pub name: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub image_ref: String,
    pub attributes: Attributes,
}

impl Record {
    pub fn item(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            kind: EntityKind::Item,
            name: name.into(),
            category: category.into(),
            subcategory: None,
            image_ref: String::new(),
            attributes: Attributes::new(),
        }
    }

    pub fn creature(
        name: impl Into<String>,
        category: impl Into<String>,
        subcategory: impl Into<String>,
    ) -> Self {
        Self {
            kind: EntityKind::Creature,
            subcategory: Some(subcategory.into()),
            ..Self::item(name, category)
        }
    }

    fn subcategory_column(&self) -> &str {
        self.subcategory.as_deref().unwrap_or("")
    }

    /// Whether persisting `other` over `self` would change anything.
    fn differs_from(&self, other: &Record) -> bool {
        self.category != other.category
            || (self.kind == EntityKind::Creature
                && self.subcategory_column() != other.subcategory_column())
            || self.image_ref != other.image_ref
            || attributes_to_json(&self.attributes) != attributes_to_json(&other.attributes)
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub image_ref: Option<String>,
    pub attributes: Option<Attributes>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
    Rejected,
}

/// Blank names and the literal "none" never reach the database.
pub fn is_valid_name(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("none")
}

pub struct Store {
    connection: Connection,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        let parent = db_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("db path has no parent: {}", db_path.display()))?;
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create database parent directory {}",
                parent.display()
            )
        })?;
        let connection = Connection::open(db_path)
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        Self::with_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self> {
        let connection =
            Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::with_connection(connection)
    }

    fn with_connection(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(STORE_SCHEMA_SQL)
            .context("failed to initialize store schema")?;
        Ok(Self { connection })
    }

    /// Inserts unless the name already exists. Returns whether a row was written.
    pub fn create(&self, record: &Record) -> Result<bool> {
        if !is_valid_name(&record.name) {
            bail!("refusing to store {} with invalid name {:?}", record.kind, record.name);
        }
        insert_record(&self.connection, record, true)
    }

    pub fn read(&self, kind: EntityKind, name: &str) -> Result<Option<Record>> {
        read_record(&self.connection, kind, name)
    }

    pub fn exists(&self, kind: EntityKind, name: &str) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE name = ?1)",
            kind.table()
        );
        let exists: i64 = self
            .connection
            .query_row(&sql, [name], |row| row.get(0))
            .with_context(|| format!("failed to look up {kind} {name}"))?;
        Ok(exists == 1)
    }

    /// Applies the fields set in `patch`. Returns the number of rows changed.
    pub fn update(&self, kind: EntityKind, name: &str, patch: &RecordPatch) -> Result<usize> {
        let mut assignments = Vec::new();
        let mut values = Vec::new();
        if let Some(category) = &patch.category {
            assignments.push("category = ?");
            values.push(category.clone());
        }
        if kind == EntityKind::Creature
            && let Some(subcategory) = &patch.subcategory
        {
            assignments.push("subcategory = ?");
            values.push(subcategory.clone());
        }
        if let Some(image_ref) = &patch.image_ref {
            assignments.push("image_ref = ?");
            values.push(image_ref.clone());
        }
        if let Some(attributes) = &patch.attributes {
            assignments.push("data_json = ?");
            values.push(encode_attributes(attributes)?);
        }
        if assignments.is_empty() {
            return Ok(0);
        }
        values.push(name.to_string());

        let sql = format!(
            "UPDATE {} SET {} WHERE name = ?",
            kind.table(),
            assignments.join(", ")
        );
        self.connection
            .execute(&sql, params_from_iter(values.iter()))
            .with_context(|| format!("failed to update {kind} {name}"))
    }

    /// The only write path used by scraping. Runs in one IMMEDIATE transaction.
    pub fn upsert(&mut self, record: &Record) -> Result<UpsertOutcome> {
        if !is_valid_name(&record.name) {
            tracing::warn!(kind = %record.kind, name = ?record.name, "rejecting record with invalid name");
            return Ok(UpsertOutcome::Rejected);
        }

        let transaction = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start upsert transaction")?;
        let outcome = match read_record(&transaction, record.kind, &record.name)? {
            None => {
                insert_record(&transaction, record, false)?;
                UpsertOutcome::Created
            }
            Some(existing) if existing.differs_from(record) => {
                let sql = format!(
                    "UPDATE {} SET category = ?1, image_ref = ?2, data_json = ?3{} WHERE name = ?4",
                    record.kind.table(),
                    if record.kind == EntityKind::Creature {
                        ", subcategory = ?5"
                    } else {
                        ""
                    }
                );
                let data_json = encode_attributes(&record.attributes)?;
                let mut values = vec![
                    record.category.as_str(),
                    record.image_ref.as_str(),
                    data_json.as_str(),
                    record.name.as_str(),
                ];
                if record.kind == EntityKind::Creature {
                    values.push(record.subcategory_column());
                }
                transaction
                    .execute(&sql, params_from_iter(values))
                    .with_context(|| format!("failed to update {} {}", record.kind, record.name))?;
                UpsertOutcome::Updated
            }
            Some(_) => UpsertOutcome::Unchanged,
        };
        transaction
            .commit()
            .context("failed to commit upsert transaction")?;
        Ok(outcome)
    }

    pub fn delete(&self, kind: EntityKind, name: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE name = ?1", kind.table());
        let deleted = self
            .connection
            .execute(&sql, [name])
            .with_context(|| format!("failed to delete {kind} {name}"))?;
        Ok(deleted > 0)
    }

    /// Removes every record in `category`. Cached image files are left alone.
    pub fn delete_all_by_category(&self, kind: EntityKind, category: &str) -> Result<usize> {
        let sql = format!("DELETE FROM {} WHERE category = ?1", kind.table());
        self.connection
            .execute(&sql, [category])
            .with_context(|| format!("failed to delete {kind} category {category}"))
    }

    pub fn list_all(&self, kind: EntityKind) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY category ASC, name ASC",
            kind.columns(),
            kind.table()
        );
        let mut statement = self
            .connection
            .prepare(&sql)
            .with_context(|| format!("failed to prepare {kind} listing"))?;
        let rows = statement
            .query_map([], raw_row)
            .with_context(|| format!("failed to list {kind} records"))?;

        let mut records = Vec::new();
        for row in rows {
            let raw = row.with_context(|| format!("failed to decode {kind} row"))?;
            records.push(raw.into_record(kind));
        }
        Ok(records)
    }

    pub fn count(&self, kind: EntityKind) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table());
        let count: i64 = self
            .connection
            .query_row(&sql, [], |row| row.get(0))
            .with_context(|| format!("failed to count {kind} records"))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

struct RawRow {
    name: String,
    category: String,
    subcategory: String,
    image_ref: String,
    data_json: String,
}

impl RawRow {
    fn into_record(self, kind: EntityKind) -> Record {
        let attributes = decode_attributes(&self.data_json).unwrap_or_else(|error| {
            tracing::warn!(%kind, name = %self.name, "stored attributes are unreadable: {error:#}");
            Attributes::new()
        });
        Record {
            kind,
            subcategory: match kind {
                EntityKind::Creature if !self.subcategory.is_empty() => Some(self.subcategory),
                _ => None,
            },
            name: self.name,
            category: self.category,
            image_ref: self.image_ref,
            attributes,
        }
    }
}

fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        name: row.get(0)?,
        category: row.get(1)?,
        subcategory: row.get(2)?,
        image_ref: row.get(3)?,
        data_json: row.get(4)?,
    })
}

fn read_record(connection: &Connection, kind: EntityKind, name: &str) -> Result<Option<Record>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE name = ?1",
        kind.columns(),
        kind.table()
    );
    let raw = connection
        .query_row(&sql, [name], raw_row)
        .optional()
        .with_context(|| format!("failed to read {kind} {name}"))?;
    Ok(raw.map(|raw| raw.into_record(kind)))
}

fn insert_record(connection: &Connection, record: &Record, ignore_existing: bool) -> Result<bool> {
    let verb = if ignore_existing {
        "INSERT OR IGNORE"
    } else {
        "INSERT"
    };
    let data_json = encode_attributes(&record.attributes)?;
    let inserted = match record.kind {
        EntityKind::Item => connection.execute(
            &format!("{verb} INTO items (name, category, image_ref, data_json) VALUES (?1, ?2, ?3, ?4)"),
            params![record.name, record.category, record.image_ref, data_json],
        ),
        EntityKind::Creature => connection.execute(
            &format!(
                "{verb} INTO creatures (name, category, subcategory, image_ref, data_json) VALUES (?1, ?2, ?3, ?4, ?5)"
            ),
            params![
                record.name,
                record.category,
                record.subcategory_column(),
                record.image_ref,
                data_json
            ],
        ),
    }
    .with_context(|| format!("failed to insert {} {}", record.kind, record.name))?;
    Ok(inserted > 0)
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::value::AttrValue;

    fn helmet() -> Record {
        let mut record = Record::item("Test Helmet", "Helmets");
        record.image_ref = "images/items/Helmets/Test_Helmet.gif".to_string();
        let combat = Attributes::from([("Armor".to_string(), AttrValue::Int(5))]);
        record
            .attributes
            .insert("Combat Properties".to_string(), AttrValue::Map(combat));
        record
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut store = Store::open_in_memory().expect("store");
        assert_eq!(store.upsert(&helmet()).expect("first"), UpsertOutcome::Created);
        assert_eq!(store.upsert(&helmet()).expect("second"), UpsertOutcome::Unchanged);
        assert_eq!(store.read(EntityKind::Item, "Test Helmet").expect("read"), Some(helmet()));
    }

    #[test]
    fn upsert_detects_nested_attribute_change() {
        let mut store = Store::open_in_memory().expect("store");
        store.upsert(&helmet()).expect("create");

        let mut changed = helmet();
        changed.attributes.insert(
            "Combat Properties".to_string(),
            AttrValue::Map(Attributes::from([("Armor".to_string(), AttrValue::Int(6))])),
        );
        assert_eq!(store.upsert(&changed).expect("update"), UpsertOutcome::Updated);
        assert_eq!(
            store.read(EntityKind::Item, "Test Helmet").expect("read"),
            Some(changed)
        );
    }

    #[test]
    fn ranges_compare_equal_after_storage() {
        let mut store = Store::open_in_memory().expect("store");
        let mut sword = Record::item("Sabre", "Swords");
        sword.attributes.insert(
            "Damage".to_string(),
            AttrValue::Range {
                base: Some(50),
                min: 45,
                max: 55,
            },
        );
        assert_eq!(store.upsert(&sword).expect("create"), UpsertOutcome::Created);
        assert_eq!(store.upsert(&sword).expect("again"), UpsertOutcome::Unchanged);
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut store = Store::open_in_memory().expect("store");
        for name in ["", "   ", "None", "none"] {
            let record = Record::item(name, "Helmets");
            assert_eq!(store.upsert(&record).expect("upsert"), UpsertOutcome::Rejected);
            assert!(store.create(&record).is_err());
        }
        assert_eq!(store.count(EntityKind::Item).expect("count"), 0);
    }

    #[test]
    fn create_ignores_existing_names() {
        let store = Store::open_in_memory().expect("store");
        assert!(store.create(&helmet()).expect("create"));
        let mut other = helmet();
        other.category = "Armors".to_string();
        assert!(!store.create(&other).expect("create again"));
        let stored = store
            .read(EntityKind::Item, "Test Helmet")
            .expect("read")
            .expect("present");
        assert_eq!(stored.category, "Helmets");
    }

    #[test]
    fn update_applies_only_set_fields() {
        let store = Store::open_in_memory().expect("store");
        store.create(&helmet()).expect("create");
        let changed = store
            .update(
                EntityKind::Item,
                "Test Helmet",
                &RecordPatch {
                    image_ref: Some("elsewhere.gif".to_string()),
                    ..RecordPatch::default()
                },
            )
            .expect("update");
        assert_eq!(changed, 1);
        let stored = store
            .read(EntityKind::Item, "Test Helmet")
            .expect("read")
            .expect("present");
        assert_eq!(stored.image_ref, "elsewhere.gif");
        assert_eq!(stored.category, "Helmets");
        assert_eq!(stored.attributes, helmet().attributes);

        let none = store
            .update(EntityKind::Item, "Missing", &RecordPatch::default())
            .expect("noop");
        assert_eq!(none, 0);
    }

    #[test]
    fn creatures_keep_subcategory() {
        let mut store = Store::open_in_memory().expect("store");
        let elf = Record::creature("Elf", "Humanoids", "Elves");
        assert_eq!(store.upsert(&elf).expect("create"), UpsertOutcome::Created);
        let mut moved = elf.clone();
        moved.subcategory = Some("Fae".to_string());
        assert_eq!(store.upsert(&moved).expect("move"), UpsertOutcome::Updated);
        let stored = store
            .read(EntityKind::Creature, "Elf")
            .expect("read")
            .expect("present");
        assert_eq!(stored.subcategory.as_deref(), Some("Fae"));
        assert!(store.read(EntityKind::Item, "Elf").expect("read").is_none());
    }

    #[test]
    fn delete_single_and_by_category() {
        let mut store = Store::open_in_memory().expect("store");
        store.upsert(&helmet()).expect("helmet");
        store
            .upsert(&Record::item("Leather Helmet", "Helmets"))
            .expect("leather");
        store.upsert(&Record::item("Plate Armor", "Armors")).expect("armor");

        assert!(store.delete(EntityKind::Item, "Plate Armor").expect("delete"));
        assert!(!store.delete(EntityKind::Item, "Plate Armor").expect("again"));
        assert_eq!(
            store
                .delete_all_by_category(EntityKind::Item, "Helmets")
                .expect("bulk"),
            2
        );
        assert_eq!(store.count(EntityKind::Item).expect("count"), 0);
    }

    #[test]
    fn unreadable_json_yields_empty_attributes() {
        let store = Store::open_in_memory().expect("store");
        store
            .connection
            .execute(
                "INSERT INTO items (name, category, image_ref, data_json) VALUES ('Broken', 'Rings', '', '{oops')",
                [],
            )
            .expect("insert");
        store.create(&Record::item("Fine Ring", "Rings")).expect("create");

        let records = store.list_all(EntityKind::Item).expect("list");
        assert_eq!(records.len(), 2);
        assert!(records[0].attributes.is_empty());
        assert_eq!(records[0].name, "Broken");
    }

    #[test]
    fn file_store_persists_between_opens() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("data").join("tibiadex.db");
        {
            let mut store = Store::open(&db_path).expect("open");
            store.upsert(&helmet()).expect("upsert");
        }
        let store = Store::open(&db_path).expect("reopen");
        assert!(store.exists(EntityKind::Item, "Test Helmet").expect("exists"));
        assert_eq!(store.count(EntityKind::Item).expect("count"), 1);
    }
}
