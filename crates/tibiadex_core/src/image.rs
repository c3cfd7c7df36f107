//! Local image cache: filename derivation, multi-source downloads, store
//! reconciliation and cache maintenance.
//!
//! Stored references are paths relative to the image root using `/`
//! separators (`items/Helmets/Steel_Helmet.gif`), or `data:` URIs that were
//! supplied inline.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Url;
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::Settings;
use crate::extract::wiki_url;
use crate::http::{Fetcher, first_success};
use crate::store::{EntityKind, RecordPatch, Store};

const IMAGE_EXTENSIONS: [&str; 5] = ["gif", "png", "jpg", "jpeg", "webp"];
const UNKNOWN_FILENAME: &str = "img_unknown.gif";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTarget<'a> {
    Item { category: &'a str },
    Creature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageOutcome {
    /// An inline `data:` URI was kept as the reference.
    Embedded,
    Reused,
    Downloaded,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAcquisition {
    /// Empty when nothing could be obtained.
    pub reference: String,
    pub outcome: ImageOutcome,
}

impl ImageAcquisition {
    fn missing() -> Self {
        Self {
            reference: String::new(),
            outcome: ImageOutcome::Missing,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RelocationReport {
    pub moved: usize,
    pub reused: usize,
    pub already_placed: usize,
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheAuditReport {
    pub files_scanned: usize,
    pub orphaned_files: Vec<String>,
    pub missing_files: Vec<MissingImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingImage {
    pub kind: EntityKind,
    pub name: String,
    pub image_ref: String,
}

pub struct ImageCache {
    root: PathBuf,
    wiki_url: String,
    static_url: String,
    timeout: Duration,
}

impl ImageCache {
    pub fn new(root: impl Into<PathBuf>, settings: &Settings) -> Self {
        Self {
            root: root.into(),
            wiki_url: settings.wiki_url.trim_end_matches('/').to_string(),
            static_url: settings.static_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(settings.image_timeout_ms),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn target_dir(&self, target: ImageTarget<'_>) -> PathBuf {
        match target {
            ImageTarget::Item { category } => self.root.join("items").join(sanitize_name(category)),
            ImageTarget::Creature => self.root.join("creatures"),
        }
    }

    /// Absolute path for a stored reference; `None` for inline or empty ones.
    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        if reference.is_empty() || reference.starts_with("data:") {
            return None;
        }
        let path = Path::new(reference);
        if path.is_absolute() {
            return Some(path.to_path_buf());
        }
        Some(
            reference
                .split('/')
                .filter(|segment| !segment.is_empty())
                .fold(self.root.clone(), |path, segment| path.join(segment)),
        )
    }

    fn reference_for(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Ordered download candidates for `name`.
    pub fn candidate_urls(
        &self,
        name: &str,
        url: Option<&str>,
        target: ImageTarget<'_>,
    ) -> Vec<String> {
        let mut candidates = Vec::new();
        if let Some(url) = url.filter(|url| !url.trim().is_empty()) {
            candidates.push(url.trim().to_string());
        }
        if target == ImageTarget::Creature {
            let sanitized = sanitize_name(name);
            let library = format!("{}.gif", sanitized.to_lowercase());
            let fallbacks = [
                static_library_url(&self.static_url, &library),
                wiki_url(&self.wiki_url, &format!("Special:FilePath/{sanitized}.gif")).ok(),
            ];
            for fallback in fallbacks.into_iter().flatten() {
                if !candidates.contains(&fallback) {
                    candidates.push(fallback);
                }
            }
        }
        candidates
    }

    /// Makes sure a local copy exists and returns its reference. Never fails:
    /// problems are logged and yield an empty reference.
    pub fn acquire<F: Fetcher + ?Sized>(
        &self,
        fetcher: &mut F,
        name: &str,
        url: Option<&str>,
        target: ImageTarget<'_>,
    ) -> ImageAcquisition {
        let mut url = url.map(str::trim).filter(|url| !url.is_empty());
        if let Some(inline) = url
            && inline.starts_with("data:")
        {
            return ImageAcquisition {
                reference: inline.to_string(),
                outcome: ImageOutcome::Embedded,
            };
        }
        if let Some(malformed) = url
            && is_malformed_url(malformed)
        {
            tracing::warn!(name, url = malformed, "skipping malformed image URL");
            url = None;
        }
        if url.is_none() && target != ImageTarget::Creature {
            return ImageAcquisition::missing();
        }

        let filename = original_filename(name, url.unwrap_or_default());
        let dir = self.target_dir(target);
        let path = dir.join(&filename);
        if path.exists() {
            tracing::debug!(name, path = %path.display(), "image already cached");
            return ImageAcquisition {
                reference: self.reference_for(&path),
                outcome: ImageOutcome::Reused,
            };
        }

        let candidates = self.candidate_urls(name, url, target);
        let timeout = self.timeout;
        let Some((index, bytes)) =
            first_success(&candidates, |candidate| fetcher.get_bytes(candidate, timeout))
        else {
            tracing::warn!(name, tried = candidates.len(), "no image source succeeded");
            return ImageAcquisition::missing();
        };

        if let Err(error) = write_image(&dir, &path, &bytes) {
            tracing::warn!(name, "failed to cache image: {error:#}");
            return ImageAcquisition::missing();
        }
        tracing::debug!(name, source = %candidates[index], "downloaded image");
        ImageAcquisition {
            reference: self.reference_for(&path),
            outcome: ImageOutcome::Downloaded,
        }
    }

    /// Moves item images that sit outside `items/<category>/` into place and
    /// repoints the store at them.
    pub fn relocate_item_images(&self, store: &Store) -> Result<RelocationReport> {
        let mut report = RelocationReport::default();
        for record in store.list_all(EntityKind::Item)? {
            let Some(current) = self.resolve(&record.image_ref) else {
                continue;
            };
            let Some(filename) = current.file_name() else {
                continue;
            };
            let dir = self.target_dir(ImageTarget::Item {
                category: &record.category,
            });
            let target = dir.join(filename);
            if current == target {
                report.already_placed += 1;
                continue;
            }
            if !current.exists() {
                report.missing.push(record.name.clone());
                continue;
            }

            if target.exists() && file_digest(&target)? == file_digest(&current)? {
                fs::remove_file(&current)
                    .with_context(|| format!("failed to remove {}", current.display()))?;
                report.reused += 1;
            } else {
                fs::create_dir_all(&dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
                fs::rename(&current, &target).with_context(|| {
                    format!(
                        "failed to move {} to {}",
                        current.display(),
                        target.display()
                    )
                })?;
                report.moved += 1;
            }
            reconcile_image_ref(store, EntityKind::Item, &record.name, &self.reference_for(&target))?;
        }
        tracing::info!(
            moved = report.moved,
            reused = report.reused,
            missing = report.missing.len(),
            "relocated item images"
        );
        Ok(report)
    }

    /// Cache files no record points at, and records whose file is gone.
    pub fn audit_cache(&self, store: &Store) -> Result<CacheAuditReport> {
        let mut report = CacheAuditReport::default();
        let mut referenced = BTreeSet::new();
        for kind in [EntityKind::Item, EntityKind::Creature] {
            for record in store.list_all(kind)? {
                let Some(path) = self.resolve(&record.image_ref) else {
                    continue;
                };
                if path.exists() {
                    referenced.insert(path);
                } else {
                    report.missing_files.push(MissingImage {
                        kind,
                        name: record.name,
                        image_ref: record.image_ref,
                    });
                }
            }
        }

        if self.root.exists() {
            for entry in WalkDir::new(&self.root).sort_by_file_name() {
                let entry = entry.with_context(|| {
                    format!("failed to walk image cache {}", self.root.display())
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                report.files_scanned += 1;
                if !referenced.contains(entry.path()) {
                    report.orphaned_files.push(self.reference_for(entry.path()));
                }
            }
        }
        Ok(report)
    }
}

/// Points the stored record at `reference` when it differs. Returns whether
/// a write happened.
pub fn reconcile_image_ref(
    store: &Store,
    kind: EntityKind,
    name: &str,
    reference: &str,
) -> Result<bool> {
    if reference.is_empty() {
        return Ok(false);
    }
    let Some(record) = store.read(kind, name)? else {
        return Ok(false);
    };
    if record.image_ref == reference {
        return Ok(false);
    }
    let patch = RecordPatch {
        image_ref: Some(reference.to_string()),
        ..RecordPatch::default()
    };
    Ok(store.update(kind, name, &patch)? > 0)
}

/// Encodes a cached image as an inline `data:` URI.
pub fn to_data_uri(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "gif".to_string());
    let mime = match extension.as_str() {
        "jpg" => "jpeg",
        other => other,
    };
    Ok(format!("data:image/{mime};base64,{}", STANDARD.encode(bytes)))
}

pub fn sanitize_name(name: &str) -> String {
    name.trim()
        .replace(' ', "_")
        .replace(['\'', '"'], "")
        .replace(['/', '\\'], "_")
}

/// Local filename for an image: the file named by the URL when it has one,
/// otherwise `<Sanitized_Name>.gif`.
pub fn original_filename(name: &str, url: &str) -> String {
    let fallback = || format!("{}.gif", sanitize_name(name));
    let Ok(url) = Url::parse(url.trim()) else {
        return fallback();
    };
    let segments = url
        .path_segments()
        .map(|segments| segments.collect::<Vec<_>>())
        .unwrap_or_default();

    if let Some(index) = segments.iter().position(|segment| *segment == "Special:FilePath") {
        let file = sanitize_name(&segments[index + 1..].join("/"));
        if file.is_empty() {
            return fallback();
        }
        return if has_image_extension(&file) {
            file
        } else {
            format!("{file}.gif")
        };
    }

    match segments.iter().rev().find(|segment| has_image_extension(segment)) {
        Some(segment) if *segment != UNKNOWN_FILENAME => segment.to_string(),
        _ => fallback(),
    }
}

fn static_library_url(static_url: &str, file: &str) -> Option<String> {
    let mut url = Url::parse(static_url).ok()?;
    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .extend(["images", "library", file]);
    Some(url.into())
}

fn has_image_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .is_some_and(|(stem, extension)| {
            !stem.is_empty() && IMAGE_EXTENSIONS.contains(&extension.to_ascii_lowercase().as_str())
        })
}

fn is_malformed_url(url: &str) -> bool {
    url.starts_with("https:data:") || url.starts_with("http:data:")
}

fn write_image(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

fn file_digest(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Sha256::digest(&bytes).to_vec())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::config::TibiadexConfig;
    use crate::http::testing::MockFetcher;
    use crate::store::Record;

    fn cache(root: &Path) -> ImageCache {
        let settings = TibiadexConfig::default().settings_with_lookup(|_| None);
        ImageCache::new(root, &settings)
    }

    const HELMET_URL: &str =
        "https://static.wikia.nocookie.net/tibia/images/e/e4/War_Horn_Helmet.gif/revision/latest?cb=1&format=original";

    #[test]
    fn filenames_follow_url_then_name() {
        assert_eq!(original_filename("War Horn Helmet", HELMET_URL), "War_Horn_Helmet.gif");
        assert_eq!(
            original_filename("Elf", "https://tibia.fandom.com/wiki/Special:FilePath/Elf"),
            "Elf.gif"
        );
        assert_eq!(
            original_filename("Elf", "https://tibia.fandom.com/wiki/Special:FilePath/Elf.png"),
            "Elf.png"
        );
        assert_eq!(
            original_filename("Dragon's \"Lair\"", "https://example.org/no/extension"),
            "Dragons_Lair.gif"
        );
        assert_eq!(
            original_filename("Odd/Thing", "https://example.org/img_unknown.gif"),
            "Odd_Thing.gif"
        );
    }

    #[test]
    fn filenames_ignore_query_and_fragment() {
        assert_eq!(
            original_filename("Elf", "https://tibia.fandom.com/wiki/Special:FilePath/Elf.gif?x=1#top"),
            "Elf.gif"
        );
        assert_eq!(
            original_filename("Ring", "https://img.example/a/ring.png?path=/b/other.gif"),
            "ring.png"
        );
        assert_eq!(original_filename("Ring", "ring.png?format=original"), "Ring.gif");
    }

    #[test]
    fn cached_image_is_fetched_once() {
        let temp = tempdir().expect("tempdir");
        let cache = cache(temp.path());
        let mut fetcher = MockFetcher::default().with_bytes(HELMET_URL, b"GIF89a");
        let target = ImageTarget::Item {
            category: "Helmets",
        };

        let first = cache.acquire(&mut fetcher, "War Horn Helmet", Some(HELMET_URL), target);
        let second = cache.acquire(&mut fetcher, "War Horn Helmet", Some(HELMET_URL), target);

        assert_eq!(first.outcome, ImageOutcome::Downloaded);
        assert_eq!(second.outcome, ImageOutcome::Reused);
        assert_eq!(first.reference, "items/Helmets/War_Horn_Helmet.gif");
        assert_eq!(second.reference, first.reference);
        assert_eq!(fetcher.request_count(), 1);
        let stored = fs::read(temp.path().join("items/Helmets/War_Horn_Helmet.gif")).expect("read");
        assert_eq!(stored, b"GIF89a");
    }

    #[test]
    fn creatures_fall_back_to_static_then_wiki() {
        let temp = tempdir().expect("tempdir");
        let cache = cache(temp.path());
        let mut fetcher = MockFetcher::default().with_bytes(
            "https://tibia.fandom.com/wiki/Special:FilePath/Dragon_Lord.gif",
            b"GIF",
        );

        let result = cache.acquire(
            &mut fetcher,
            "Dragon Lord",
            Some("https://broken.example/Dragon_Lord.gif"),
            ImageTarget::Creature,
        );
        assert_eq!(result.outcome, ImageOutcome::Downloaded);
        assert_eq!(result.reference, "creatures/Dragon_Lord.gif");
        assert_eq!(
            fetcher.requested,
            vec![
                "https://broken.example/Dragon_Lord.gif".to_string(),
                "https://static.tibia.com/images/library/dragon_lord.gif".to_string(),
                "https://tibia.fandom.com/wiki/Special:FilePath/Dragon_Lord.gif".to_string(),
            ]
        );
    }

    #[test]
    fn total_failure_yields_empty_reference() {
        let temp = tempdir().expect("tempdir");
        let cache = cache(temp.path());
        let mut fetcher = MockFetcher::default();
        let result = cache.acquire(
            &mut fetcher,
            "Ghost Item",
            Some("https://nowhere.example/ghost.png"),
            ImageTarget::Item { category: "Rings" },
        );
        assert_eq!(result, ImageAcquisition::missing());
        assert!(!temp.path().join("items/Rings/ghost.png").exists());
    }

    #[test]
    fn inline_and_malformed_urls() {
        let temp = tempdir().expect("tempdir");
        let cache = cache(temp.path());
        let mut fetcher = MockFetcher::default();
        let target = ImageTarget::Item { category: "Rings" };

        let inline = cache.acquire(&mut fetcher, "Ring", Some("data:image/gif;base64,R0lG"), target);
        assert_eq!(inline.outcome, ImageOutcome::Embedded);
        assert_eq!(inline.reference, "data:image/gif;base64,R0lG");

        let malformed = cache.acquire(&mut fetcher, "Ring", Some("https:data:image/gif"), target);
        assert_eq!(malformed.outcome, ImageOutcome::Missing);
        assert_eq!(fetcher.request_count(), 0);
    }

    #[test]
    fn data_uri_encodes_file_contents() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("photo.JPG");
        fs::write(&path, b"abc").expect("write");
        assert_eq!(to_data_uri(&path).expect("encode"), "data:image/jpeg;base64,YWJj");
    }

    #[test]
    fn relocation_moves_and_reuses_identical_files() {
        let temp = tempdir().expect("tempdir");
        let cache = cache(temp.path());
        let mut store = Store::open_in_memory().expect("store");

        fs::create_dir_all(temp.path().join("legacy")).expect("legacy dir");
        fs::write(temp.path().join("legacy/a.gif"), b"A").expect("a");
        fs::write(temp.path().join("legacy/b.gif"), b"B").expect("b");
        fs::create_dir_all(temp.path().join("items/Rings")).expect("rings dir");
        fs::write(temp.path().join("items/Rings/b.gif"), b"B").expect("b target");

        let mut moved = Record::item("Ring A", "Rings");
        moved.image_ref = "legacy/a.gif".to_string();
        let mut reused = Record::item("Ring B", "Rings");
        reused.image_ref = "legacy/b.gif".to_string();
        let mut lost = Record::item("Ring C", "Rings");
        lost.image_ref = "legacy/c.gif".to_string();
        for record in [&moved, &reused, &lost] {
            store.upsert(record).expect("upsert");
        }

        let report = cache.relocate_item_images(&store).expect("relocate");
        assert_eq!(report.moved, 1);
        assert_eq!(report.reused, 1);
        assert_eq!(report.missing, vec!["Ring C".to_string()]);
        assert!(temp.path().join("items/Rings/a.gif").exists());
        assert!(!temp.path().join("legacy/b.gif").exists());
        let stored = store
            .read(EntityKind::Item, "Ring A")
            .expect("read")
            .expect("present");
        assert_eq!(stored.image_ref, "items/Rings/a.gif");

        let again = cache.relocate_item_images(&store).expect("relocate again");
        assert_eq!(again.already_placed, 2);
    }

    #[test]
    fn audit_reports_orphans_and_missing_files() {
        let temp = tempdir().expect("tempdir");
        let cache = cache(temp.path());
        let mut store = Store::open_in_memory().expect("store");

        fs::create_dir_all(temp.path().join("creatures")).expect("dir");
        fs::write(temp.path().join("creatures/Elf.gif"), b"E").expect("elf");
        fs::write(temp.path().join("creatures/Stray.gif"), b"S").expect("stray");

        let mut elf = Record::creature("Elf", "Humanoids", "Elves");
        elf.image_ref = "creatures/Elf.gif".to_string();
        let mut orc = Record::creature("Orc", "Humanoids", "Orcs");
        orc.image_ref = "creatures/Orc.gif".to_string();
        store.upsert(&elf).expect("elf");
        store.upsert(&orc).expect("orc");

        let report = cache.audit_cache(&store).expect("audit");
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.orphaned_files, vec!["creatures/Stray.gif".to_string()]);
        assert_eq!(report.missing_files.len(), 1);
        assert_eq!(report.missing_files[0].name, "Orc");
    }

    #[test]
    fn reconcile_updates_only_when_different() {
        let mut store = Store::open_in_memory().expect("store");
        let mut record = Record::item("Ring", "Rings");
        record.image_ref = "items/Rings/ring.gif".to_string();
        store.upsert(&record).expect("upsert");

        assert!(!reconcile_image_ref(&store, EntityKind::Item, "Ring", "items/Rings/ring.gif").expect("same"));
        assert!(reconcile_image_ref(&store, EntityKind::Item, "Ring", "items/Rings/new.gif").expect("differs"));
        assert!(!reconcile_image_ref(&store, EntityKind::Item, "Missing", "x.gif").expect("absent"));
    }
}
