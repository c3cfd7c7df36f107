use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::catalog::{ITEM_CATEGORIES, creature_targets, item_category};
use crate::config::Settings;
use crate::extract::{ListingRow, fetch_detail, parse_creature_listing, parse_listing, wiki_url};
use crate::http::Fetcher;
use crate::image::{ImageAcquisition, ImageCache, ImageOutcome, ImageTarget};
use crate::infer::infer_category;
use crate::store::{EntityKind, Record, Store, UpsertOutcome};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScrapeReport {
    pub pages: usize,
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub rejected: usize,
    pub skipped: usize,
    pub images_downloaded: usize,
    pub images_reused: usize,
    pub images_missing: usize,
    pub cancelled: bool,
    pub failures: Vec<String>,
}

impl ScrapeReport {
    fn record_upsert(&mut self, outcome: UpsertOutcome) {
        self.processed += 1;
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
            UpsertOutcome::Rejected => self.rejected += 1,
        }
    }

    fn record_image(&mut self, outcome: ImageOutcome) {
        match outcome {
            ImageOutcome::Downloaded => self.images_downloaded += 1,
            ImageOutcome::Reused | ImageOutcome::Embedded => self.images_reused += 1,
            ImageOutcome::Missing => self.images_missing += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub name: String,
    pub category: String,
    pub previous_category: Option<String>,
    pub outcome: UpsertOutcome,
    pub image: ImageOutcome,
}

/// Drives listing → detail → normalize → infer → image → upsert, one row at
/// a time.
pub struct Scraper<'a, F: Fetcher + ?Sized> {
    fetcher: &'a mut F,
    store: &'a mut Store,
    images: &'a ImageCache,
    wiki_url: String,
    detail_delay: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, F: Fetcher + ?Sized> Scraper<'a, F> {
    pub fn new(
        fetcher: &'a mut F,
        store: &'a mut Store,
        images: &'a ImageCache,
        settings: &Settings,
    ) -> Self {
        Self {
            fetcher,
            store,
            images,
            wiki_url: settings.wiki_url.trim_end_matches('/').to_string(),
            detail_delay: Duration::from_millis(settings.detail_delay_ms),
            cancel: None,
        }
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Scrapes one category (or all known ones) and upserts every row.
    pub fn scrape(&mut self, category: Option<&str>) -> Result<ScrapeReport> {
        self.scrape_items(category, false)
    }

    /// Like [`Scraper::scrape`] but leaves names already in the store alone.
    pub fn scrape_missing(&mut self, category: Option<&str>) -> Result<ScrapeReport> {
        self.scrape_items(category, true)
    }

    fn scrape_items(&mut self, category: Option<&str>, only_missing: bool) -> Result<ScrapeReport> {
        let mut report = ScrapeReport::default();
        for (name, page) in item_targets(category) {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let url = wiki_url(&self.wiki_url, &page)?;
            let html = match self.fetcher.get_text(&url) {
                Ok(html) => html,
                Err(error) => {
                    tracing::warn!(category = %name, "failed to fetch listing: {error:#}");
                    report.failures.push(format!("{name}: {error:#}"));
                    continue;
                }
            };
            report.pages += 1;

            let rows = parse_listing(&html, &name, &self.wiki_url);
            let before = report.processed;
            for row in rows {
                if self.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                if only_missing && self.store.exists(EntityKind::Item, &row.name)? {
                    report.skipped += 1;
                    continue;
                }
                self.process_item_row(row, &mut report)?;
            }
            tracing::info!(
                category = %name,
                processed = report.processed - before,
                "finished item category"
            );
            if report.cancelled {
                break;
            }
        }
        Ok(report)
    }

    fn process_item_row(&mut self, row: ListingRow, report: &mut ScrapeReport) -> Result<()> {
        let detail = fetch_detail(&mut *self.fetcher, &row.detail_url);
        self.pause();

        let mut attributes = row.columns;
        attributes.extend(detail.attributes);
        let category = match item_category(&row.category) {
            Some(known) => known.name.to_string(),
            None => infer_category(&attributes, &row.name),
        };

        let image_url = row.image_url.or(detail.image_url);
        let image = self.images.acquire(
            &mut *self.fetcher,
            &row.name,
            image_url.as_deref(),
            ImageTarget::Item {
                category: &category,
            },
        );
        report.record_image(image.outcome);

        let record = Record {
            image_ref: self.keep_existing_image(EntityKind::Item, &row.name, image)?,
            attributes,
            ..Record::item(row.name, category)
        };
        let outcome = self.store.upsert(&record)?;
        tracing::debug!(name = %record.name, category = %record.category, ?outcome, "upserted item");
        report.record_upsert(outcome);
        Ok(())
    }

    /// Re-fetches one item's detail page and replaces its stored attributes.
    /// With `preserve_category` an existing category is kept as is.
    pub fn force_refresh_single(
        &mut self,
        name: &str,
        preserve_category: bool,
    ) -> Result<RefreshReport> {
        let name = name.trim();
        let existing = self.store.read(EntityKind::Item, name)?;
        let detail = fetch_detail(&mut *self.fetcher, &wiki_url(&self.wiki_url, name)?);
        if detail.attributes.is_empty() {
            bail!("no detail data found for {name}");
        }

        let previous_category = existing
            .as_ref()
            .map(|record| record.category.clone())
            .filter(|category| !category.trim().is_empty());
        let category = match (&previous_category, preserve_category) {
            (Some(previous), true) => previous.clone(),
            _ => infer_category(&detail.attributes, name),
        };

        let image = self.images.acquire(
            &mut *self.fetcher,
            name,
            detail.image_url.as_deref(),
            ImageTarget::Item {
                category: &category,
            },
        );
        let image_outcome = image.outcome;
        let record = Record {
            image_ref: self.keep_existing_image(EntityKind::Item, name, image)?,
            attributes: detail.attributes,
            ..Record::item(name, category.clone())
        };
        let outcome = self.store.upsert(&record)?;
        tracing::info!(name, category = %category, ?outcome, "refreshed item");

        Ok(RefreshReport {
            name: name.to_string(),
            category,
            previous_category,
            outcome,
            image: image_outcome,
        })
    }

    /// Scrapes creature listings for the selected catalog entries.
    pub fn scrape_creatures(
        &mut self,
        category: Option<&str>,
        subcategory: Option<&str>,
    ) -> Result<ScrapeReport> {
        let targets = creature_targets(category, subcategory);
        if targets.is_empty() {
            bail!(
                "no creature catalog entry matches category={} subcategory={}",
                category.unwrap_or("*"),
                subcategory.unwrap_or("*")
            );
        }

        let mut report = ScrapeReport::default();
        for (category, subcategory) in targets {
            if self.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let url = wiki_url(&self.wiki_url, subcategory)?;
            let html = match self.fetcher.get_text(&url) {
                Ok(html) => html,
                Err(error) => {
                    tracing::warn!(category, subcategory, "failed to fetch creature listing: {error:#}");
                    report.failures.push(format!("{subcategory}: {error:#}"));
                    continue;
                }
            };
            report.pages += 1;

            let before = report.processed;
            for row in parse_creature_listing(&html, category, subcategory, &self.wiki_url) {
                if self.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                self.process_creature_row(row, &mut report)?;
            }
            tracing::info!(
                category,
                subcategory,
                processed = report.processed - before,
                "finished creature subcategory"
            );
            if report.cancelled {
                break;
            }
        }
        Ok(report)
    }

    fn process_creature_row(&mut self, row: ListingRow, report: &mut ScrapeReport) -> Result<()> {
        let detail = fetch_detail(&mut *self.fetcher, &row.detail_url);
        self.pause();

        let mut attributes = row.columns;
        attributes.extend(detail.attributes);
        let image_url = row.image_url.or(detail.image_url);
        let image = self.images.acquire(
            &mut *self.fetcher,
            &row.name,
            image_url.as_deref(),
            ImageTarget::Creature,
        );
        report.record_image(image.outcome);

        let record = Record {
            image_ref: self.keep_existing_image(EntityKind::Creature, &row.name, image)?,
            attributes,
            ..Record::creature(row.name, row.category, row.subcategory.unwrap_or_default())
        };
        let outcome = self.store.upsert(&record)?;
        tracing::debug!(name = %record.name, ?outcome, "upserted creature");
        report.record_upsert(outcome);
        Ok(())
    }

    /// A failed download never wipes a reference that is already stored.
    fn keep_existing_image(
        &self,
        kind: EntityKind,
        name: &str,
        image: ImageAcquisition,
    ) -> Result<String> {
        if !image.reference.is_empty() {
            return Ok(image.reference);
        }
        Ok(self
            .store
            .read(kind, name)?
            .map(|record| record.image_ref)
            .unwrap_or_default())
    }

    fn pause(&self) {
        if !self.detail_delay.is_zero() {
            sleep(self.detail_delay);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|cancel| cancel.load(Ordering::Relaxed))
    }
}

/// `(category name, wiki page)` pairs to scrape. Names outside the catalog
/// are scraped from the page of the same name.
fn item_targets(category: Option<&str>) -> Vec<(String, String)> {
    match category {
        None => ITEM_CATEGORIES
            .iter()
            .map(|entry| (entry.name.to_string(), entry.page.to_string()))
            .collect(),
        Some(wanted) => match item_category(wanted) {
            Some(entry) => vec![(entry.name.to_string(), entry.page.to_string())],
            None => {
                let wanted = wanted.trim();
                vec![(wanted.to_string(), wanted.to_string())]
            }
        },
    }
}
