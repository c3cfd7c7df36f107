//! HTML extraction for wiki listing tables, creature tables and infobox
//! detail pages. Extraction never fails: missing structure yields empty
//! results and a warning.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

use crate::catalog::{listing_layout, page_path};
use crate::http::Fetcher;
use crate::normalize::{RawValue, normalize_field};
use crate::value::{AttrValue, Attributes};

static WIKITABLE: Lazy<Selector> = Lazy::new(|| selector("table.wikitable"));
static SECTION_OR_TABLE: Lazy<Selector> = Lazy::new(|| selector("h2, h3, table.wikitable"));
static ROW: Lazy<Selector> = Lazy::new(|| selector("tr"));
static ANCHOR: Lazy<Selector> = Lazy::new(|| selector("a"));
static IMAGE: Lazy<Selector> = Lazy::new(|| selector("img"));
static INFOBOX: Lazy<Selector> = Lazy::new(|| selector("aside.portable-infobox"));
static INFOBOX_THUMBNAIL: Lazy<Selector> = Lazy::new(|| selector("img.pi-image-thumbnail"));
static GROUP_HEADER: Lazy<Selector> = Lazy::new(|| selector(".pi-header"));
static DATA_ITEM: Lazy<Selector> = Lazy::new(|| selector("div.pi-data"));
static DATA_LABEL: Lazy<Selector> = Lazy::new(|| selector(".pi-data-label"));
static DATA_VALUE: Lazy<Selector> = Lazy::new(|| selector(".pi-data-value"));
static BRACKETED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[^\]]*\]").expect("bracket pattern"));

const RESISTANCE_ANCHORS: [&str; 2] = ["Damage_Taken_During_Combat", "Susceptibility"];
const LOOT_ANCHORS: [&str; 1] = ["Loot"];
const COMMA_LIST_HINTS: [&str; 4] = ["attributes", "resist", "protection", "element"];
const COMMA_LIST_HEADERS: [&str; 2] = ["attributes", "resist."];
const LINE_BREAK_TAGS: [&str; 5] = ["li", "p", "div", "tr", "dd"];

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|error| panic!("invalid selector {css}: {error}"))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListingRow {
    pub name: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub image_url: Option<String>,
    pub detail_url: String,
    pub columns: Attributes,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailPage {
    pub attributes: Attributes,
    pub image_url: Option<String>,
}

pub fn parse_listing(html: &str, category: &str, base_url: &str) -> Vec<ListingRow> {
    let Some(base) = parse_base(base_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let Some(table) = document.select(&WIKITABLE).next() else {
        tracing::warn!(category, "no wikitable found on listing page");
        return Vec::new();
    };

    let layout = listing_layout(category);
    let headers = table_headers(table);
    let mut rows = Vec::new();

    for row in table.select(&ROW) {
        let cells = row_cells(row);
        if cells.iter().all(|cell| cell.value().name() == "th") {
            continue;
        }
        let name_cell = cells.get(layout.name_column()).copied();
        let image_cell = cells.get(layout.image_column()).copied();

        let name = name_cell.map(cell_name).unwrap_or_default();
        let image_url = image_cell.and_then(|cell| cell_image_url(&base, cell));
        if name.is_empty() && image_url.is_none() {
            continue;
        }

        let detail_url = name_cell
            .and_then(first_href)
            .and_then(|href| resolve_url(&base, &href))
            .unwrap_or_else(|| page_url(&base, &name));

        let mut columns = Attributes::new();
        for (index, cell) in cells.iter().enumerate() {
            if index == layout.name_column() || index == layout.image_column() {
                continue;
            }
            let Some(header) = headers.get(index).filter(|header| !header.is_empty()) else {
                continue;
            };
            columns.insert(header.clone(), listing_value(header, *cell));
        }

        tracing::debug!(category, name = %name, "parsed listing row");
        rows.push(ListingRow {
            name,
            category: category.to_string(),
            subcategory: None,
            image_url,
            detail_url,
            columns,
        });
    }
    rows
}

pub fn parse_creature_listing(
    html: &str,
    category: &str,
    subcategory: &str,
    base_url: &str,
) -> Vec<ListingRow> {
    let Some(base) = parse_base(base_url) else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let mut section = String::new();
    let mut rows = Vec::new();
    let mut saw_table = false;

    for element in document.select(&SECTION_OR_TABLE) {
        if element.value().name() != "table" {
            section = BRACKETED
                .replace_all(&cell_text(element), "")
                .trim()
                .to_string();
            continue;
        }

        let headers = table_headers(element);
        let position = |wanted: &str| {
            headers
                .iter()
                .position(|header| header.eq_ignore_ascii_case(wanted))
        };
        let (Some(name_index), Some(_), Some(_)) =
            (position("Name"), position("Exp"), position("HP"))
        else {
            continue;
        };
        saw_table = true;

        for row in element.select(&ROW) {
            let cells = row_cells(row);
            let Some(name_cell) = cells.get(name_index) else {
                continue;
            };
            let Some(anchor) = name_cell
                .select(&ANCHOR)
                .find(|anchor| anchor_title(*anchor).is_some())
            else {
                continue;
            };
            let Some(name) = anchor_title(anchor) else {
                continue;
            };

            let image_url = cells.iter().find_map(|cell| {
                let image = cell.select(&IMAGE).next()?;
                match image.value().attr("alt").map(str::trim) {
                    Some(alt) if !alt.is_empty() => {
                        Some(page_url(&base, &format!("Special:FilePath/{alt}")))
                    }
                    _ => image_source(&base, image),
                }
            });
            let detail_url = anchor
                .value()
                .attr("href")
                .and_then(|href| resolve_url(&base, href))
                .unwrap_or_else(|| page_url(&base, &name));

            let mut columns = Attributes::new();
            for (index, cell) in cells.iter().enumerate() {
                if index == name_index {
                    continue;
                }
                let Some(header) = headers.get(index).filter(|header| !header.is_empty()) else {
                    continue;
                };
                let value = listing_value(header, *cell);
                if !value.is_blank() {
                    columns.insert(header.clone(), value);
                }
            }
            if !section.is_empty() {
                columns.insert("Section".to_string(), AttrValue::text(section.clone()));
            }

            rows.push(ListingRow {
                name,
                category: category.to_string(),
                subcategory: Some(subcategory.to_string()),
                image_url,
                detail_url,
                columns,
            });
        }
    }

    if !saw_table {
        tracing::warn!(category, subcategory, "no creature table found on listing page");
    }
    rows
}

/// Parses a detail page fetched from `page_url`; relative thumbnail sources
/// resolve against it.
pub fn parse_infobox(html: &str, page_url: &str) -> DetailPage {
    let document = Html::parse_document(html);
    let mut page = DetailPage::default();

    if let Some(infobox) = document.select(&INFOBOX).next() {
        let base = parse_base(page_url);
        page.image_url = infobox
            .select(&INFOBOX_THUMBNAIL)
            .next()
            .zip(base.as_ref())
            .and_then(|(image, base)| image_source(base, image));

        for child in infobox.children().filter_map(ElementRef::wrap) {
            match child.value().name() {
                "section" => {
                    let fields = data_items(child);
                    let header = child
                        .select(&GROUP_HEADER)
                        .next()
                        .map(cell_text)
                        .filter(|header| !header.is_empty());
                    match header {
                        Some(header) if !fields.is_empty() => {
                            merge_group(&mut page.attributes, header, fields);
                        }
                        Some(_) => {}
                        None => page.attributes.extend(fields),
                    }
                }
                "div" if has_class(child, "pi-data") => {
                    if let Some((label, value)) = data_item(child) {
                        page.attributes.insert(label, value);
                    }
                }
                _ => {}
            }
        }
    }

    if let Some(table) = table_after_anchor(&document, &RESISTANCE_ANCHORS) {
        let resistances = parse_resistance_table(table);
        if !resistances.is_empty() {
            page.attributes
                .insert("Resistances".to_string(), AttrValue::Map(resistances));
        }
    }
    if let Some(table) = table_after_anchor(&document, &LOOT_ANCHORS) {
        let loot = parse_loot_table(table);
        if !loot.is_empty() {
            page.attributes
                .insert("Loot".to_string(), AttrValue::List(loot));
        }
    }

    page
}

/// Fetches and parses a detail page. Failures are logged and yield an empty page.
pub fn fetch_detail<F: Fetcher + ?Sized>(fetcher: &mut F, url: &str) -> DetailPage {
    match fetcher.get_text(url) {
        Ok(html) => parse_infobox(&html, url),
        Err(error) => {
            tracing::warn!(url, "failed to fetch detail page: {error:#}");
            DetailPage::default()
        }
    }
}

fn merge_group(attributes: &mut Attributes, header: String, fields: Attributes) {
    match attributes.get_mut(&header) {
        Some(AttrValue::Map(existing)) => existing.extend(fields),
        _ => {
            attributes.insert(header, AttrValue::Map(fields));
        }
    }
}

fn data_items(section: ElementRef<'_>) -> Attributes {
    section.select(&DATA_ITEM).filter_map(data_item).collect()
}

fn data_item(item: ElementRef<'_>) -> Option<(String, AttrValue)> {
    let label = item
        .select(&DATA_LABEL)
        .next()
        .map(cell_text)
        .filter(|label| !label.is_empty())
        .or_else(|| item.value().attr("data-source").map(str::to_string))?;
    let value = item.select(&DATA_VALUE).next()?;

    let mut lines = cell_lines(value);
    let raw = if lines.len() > 1 {
        RawValue::List(lines)
    } else {
        let text = lines.pop().unwrap_or_default();
        let lowered = label.to_ascii_lowercase();
        if text.contains(',') && COMMA_LIST_HINTS.iter().any(|hint| lowered.contains(hint)) {
            RawValue::List(split_commas(&text))
        } else {
            RawValue::Text(text)
        }
    };
    let value = normalize_field(&label, raw);
    Some((label, value))
}

fn listing_value(header: &str, cell: ElementRef<'_>) -> AttrValue {
    let lowered = header.to_ascii_lowercase();
    let raw = if COMMA_LIST_HEADERS.contains(&lowered.as_str()) {
        RawValue::List(split_commas(&cell_text(cell)))
    } else {
        let mut lines = cell_lines(cell);
        if lines.len() > 1 {
            RawValue::List(lines)
        } else {
            RawValue::Text(lines.pop().unwrap_or_default())
        }
    };
    normalize_field(header, raw)
}

fn parse_resistance_table(table: ElementRef<'_>) -> Attributes {
    let rows = table.select(&ROW).map(row_cells).collect::<Vec<_>>();
    let percent = |text: String| {
        let trimmed = text.replace('%', "");
        let trimmed = trimmed.trim();
        trimmed
            .parse::<i64>()
            .map(AttrValue::Int)
            .unwrap_or_else(|_| AttrValue::text(trimmed))
    };

    // Some pages lay the elements out as one header row over one value row.
    if let [header, values] = rows.as_slice()
        && header.len() > 2
        && header.len() == values.len()
    {
        return header
            .iter()
            .zip(values)
            .map(|(element, value)| (cell_text(*element), percent(cell_text(*value))))
            .filter(|(element, _)| !element.is_empty())
            .collect();
    }

    rows.iter()
        .skip(1)
        .filter(|cells| cells.len() >= 2)
        .map(|cells| (cell_text(cells[0]), percent(cell_text(cells[1]))))
        .filter(|(element, _)| !element.is_empty())
        .collect()
}

fn parse_loot_table(table: ElementRef<'_>) -> Vec<AttrValue> {
    table
        .select(&ROW)
        .skip(1)
        .map(row_cells)
        .filter(|cells| cells.len() >= 2)
        .filter_map(|cells| {
            let item = cell_text(cells[0]);
            if item.is_empty() {
                return None;
            }
            let entry = Attributes::from([
                ("item".to_string(), AttrValue::text(item)),
                ("rate".to_string(), AttrValue::text(cell_text(cells[1]))),
            ]);
            Some(AttrValue::Map(entry))
        })
        .collect()
}

/// First `table.wikitable` after the element carrying one of `ids`, in
/// document order.
fn table_after_anchor<'a>(document: &'a Html, ids: &[&str]) -> Option<ElementRef<'a>> {
    ids.iter().find_map(|id| {
        let mut seen = false;
        for node in document.root_element().descendants() {
            let Some(element) = ElementRef::wrap(node) else {
                continue;
            };
            if !seen {
                seen = element.value().id() == Some(*id);
                continue;
            }
            if element.value().name() == "table" && has_class(element, "wikitable") {
                return Some(element);
            }
        }
        None
    })
}

fn table_headers(table: ElementRef<'_>) -> Vec<String> {
    table
        .select(&ROW)
        .map(row_cells)
        .find(|cells| cells.iter().any(|cell| cell.value().name() == "th"))
        .map(|cells| cells.into_iter().map(cell_text).collect())
        .unwrap_or_default()
}

fn row_cells(row: ElementRef<'_>) -> Vec<ElementRef<'_>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "td" | "th"))
        .collect()
}

fn cell_name(cell: ElementRef<'_>) -> String {
    let anchors = cell.select(&ANCHOR).collect::<Vec<_>>();
    if let Some(title) = anchors.iter().find_map(|anchor| anchor_title(*anchor)) {
        return title;
    }
    if let Some(text) = anchors
        .iter()
        .map(|anchor| cell_text(*anchor))
        .find(|text| !text.is_empty())
    {
        return text;
    }
    cell_text(cell)
}

fn anchor_title(anchor: ElementRef<'_>) -> Option<String> {
    anchor
        .value()
        .attr("title")
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string)
}

fn first_href(cell: ElementRef<'_>) -> Option<String> {
    cell.select(&ANCHOR)
        .filter_map(|anchor| anchor.value().attr("href"))
        .map(str::trim)
        .find(|href| !href.is_empty() && !href.starts_with('#'))
        .map(str::to_string)
}

fn cell_image_url(base: &Url, cell: ElementRef<'_>) -> Option<String> {
    cell.select(&IMAGE).find_map(|image| image_source(base, image))
}

/// `data-src` wins over `src`; inline `data:` placeholders are ignored.
fn image_source(base: &Url, image: ElementRef<'_>) -> Option<String> {
    ["data-src", "src"]
        .iter()
        .filter_map(|attr| image.value().attr(attr))
        .find_map(|raw| normalize_image_url(base, raw))
}

/// Absolute image URL asking the wiki for the original rendition.
fn normalize_image_url(base: &Url, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let lowered = trimmed.to_ascii_lowercase();
    let placeholder = ["data:", "http:data:", "https:data:"]
        .iter()
        .any(|prefix| lowered.starts_with(prefix));
    if trimmed.is_empty() || placeholder {
        return None;
    }
    let mut url = Url::parse(trimmed).or_else(|_| base.join(trimmed)).ok()?;
    if !url
        .query_pairs()
        .any(|(key, value)| key == "format" && value == "original")
    {
        url.query_pairs_mut().append_pair("format", "original");
    }
    Some(url.into())
}

fn parse_base(base_url: &str) -> Option<Url> {
    match Url::parse(base_url.trim()) {
        Ok(base) => Some(base),
        Err(error) => {
            tracing::warn!(base_url, "invalid base URL: {error}");
            None
        }
    }
}

fn resolve_url(base: &Url, href: &str) -> Option<String> {
    base.join(href.trim()).ok().map(String::from)
}

/// `<base>/wiki/<Title_With_Underscores>` with each path segment escaped.
pub fn wiki_url(base_url: &str, title: &str) -> Result<String> {
    let base = Url::parse(base_url.trim())
        .with_context(|| format!("invalid wiki base URL: {base_url}"))?;
    Ok(page_url(&base, title))
}

fn page_url(base: &Url, title: &str) -> String {
    let mut url = base.clone();
    url.set_query(None);
    url.set_fragment(None);
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .push("wiki")
            .extend(page_path(title).split('/'));
    }
    url.into()
}

fn has_class(element: ElementRef<'_>, class: &str) -> bool {
    element.value().classes().any(|candidate| candidate == class)
}

fn split_commas(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

fn cell_text(element: ElementRef<'_>) -> String {
    cell_lines(element).join(" ")
}

/// Text of an element split at `<br>` and block boundaries, whitespace
/// collapsed, blank lines dropped.
fn cell_lines(element: ElementRef<'_>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    collect_lines(element, &mut lines, &mut current);
    flush_line(&mut lines, &mut current);
    lines
}

fn collect_lines(element: ElementRef<'_>, lines: &mut Vec<String>, current: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => current.push_str(text),
            Node::Element(_) => {
                let Some(child_element) = ElementRef::wrap(child) else {
                    continue;
                };
                match child_element.value().name() {
                    "br" => flush_line(lines, current),
                    "script" | "style" => {}
                    tag => {
                        let block = LINE_BREAK_TAGS.contains(&tag);
                        if block {
                            flush_line(lines, current);
                        }
                        collect_lines(child_element, lines, current);
                        if block {
                            flush_line(lines, current);
                        }
                    }
                }
            }
            _ => {}
        }
    }
}

fn flush_line(lines: &mut Vec<String>, current: &mut String) {
    let line = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !line.is_empty() {
        lines.push(line);
    }
    current.clear();
}
