use anyhow::{Result, bail};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{Html, Selector};
use serde::Serialize;

use crate::http::{Fetcher, first_success};
use crate::infer::{Vocation, canonicalize_vocation};

static CHARACTER_TABLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("table.Table3").expect("character table selector"));
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("body selector"));
static LEVEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"Level:\s*(\d+)").expect("level pattern"));
static VOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Vocation:\s*(Master Sorcerer|Elder Druid|Elite Knight|Royal Paladin|Exalted Monk|Sorcerer|Druid|Knight|Paladin|Monk|None)",
    )
    .expect("vocation pattern")
});

const NAME_PLACEHOLDER: &str = "{name}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharacterInfo {
    pub name: String,
    pub level: i64,
    pub vocation: Option<Vocation>,
    /// Vocation as printed on the page, e.g. "Elite Knight".
    pub vocation_title: Option<String>,
    pub source: String,
}

/// Tries each mirror in order and returns the first page that yields a level.
/// `{name}` in a mirror's query string is replaced with the form-encoded name.
pub fn lookup_character<F: Fetcher + ?Sized>(
    fetcher: &mut F,
    mirrors: &[String],
    name: &str,
) -> Option<CharacterInfo> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let candidates = mirrors
        .iter()
        .filter_map(|mirror| mirror_url(mirror, name))
        .collect::<Vec<_>>();

    let found = first_success(&candidates, |url| {
        let html = fetcher.get_text(url)?;
        parse_character_page(&html, name, url)
    });
    if found.is_none() {
        tracing::warn!(name, mirrors = candidates.len(), "character lookup failed on every mirror");
    }
    found.map(|(_, info)| info)
}

fn mirror_url(template: &str, name: &str) -> Option<String> {
    let mut url = match Url::parse(template.trim()) {
        Ok(url) => url,
        Err(error) => {
            tracing::warn!(template, "skipping invalid character mirror: {error}");
            return None;
        }
    };
    let pairs = url
        .query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect::<Vec<_>>();
    if !pairs.iter().any(|(_, value)| value.contains(NAME_PLACEHOLDER)) {
        tracing::warn!(template, "character mirror has no {NAME_PLACEHOLDER} query value");
        return None;
    }
    let pairs = pairs
        .into_iter()
        .map(|(key, value)| (key, value.replace(NAME_PLACEHOLDER, name)))
        .collect::<Vec<_>>();
    url.query_pairs_mut().clear().extend_pairs(&pairs);
    Some(url.into())
}

pub fn parse_character_page(html: &str, name: &str, source: &str) -> Result<CharacterInfo> {
    let document = Html::parse_document(html);
    let text = document
        .select(&CHARACTER_TABLE)
        .next()
        .or_else(|| document.select(&BODY).next())
        .map(|element| element.text().collect::<String>())
        .unwrap_or_default();

    let Some(level) = LEVEL
        .captures(&text)
        .and_then(|capture| capture[1].parse::<i64>().ok())
    else {
        bail!("no character level found for {name}");
    };
    let vocation_title = VOCATION
        .captures(&text)
        .map(|capture| capture[1].to_string());
    let vocation = vocation_title.as_deref().and_then(canonicalize_vocation);

    Ok(CharacterInfo {
        name: name.to_string(),
        level,
        vocation,
        vocation_title,
        source: source.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::MockFetcher;

    const PAGE: &str = r#"
<html><body>
<table class="Table3"><tr><td>Name:</td><td>Bubble</td></tr>
<tr><td>Vocation:</td><td>Elite Knight</td></tr>
<tr><td>Level:</td><td>254</td></tr></table>
</body></html>"#;

    #[test]
    fn parses_level_and_promoted_vocation() {
        let info = parse_character_page(PAGE, "Bubble", "mirror").expect("parse");
        assert_eq!(info.level, 254);
        assert_eq!(info.vocation, Some(Vocation::Knights));
        assert_eq!(info.vocation_title.as_deref(), Some("Elite Knight"));
    }

    #[test]
    fn page_without_level_is_an_error() {
        let error = parse_character_page("<p>Character does not exist.</p>", "Nobody", "m")
            .expect_err("must fail");
        assert!(error.to_string().contains("no character level"));
    }

    #[test]
    fn lookup_falls_through_mirrors() {
        let mirrors = vec![
            "https://down.example/char?name={name}".to_string(),
            "https://up.example/char?name={name}".to_string(),
        ];
        let mut fetcher =
            MockFetcher::default().with_page("https://up.example/char?name=Bubble+Bob", PAGE);

        let info = lookup_character(&mut fetcher, &mirrors, "Bubble Bob").expect("found");
        assert_eq!(info.name, "Bubble Bob");
        assert_eq!(info.source, "https://up.example/char?name=Bubble+Bob");
        assert_eq!(fetcher.request_count(), 2);

        let mut empty = MockFetcher::default();
        assert!(lookup_character(&mut empty, &mirrors, "Bubble Bob").is_none());
        assert!(lookup_character(&mut empty, &mirrors, "  ").is_none());
    }

    #[test]
    fn mirror_names_are_form_encoded() {
        assert_eq!(
            mirror_url(
                "https://www.tibia.com/community/?subtopic=characters&name={name}",
                "Al & Bo's/Guild"
            )
            .as_deref(),
            Some("https://www.tibia.com/community/?subtopic=characters&name=Al+%26+Bo%27s%2FGuild")
        );
        assert_eq!(mirror_url("https://fixed.example/char/Bubble", "Bubble"), None);
        assert_eq!(mirror_url("not a mirror {name}", "Bubble"), None);
    }
}
