//! Result-table extraction.
//!
//! Row fields are looked up with the row-scoped candidate sets first. Whatever
//! is still missing is guessed from the shape of the row's cell texts
//! ([`classify_cell`]). Guessing stays in this module:
//! it never fails, it only leaves fields empty.

use crate::features::normalizer::price_sort_key;
use crate::scraping::resolver::{resolve_all_in_fragment, resolve_in_fragment};
use crate::scraping::selectors::{SelectorCandidateSet, SiteSelectors};
use crate::types::ListingRecord;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Year,
    Mileage,
    Price,
    District,
    Other,
}

static YEAR_RE: OnceLock<Regex> = OnceLock::new();
static DISTRICT_RE: OnceLock<Regex> = OnceLock::new();

fn year_re() -> &'static Regex {
    YEAR_RE.get_or_init(|| {
        Regex::new(r"^(?:(?:19|20)\d{2}(?:年|/|\.|-|$)|(?:H|R|S|平成|令和|昭和)\s?\d{1,2}(?:年|/|\.|$))")
            .expect("valid year pattern")
    })
}

fn district_re() -> &'static Regex {
    DISTRICT_RE.get_or_init(|| {
        Regex::new(r"^\S{1,4}(?:都|道|府|県)(?:\s|$|\S{1,6}(?:市|区|町|村)$)").expect("valid district pattern")
    })
}

/// Guess what a bare cell holds from its text alone.
pub fn classify_cell(text: &str) -> CellKind {
    let t = text.trim();
    if t.is_empty() {
        return CellKind::Other;
    }
    let lower = t.to_lowercase();
    if lower.contains("km") || t.contains("ｋｍ") || t.contains("キロ") {
        CellKind::Mileage
    } else if t.contains('円') || t.contains('¥') || t.contains('￥') {
        CellKind::Price
    } else if year_re().is_match(t) {
        CellKind::Year
    } else if district_re().is_match(t) {
        CellKind::District
    } else {
        CellKind::Other
    }
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn field_text(row: ElementRef<'_>, set: &SelectorCandidateSet) -> Option<String> {
    resolve_in_fragment(row, set)
        .map(text_of)
        .filter(|s| !s.is_empty())
}

fn cells<'a>(row: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    let Ok(td) = Selector::parse("td, dd, .cell") else {
        return Vec::new();
    };
    let found: Vec<_> = row.select(&td).collect();
    if !found.is_empty() {
        return found;
    }
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|c| c.value().name() != "th")
        .collect()
}

fn absolutize(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("javascript:") || raw.starts_with("data:") {
        return None;
    }
    match base {
        Some(b) => b.join(raw).ok().map(|u| u.to_string()),
        None => Url::parse(raw).ok().map(|u| u.to_string()),
    }
}

fn attr_url(
    row: ElementRef<'_>,
    set: &SelectorCandidateSet,
    attrs: &[&str],
    base: Option<&Url>,
) -> Option<String> {
    let el = resolve_in_fragment(row, set)?;
    attrs
        .iter()
        .find_map(|a| el.value().attr(a))
        .and_then(|v| absolutize(base, v))
}

/// Map one result row to a record. `None` when no title can be found
/// (header rows, spacer rows, ad slots).
fn extract_row(row: ElementRef<'_>, s: &SiteSelectors, base: Option<&Url>) -> Option<ListingRecord> {
    let mut title = field_text(row, &s.row_title);
    let mut grade = field_text(row, &s.row_grade);
    let mut district = field_text(row, &s.row_district);
    let mut year = field_text(row, &s.row_year);
    let mut mileage = field_text(row, &s.row_mileage);
    let mut price = field_text(row, &s.row_price);

    let mut others = Vec::new();
    for cell in cells(row) {
        let text = text_of(cell);
        if text.is_empty() {
            continue;
        }
        let slot = match classify_cell(&text) {
            CellKind::Year => &mut year,
            CellKind::Mileage => &mut mileage,
            CellKind::Price => &mut price,
            CellKind::District => &mut district,
            CellKind::Other => {
                others.push(text);
                continue;
            }
        };
        if slot.is_none() {
            *slot = Some(text);
        }
    }

    let claimed: Vec<String> = title.iter().chain(grade.iter()).cloned().collect();
    let mut others = others.into_iter().filter(|t| !claimed.contains(t));
    if title.is_none() {
        title = others.next();
    }
    if grade.is_none() {
        grade = others.next();
    }

    let title = title?;
    let price_text = price.unwrap_or_default();
    Some(ListingRecord {
        title,
        grade,
        district,
        year,
        mileage_text: mileage.unwrap_or_default(),
        price_sort_key: price_sort_key(&price_text),
        price_text,
        image_url: attr_url(row, &s.row_image, &["src", "data-src", "data-original"], base),
        detail_url: attr_url(row, &s.row_detail_link, &["href"], base),
    })
}

/// Read up to `max_rows` listings out of the results container's HTML.
/// Header and spacer rows do not count against the cap.
pub fn extract_listings(
    container_html: &str,
    selectors: &SiteSelectors,
    base_url: &str,
    max_rows: usize,
) -> Vec<ListingRecord> {
    let doc = Html::parse_fragment(container_html);
    let base = Url::parse(base_url).ok();
    let rows = resolve_all_in_fragment(doc.root_element(), &selectors.row);
    let total = rows.len();

    let records: Vec<ListingRecord> = rows
        .into_iter()
        .filter_map(|row| extract_row(row, selectors, base.as_ref()))
        .take(max_rows)
        .collect();

    debug!(
        "extract: {} row(s) in container, {} record(s) extracted (cap {})",
        total,
        records.len(),
        max_rows
    );
    records
}

/// Cheapest first (stable, unparseable prices last), then the top `top_n`.
pub fn rank_listings(mut records: Vec<ListingRecord>, top_n: usize) -> Vec<ListingRecord> {
    records.sort_by_key(|r| r.price_sort_key);
    records.truncate(top_n);
    records
}
