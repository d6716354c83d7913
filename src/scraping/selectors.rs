//! Declarative locator tables for the auction site.
//!
//! Each logical field maps to an ordered [`SelectorCandidateSet`], most specific
//! pattern first. The resolver consults these; nothing here knows how to search.
//! When the site's markup drifts, this is the only file that needs to change.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single way of locating an element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Locator {
    /// CSS selector.
    Css { value: String },
    /// XPath expression (document-level lookups only).
    Xpath { value: String },
    /// Innermost element matching `tag` (a CSS selector list) whose visible
    /// text or value contains `value`.
    Text { tag: String, value: String },
}

impl Locator {
    pub fn css(value: impl Into<String>) -> Self {
        Locator::Css {
            value: value.into(),
        }
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Locator::Xpath {
            value: value.into(),
        }
    }

    pub fn text(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Locator::Text {
            tag: tag.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css { value } => write!(f, "css:{}", value),
            Locator::Xpath { value } => write!(f, "xpath:{}", value),
            Locator::Text { tag, value } => write!(f, "text:{}~{}", tag, value),
        }
    }
}

/// Ordered locator patterns for one logical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorCandidateSet {
    pub field: String,
    pub candidates: Vec<Locator>,
}

impl SelectorCandidateSet {
    pub fn new(field: impl Into<String>, candidates: Vec<Locator>) -> Self {
        Self {
            field: field.into(),
            candidates,
        }
    }

    /// Candidates usable against a static HTML fragment (CSS only).
    pub fn css_candidates(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().filter_map(|c| match c {
            Locator::Css { value } => Some(value.as_str()),
            _ => None,
        })
    }
}

const CLICKABLE: &str = "button, input[type=button], input[type=submit], a, label, span";

/// Full locator table consulted by the driver.
#[derive(Debug, Clone)]
pub struct SiteSelectors {
    pub logged_in_marker: SelectorCandidateSet,
    pub login_username: SelectorCandidateSet,
    pub login_password: SelectorCandidateSet,
    pub login_submit: SelectorCandidateSet,
    pub proceed_to_search: SelectorCandidateSet,
    pub keyword_input: SelectorCandidateSet,
    pub budget_input: SelectorCandidateSet,
    pub mileage_input: SelectorCandidateSet,
    pub search_submit: SelectorCandidateSet,
    pub filter_apply: SelectorCandidateSet,
    pub results_container: SelectorCandidateSet,
    pub no_results_marker: SelectorCandidateSet,
    pub row: SelectorCandidateSet,
    pub row_title: SelectorCandidateSet,
    pub row_grade: SelectorCandidateSet,
    pub row_district: SelectorCandidateSet,
    pub row_year: SelectorCandidateSet,
    pub row_mileage: SelectorCandidateSet,
    pub row_price: SelectorCandidateSet,
    pub row_image: SelectorCandidateSet,
    pub row_detail_link: SelectorCandidateSet,
    /// Page-text markers that mean the account was logged in elsewhere.
    pub collision_markers: Vec<String>,
}

impl SiteSelectors {
    /// "Select all" affordance for one inventory category.
    pub fn category_select_all(&self, category: &str) -> SelectorCandidateSet {
        SelectorCandidateSet::new(
            format!("category select-all ({})", category),
            vec![
                Locator::xpath(format!(
                    "//*[contains(normalize-space(.), '{}')]/ancestor-or-self::*[self::tr or self::fieldset or self::div][1]//*[self::button or self::a or self::input][contains(@value, '全選択') or contains(normalize-space(.), '全選択')]",
                    category
                )),
                Locator::css(format!("[data-category='{}'] .select-all", category)),
                Locator::text("label, span, a", category),
            ],
        )
    }

    /// Transaction-status checkbox (e.g. "available now").
    pub fn status_checkbox(&self, status: &str) -> SelectorCandidateSet {
        SelectorCandidateSet::new(
            format!("status filter ({})", status),
            vec![
                Locator::css(format!("input[type=checkbox][value='{}']", status)),
                Locator::xpath(format!(
                    "//label[contains(normalize-space(.), '{}')]//input[@type='checkbox']",
                    status
                )),
                Locator::text("label", status),
            ],
        )
    }
}

impl Default for SiteSelectors {
    fn default() -> Self {
        let set = SelectorCandidateSet::new;
        Self {
            logged_in_marker: set(
                "logged-in marker",
                vec![
                    Locator::css("a[href*='logout']"),
                    Locator::css("#logout, .logout, .btn-logout"),
                    Locator::text(CLICKABLE, "ログアウト"),
                ],
            ),
            login_username: set(
                "login username field",
                vec![
                    Locator::css("input#loginId"),
                    Locator::css("input[name='loginId'], input[name='userId'], input[name='user_id']"),
                    Locator::css("input[autocomplete='username']"),
                    Locator::css("form input[type='text']"),
                ],
            ),
            login_password: set(
                "login password field",
                vec![
                    Locator::css("input#password"),
                    Locator::css("input[name='password'], input[name='passwd']"),
                    Locator::css("input[type='password']"),
                ],
            ),
            login_submit: set(
                "login submit button",
                vec![
                    Locator::css("#loginBtn, button#login"),
                    Locator::css("form button[type='submit'], form input[type='submit']"),
                    Locator::text(CLICKABLE, "ログイン"),
                ],
            ),
            proceed_to_search: set(
                "proceed to search button",
                vec![
                    Locator::css("#btnNext, .btn-next"),
                    Locator::text(CLICKABLE, "次へ"),
                    Locator::text(CLICKABLE, "検索画面へ"),
                ],
            ),
            keyword_input: set(
                "freeword search input",
                vec![
                    Locator::css("input#freeword, input[name='freeword']"),
                    Locator::css("input[name='keyword'], input[name='kw']"),
                    Locator::css("input[type='search']"),
                    Locator::css("input[placeholder*='フリーワード'], input[placeholder*='キーワード']"),
                ],
            ),
            budget_input: set(
                "budget upper bound",
                vec![
                    Locator::css("select[name='priceTo'], select[name='price_to']"),
                    Locator::css("input[name='priceTo'], input[name='price_max']"),
                ],
            ),
            mileage_input: set(
                "mileage upper bound",
                vec![
                    Locator::css("select[name='mileageTo'], select[name='mileage_to']"),
                    Locator::css("input[name='mileageTo'], input[name='mileage_max']"),
                ],
            ),
            search_submit: set(
                "search submit button",
                vec![
                    Locator::css("#searchBtn, button#search"),
                    Locator::css("button[type='submit'], input[type='submit']"),
                    Locator::text(CLICKABLE, "検索"),
                ],
            ),
            filter_apply: set(
                "filter apply button",
                vec![
                    Locator::css("#filterBtn, .btn-filter"),
                    Locator::text(CLICKABLE, "絞り込み"),
                    Locator::text(CLICKABLE, "再検索"),
                ],
            ),
            results_container: set(
                "results container",
                vec![
                    Locator::css("table#resultList, table.result-list"),
                    Locator::css("#searchResult table, .search-result table"),
                    Locator::css("ul.result-list, .result-items"),
                ],
            ),
            no_results_marker: set(
                "no results marker",
                vec![
                    Locator::css(".no-result, #noResult"),
                    Locator::text("p, div, span, td", "該当する車両はありません"),
                    Locator::text("p, div, span, td", "検索結果は0件"),
                ],
            ),
            row: set(
                "result row",
                vec![
                    Locator::css("tbody tr.item"),
                    Locator::css("tr[data-id]"),
                    Locator::css("li.result-item"),
                    Locator::css("tbody tr"),
                ],
            ),
            row_title: set(
                "row title",
                vec![
                    Locator::css(".car-name"),
                    Locator::css(".title, td.name"),
                    Locator::css("a[href*='detail']"),
                ],
            ),
            row_grade: set("row grade", vec![Locator::css(".grade, td.grade")]),
            row_district: set(
                "row district",
                vec![Locator::css(".area, .district, td.area")],
            ),
            row_year: set("row year", vec![Locator::css(".year, td.year")]),
            row_mileage: set(
                "row mileage",
                vec![Locator::css(".mileage, .distance, td.mileage")],
            ),
            row_price: set(
                "row price",
                vec![Locator::css(".price, .start-price, td.price")],
            ),
            row_image: set("row image", vec![Locator::css("img.thumb"), Locator::css("img")]),
            row_detail_link: set(
                "row detail link",
                vec![Locator::css("a[href*='detail']"), Locator::css("a[href]")],
            ),
            collision_markers: vec![
                "他の端末でログイン".to_string(),
                "別の端末からログイン".to_string(),
                "二重ログイン".to_string(),
                "既にログインしています".to_string(),
                "同一IDでログイン".to_string(),
            ],
        }
    }
}
