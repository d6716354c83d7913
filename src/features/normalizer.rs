//! Free-text amount parsing for search criteria and listing prices.
//!
//! Users type budgets and mileage the way they would say them: `100万`,
//! `５万km`, `80,000km`, `5千km`. Everything here maps that text to a canonical
//! integer (yen or kilometres), or `None` when the text carries no digits.
//! All functions are pure and idempotent on their own output.

use crate::types::PRICE_SORT_SENTINEL;
use regex::Regex;
use std::sync::OnceLock;

const MAN: u64 = 10_000;
const SEN: u64 = 1_000;

static MAN_RE: OnceLock<Regex> = OnceLock::new();
static SEN_RE: OnceLock<Regex> = OnceLock::new();
static DIGITS_RE: OnceLock<Regex> = OnceLock::new();
static REMAINDER_RE: OnceLock<Regex> = OnceLock::new();

fn man_re() -> &'static Regex {
    MAN_RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*万").expect("valid 万 pattern"))
}

fn sen_re() -> &'static Regex {
    SEN_RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*千").expect("valid 千 pattern"))
}

/// Digits directly after a 万 group, optionally in 千 (`100万5000`, `1万5千`).
fn remainder_re() -> &'static Regex {
    REMAINDER_RE
        .get_or_init(|| Regex::new(r"^\s*(\d+)\s*(千)?").expect("valid remainder pattern"))
}

fn digits_re() -> &'static Regex {
    DIGITS_RE.get_or_init(|| Regex::new(r"\d+").expect("valid digit pattern"))
}

/// Fold full-width digits and punctuation to ASCII and drop thousands separators.
fn prepare(text: &str) -> String {
    text.trim()
        .chars()
        .filter_map(|c| match c {
            '０'..='９' => char::from_u32(c as u32 - '０' as u32 + '0' as u32),
            '．' => Some('.'),
            ',' | '，' | '、' => None,
            other => Some(other),
        })
        .collect()
}

/// `digits × unit`, where `digits` may carry a decimal part (`1.5` × 万 = 15000).
/// Fractions finer than one base unit are truncated.
fn scaled(digits: &str, unit: u64) -> Option<u64> {
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let whole = int_part.parse::<u64>().ok()?.checked_mul(unit)?;
    let mut frac_value = 0u64;
    let mut scale = unit;
    for d in frac_part.chars() {
        scale /= 10;
        if scale == 0 {
            break;
        }
        frac_value += d.to_digit(10)? as u64 * scale;
    }
    whole.checked_add(frac_value)
}

fn unit_amount(re: &Regex, text: &str, unit: u64) -> Option<u64> {
    let caps = re.captures(text)?;
    scaled(caps.get(1)?.as_str(), unit)
}

/// The 万 amount plus whatever units follow it: `100万5000円` → 1_005_000.
fn man_amount(text: &str) -> Option<u64> {
    let caps = man_re().captures(text)?;
    let whole = caps.get(0)?;
    let base = scaled(caps.get(1)?.as_str(), MAN)?;
    let Some(rest) = remainder_re().captures(&text[whole.end()..]) else {
        return Some(base);
    };
    let unit = if rest.get(2).is_some() { SEN } else { 1 };
    let extra = rest.get(1)?.as_str().parse::<u64>().ok()?.checked_mul(unit)?;
    base.checked_add(extra)
}

fn first_digit_run(text: &str) -> Option<u64> {
    digits_re().find(text)?.as_str().parse().ok()
}

/// Currency text → integer yen.
///
/// `100万` / `100万円` → 1_000_000; `100万5000円` → 1_005_000;
/// `980000` / `¥980,000` → 980_000; `なし` → `None`.
pub fn currency_to_yen(text: &str) -> Option<u64> {
    let text = prepare(text);
    if man_re().is_match(&text) {
        return man_amount(&text);
    }
    first_digit_run(&text)
}

/// Distance text → integer kilometres.
///
/// `5万km` → 50_000; `5千km` → 5_000; `1万5千km` → 15_000; `80000` → 80_000.
pub fn distance_to_km(text: &str) -> Option<u64> {
    let text = prepare(text);
    if man_re().is_match(&text) {
        return man_amount(&text);
    }
    unit_amount(sen_re(), &text, SEN).or_else(|| first_digit_run(&text))
}

/// Ordering key for a listing's displayed price. Unparseable prices sort last.
pub fn price_sort_key(price_text: &str) -> u64 {
    currency_to_yen(price_text).unwrap_or(PRICE_SORT_SENTINEL)
}

/// Human-readable amount for echoing criteria back to the user (`1000000` → `100万`).
pub fn display_man(value: u64) -> String {
    if value >= MAN && value % MAN == 0 {
        format!("{}万", value / MAN)
    } else if value >= MAN {
        format!("{:.1}万", value as f64 / MAN as f64)
    } else {
        value.to_string()
    }
}
