//! Display-text helpers
//!
//! The collection agent reports what the site shows: money as "12.5M" or
//! "850K", club cells as "Club\nManager", countdowns as "02d 06h 05m 30s".
//! These helpers turn that text into typed values at the boundary.

use crate::error::{Result, SyncError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::str::FromStr;

/// Club-name prefixes the site uses inconsistently between pages
const CLUB_PREFIXES: [&str; 4] = ["fk ", "ca ", "fc ", "cd "];

/// Manager labels used for computer-controlled clubs
const CPU_MANAGER_LABELS: [&str; 4] = ["n/a", "cpu", "-", "computer"];

/// Bare numbers above this are whole currency units rather than millions
const WHOLE_UNITS_FLOOR: Decimal = dec!(10000);

/// Largest amount a `NUMERIC(14, 2)` money column holds
const MAX_MONEY: Decimal = dec!(999999999999.99);

/// Parse a money cell into millions with two decimals.
///
/// `"12.5M"` -> 12.50, `"850K"` -> 0.85, `"1,250,000"` -> 1.25, `"78.6"` -> 78.60
pub fn parse_money(text: &str) -> Result<Decimal> {
    let cleaned: String = text
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '€' | '$' | '£'))
        .collect();

    let (number, multiplier) = if let Some(stripped) = cleaned.strip_suffix('m') {
        (stripped, Some(Decimal::ONE))
    } else if let Some(stripped) = cleaned.strip_suffix('k') {
        (stripped, Some(dec!(0.001)))
    } else {
        (cleaned.as_str(), None)
    };

    let number = normalize_separators(number);
    if number.is_empty() {
        return Err(SyncError::Validation(format!("empty money value: {text:?}")));
    }

    let value = Decimal::from_str(&number)
        .map_err(|_| SyncError::Validation(format!("invalid money value: {text:?}")))?;

    let millions = match multiplier {
        Some(m) => value.checked_mul(m),
        None if value >= WHOLE_UNITS_FLOOR => value.checked_div(dec!(1000000)),
        None => Some(value),
    }
    .map(|v| v.round_dp(2))
    .filter(|v| v.abs() <= MAX_MONEY)
    .ok_or_else(|| SyncError::Validation(format!("money value out of range: {text:?}")))?;

    Ok(millions)
}

fn normalize_separators(number: &str) -> String {
    let commas = number.matches(',').count();
    if commas == 0 {
        return number.to_string();
    }
    if number.contains('.') {
        return number.replace(',', "");
    }
    // A single comma followed by one or two digits is a decimal comma ("12,5")
    if commas == 1 {
        if let Some((_, fraction)) = number.split_once(',') {
            if (1..=2).contains(&fraction.len()) {
                return number.replace(',', ".");
            }
        }
    }
    number.replace(',', "")
}

/// Convert a countdown such as "02d 06h 05m 30s" into seconds.
///
/// Unknown characters are ignored; empty text is zero.
pub fn parse_countdown(text: &str) -> u64 {
    let mut total = 0u64;
    let mut digits = String::new();

    for c in text.trim().to_lowercase().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let unit = match c {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => {
                digits.clear();
                continue;
            }
        };
        if let Ok(n) = digits.parse::<u64>() {
            total = total.saturating_add(n.saturating_mul(unit));
        }
        digits.clear();
    }

    total
}

/// Canonical form used to compare club names across pages
pub fn normalize_club_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");

    for prefix in CLUB_PREFIXES {
        if let Some(rest) = collapsed.strip_prefix(prefix) {
            return rest.to_string();
        }
    }
    collapsed
}

/// Split a "Club\nManager" cell. The manager line is absent for CPU clubs.
pub fn split_club_manager(cell: &str) -> (String, Option<String>) {
    let mut lines = cell.lines().map(str::trim).filter(|l| !l.is_empty());
    let club = lines.next().unwrap_or_default().to_string();
    let manager = lines
        .next()
        .filter(|m| is_human_manager(m))
        .map(str::to_string);
    (club, manager)
}

/// Whether a manager label names a human player
pub fn is_human_manager(name: &str) -> bool {
    let trimmed = name.trim();
    !trimmed.is_empty()
        && !CPU_MANAGER_LABELS
            .iter()
            .any(|label| trimmed.eq_ignore_ascii_case(label))
}

/// Truncate on a char boundary
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
