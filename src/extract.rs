//! Deterministic financial-fact extraction.
//!
//! A pure function of post text, independent of the AI call, so structured
//! numeric facts survive any enrichment degradation. Handles French number
//! formatting (space and non-breaking-space thousand separators, decimal
//! commas) and magnitude suffixes (`k` ×1 000, `m` ×1 000 000).
//!
//! Extraction order matters: duration is extracted before age, and an age
//! candidate that numerically matches the extracted duration is discarded
//! as a false positive ("depuis 28 ans" is a duration, not an age).

use regex::Regex;
use std::sync::LazyLock;

use crate::models::FinancialFacts;

/// Plausibility bounds: anything outside is treated as noise.
const MIN_AMOUNT: i64 = 100;
const MAX_AMOUNT: i64 = 100_000_000;

/// French-formatted number: `2500`, `2 500`, `100 000`, `2,5`.
const NUM_FR: &str = r"(\d{1,3}(?:[\s\u{00A0}]\d{3})*(?:[.,]\d+)?)";

static AMOUNT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // 150k€, 1.5m€
        r"(\d+(?:[.,]\d+)?)\s*([km])\s*[€$]",
        // 100 000€, 500€
        r"(\d{1,3}(?:[\s\u{00A0}]\d{3})*)\s*[€$]",
        r"(\d+(?:[.,]\d+)?)\s*[€$]",
        // €100, €100k
        r"[€$]\s*(\d+(?:[.,]\d+)?)\s*([km])?",
        // 100 000 euros
        r"(\d{1,3}(?:[\s\u{00A0}]\d{3})*)\s*euros?",
        r"(\d+(?:[.,]\d+)?)\s*([km])?\s*euros?",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static PATRIMOINE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Value before the keyword: "150k€ de patrimoine". Tried first so a
        // later clause ("..., j'épargne 500€") cannot steal the slot.
        format!(r"{NUM_FR}\s*([km])?\s*(?:€|euros?)?\s*(?:de\s+)?patrimoine"),
        // Keyword first, gap bounded to the same clause.
        format!(r"patrimoine[^\d,.;!?]*{NUM_FR}\s*([km])?"),
        format!(r"atteint\s+{NUM_FR}\s*([km])?"),
        format!(r"j'?ai\s+{NUM_FR}\s*([km])?\s*[€$]"),
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static REVENUS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"{NUM_FR}\s*([km])?\s*[€$]?\s*(?:par\s+an|/an|annuel)"),
        format!(r"salaire[^\d,.;!?]*{NUM_FR}\s*([km])?"),
        format!(r"revenu[^\d,.;!?]*{NUM_FR}\s*([km])?"),
        format!(r"gagne[^\d,.;!?]*{NUM_FR}\s*([km])?"),
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static MENSUEL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"{NUM_FR}\s*([km])?\s*[€$]?\s*(?:par\s+mois|/mois|mensuel)"),
        format!(r"{NUM_FR}\s*[€$]\s*net"),
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static EPARGNE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        format!(r"épargn\w*[^\d]*{NUM_FR}\s*([km])?\s*[€$]?\s*(?:par\s+mois|/mois|mensuel)"),
        format!(r"met\w*\s+(?:de\s+côté\s+)?{NUM_FR}\s*([km])?\s*[€$]?\s*(?:par\s+mois|/mois)"),
        format!(r"investis?\w*\s+{NUM_FR}\s*([km])?\s*[€$]?\s*(?:par\s+mois|/mois)"),
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static DUREE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:depuis|en|sur|pendant)\s+(\d+)\s*ans?",
        r"(\d+)\s*ans?\s+(?:plus\s+tard|après|de\s+travail|d'investissement|d'épargne)",
        r"ça\s+fait\s+(\d+)\s*ans?",
        r"il\s+y\s+a\s+(\d+)\s*ans?",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static AGE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"j'?ai\s+(\d{2})\s*ans",
        r"âgée?\s+de\s+(\d{2})\s*ans",
        r"âge\s*:?\s*(\d{2})",
        r"(\d{2})\s*a\s*[,.]",
        r"^(\d{2})\s*ans\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Extract amounts, income, savings, age and duration from free text.
pub fn extract_financial_facts(text: &str) -> FinancialFacts {
    let mut facts = FinancialFacts::default();
    if text.is_empty() {
        return facts;
    }

    let text = text.to_lowercase();

    let mut amounts = Vec::new();
    for pattern in AMOUNT_PATTERNS.iter() {
        for caps in pattern.captures_iter(&text) {
            let num = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let mult = caps.get(2).map(|m| m.as_str());
            if let Some(amount) = parse_amount(num, mult) {
                if (MIN_AMOUNT..=MAX_AMOUNT).contains(&amount) {
                    amounts.push(amount);
                }
            }
        }
    }
    amounts.sort_unstable_by(|a, b| b.cmp(a));
    amounts.dedup();
    facts.amounts = amounts;

    facts.patrimoine = first_bounded(&PATRIMOINE_PATTERNS, &text, MIN_AMOUNT);

    if let Some(mut amount) = first_bounded(&REVENUS_PATTERNS, &text, 1) {
        // Sub-10k looks monthly; normalize to annual.
        if amount < 10_000 {
            amount *= 12;
        }
        facts.revenus_annuels = Some(amount);
    }

    facts.revenus_mensuels = first_bounded(&MENSUEL_PATTERNS, &text, MIN_AMOUNT);
    facts.epargne_mensuelle = first_bounded(&EPARGNE_PATTERNS, &text, 50);

    // Duration first; an age equal to it is a false positive.
    for pattern in DUREE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&text) {
            if let Ok(years) = caps[1].parse::<i64>() {
                if (1..=50).contains(&years) {
                    facts.duree_annees = Some(years);
                    break;
                }
            }
        }
    }

    for pattern in AGE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&text) {
            if let Ok(age) = caps[1].parse::<i64>() {
                if (18..=70).contains(&age) && facts.duree_annees != Some(age) {
                    facts.age = Some(age);
                    break;
                }
            }
        }
    }

    facts
}

/// First pattern whose captured value parses and meets the floor.
fn first_bounded(patterns: &[Regex], text: &str, floor: i64) -> Option<i64> {
    for pattern in patterns {
        if let Some(caps) = pattern.captures(text) {
            let num = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let mult = caps.get(2).map(|m| m.as_str());
            if let Some(value) = parse_amount(num, mult) {
                if value >= floor {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Parse a French-formatted number with an optional magnitude suffix.
fn parse_amount(num: &str, mult: Option<&str>) -> Option<i64> {
    let cleaned: String = num
        .chars()
        .filter(|c| *c != ' ' && *c != '\u{00A0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();
    let multiplier = match mult {
        Some("k") => 1_000.0,
        Some("m") => 1_000_000.0,
        _ => 1.0,
    };
    cleaned.parse::<f64>().ok().map(|v| (v * multiplier) as i64)
}
