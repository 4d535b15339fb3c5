//! Signal sanitization: neutralise adversarial content in ingested text before it
//! reaches any reasoning step.
//!
//! The pipeline is fixed: detect threats, decide whether a human must review,
//! redact matches and strip invisible characters, strip markup, truncate. Every
//! step that changes the text leaves a note on the signal. Nothing here fails.

use keel_core::{EventBus, GovernanceEvent, SanitizedSignal, Signal};
use regex::{NoExpand, Regex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tracing::{debug, error, warn};

use crate::threats::{RULES, ThreatCategory, has_homoglyphs, is_invisible};

pub const MAX_SUMMARY_CHARS: usize = 2000;
pub const REDACTION_MARKER: &str = "[REDACTED]";
pub const TRUNCATION_MARKER: &str = "... [truncated]";
const HANDLER_MARKER: &str = "[removed]";
const DATA_URI_MARKER: &str = "[data-uri removed]";

fn markup_pattern(source: &str) -> Option<Regex> {
    Regex::new(source)
        .map_err(|e| error!(pattern = source, error = %e, "markup pattern failed to compile"))
        .ok()
}

static TAG: LazyLock<Option<Regex>> = LazyLock::new(|| markup_pattern(r"<[^<>]*>"));
static EVENT_HANDLER: LazyLock<Option<Regex>> =
    LazyLock::new(|| markup_pattern(r"(?i)\bon[a-z]{3,}\s*="));
static DATA_URI: LazyLock<Option<Regex>> = LazyLock::new(|| {
    markup_pattern(r#"(?i)\bdata:[a-z]+/[a-z0-9.+-]+(?:;[a-z0-9=.+-]+)*,[^\s"'<>)]*"#)
});

/// What the sanitizer found in one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatReport {
    /// Description of every catalogue rule that matched, in catalogue order.
    pub threats: Vec<String>,
    pub categories: BTreeSet<ThreatCategory>,
    pub requires_review: bool,
    pub review_reason: Option<String>,
}

impl ThreatReport {
    pub fn is_clean(&self) -> bool {
        self.categories.is_empty()
    }

    fn add(&mut self, category: ThreatCategory, description: &str) {
        self.categories.insert(category);
        if !self.threats.iter().any(|t| t == description) {
            self.threats.push(description.to_string());
        }
    }

    /// High-risk categories force review; the others never do on their own.
    fn decide_review(&mut self) {
        let triggering: Vec<&str> = self
            .categories
            .iter()
            .filter(|c| c.is_high_risk())
            .map(|c| c.as_str())
            .collect();
        self.requires_review = !triggering.is_empty();
        self.review_reason = self
            .requires_review
            .then(|| format!("high-risk content detected: {}", triggering.join(", ")));
    }
}

/// Result of sanitizing a bare string.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanText {
    pub text: String,
    pub notes: Vec<String>,
    pub report: ThreatReport,
}

/// A sanitized signal together with the report the caller must act on.
#[derive(Debug, Clone)]
pub struct Sanitized {
    pub signal: SanitizedSignal,
    pub report: ThreatReport,
}

/// Aggregate counts for a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total: usize,
    pub modified: usize,
    pub threats_detected: usize,
    pub requires_review: usize,
    pub categories: BTreeSet<ThreatCategory>,
}

/// Run every catalogue rule over `text`, recording matches into `report`.
fn detect(text: &str, report: &mut ThreatReport) -> usize {
    let mut hits = 0;
    for rule in RULES.iter() {
        let count = rule.pattern.find_iter(text).count();
        if count > 0 {
            hits += count;
            report.add(rule.category, rule.description);
        }
    }
    hits
}

fn redact(text: &str) -> String {
    RULES.iter().fold(text.to_string(), |acc, rule| {
        rule.pattern
            .replace_all(&acc, NoExpand(REDACTION_MARKER))
            .into_owned()
    })
}

fn replace(pattern: &LazyLock<Option<Regex>>, text: &str, with: &str) -> String {
    match pattern.as_ref() {
        Some(re) => re.replace_all(text, NoExpand(with)).into_owned(),
        None => text.to_string(),
    }
}

fn strip_markup(text: &str) -> String {
    let text = replace(&TAG, text, "");
    let text = replace(&EVENT_HANDLER, &text, HANDLER_MARKER);
    replace(&DATA_URI, &text, DATA_URI_MARKER)
}

/// Sanitize a bare string. Total over all inputs.
pub fn sanitize_text(input: &str) -> CleanText {
    let mut report = ThreatReport::default();
    let mut notes = Vec::new();

    // Invisible characters are evidence on their own and are removed before
    // matching so they cannot split a phrase.
    let invisible = input.chars().filter(|c| is_invisible(*c)).count();
    let mut text: String = if invisible > 0 {
        report.add(
            ThreatCategory::UnicodeObfuscation,
            "zero-width or bidi-override characters",
        );
        notes.push(format!("removed {invisible} invisible unicode character(s)"));
        input.chars().filter(|c| !is_invisible(*c)).collect()
    } else {
        input.to_string()
    };

    if has_homoglyphs(&text) {
        report.add(ThreatCategory::Homoglyph, "mixed-script look-alike characters");
    }

    let hits = detect(&text, &mut report);
    if hits > 0 {
        text = redact(&text);
        notes.push(format!("redacted {hits} suspicious pattern match(es)"));
    }

    let stripped = strip_markup(&text);
    if stripped != text {
        notes.push("stripped markup".to_string());
        text = stripped;
        let revealed = detect(&text, &mut report);
        if revealed > 0 {
            text = redact(&text);
            notes.push(format!(
                "redacted {revealed} pattern match(es) revealed by markup removal"
            ));
        }
    }

    if text.contains(['<', '>']) {
        text = text.replace('<', "&lt;").replace('>', "&gt;");
        notes.push("escaped angle brackets".to_string());
    }

    let length = text.chars().count();
    if length > MAX_SUMMARY_CHARS {
        text = text.chars().take(MAX_SUMMARY_CHARS).collect::<String>() + TRUNCATION_MARKER;
        notes.push(format!(
            "truncated from {length} to {MAX_SUMMARY_CHARS} characters"
        ));
    }

    report.decide_review();
    CleanText {
        text,
        notes,
        report,
    }
}

/// Sanitizes signals and reports threats on the event bus.
#[derive(Clone, Default)]
pub struct Sanitizer {
    events: EventBus,
}

impl Sanitizer {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }

    pub fn sanitize(&self, signal: &Signal) -> Sanitized {
        let clean = sanitize_text(&signal.summary);
        if clean.report.is_clean() {
            debug!(signal_id = %signal.id, notes = clean.notes.len(), "signal sanitized");
        } else {
            let categories: Vec<String> = clean
                .report
                .categories
                .iter()
                .map(|c| c.to_string())
                .collect();
            warn!(
                signal_id = %signal.id,
                source = %signal.source,
                categories = ?categories,
                requires_review = clean.report.requires_review,
                "threat content detected in signal"
            );
            self.events.publish(GovernanceEvent::ThreatDetected {
                signal_id: signal.id.clone(),
                categories,
                requires_review: clean.report.requires_review,
            });
        }
        Sanitized {
            signal: SanitizedSignal::from_signal(signal, clean.text, clean.notes),
            report: clean.report,
        }
    }

    pub fn sanitize_batch(&self, signals: &[Signal]) -> (Vec<Sanitized>, BatchReport) {
        let mut batch = BatchReport {
            total: signals.len(),
            ..Default::default()
        };
        let results: Vec<Sanitized> = signals.iter().map(|s| self.sanitize(s)).collect();
        for result in &results {
            if result.signal.was_modified() {
                batch.modified += 1;
            }
            if !result.report.is_clean() {
                batch.threats_detected += 1;
                batch.categories.extend(result.report.categories.iter().copied());
            }
            if result.report.requires_review {
                batch.requires_review += 1;
            }
        }
        (results, batch)
    }
}
