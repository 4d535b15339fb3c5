//! The threat catalogue: an ordered table of case-insensitive patterns, each
//! tagged with the category it evidences.
//!
//! Patterns are compiled by the `regex` crate, which matches in time linear in
//! the input, so no crafted summary can make sanitization backtrack.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    InstructionOverride,
    SystemMessageSpoofing,
    RoleManipulation,
    SocialEngineering,
    PromptExtraction,
    ActionInjection,
    DelimiterEscape,
    PrioritySpoofing,
    /// Zero-width and bidi-override characters.
    UnicodeObfuscation,
    /// Latin letters mixed with look-alike Cyrillic, Greek or fullwidth forms.
    Homoglyph,
}

impl ThreatCategory {
    /// Categories that always put a human in the loop.
    pub fn is_high_risk(&self) -> bool {
        matches!(
            self,
            Self::ActionInjection | Self::PromptExtraction | Self::DelimiterEscape
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstructionOverride => "instruction_override",
            Self::SystemMessageSpoofing => "system_message_spoofing",
            Self::RoleManipulation => "role_manipulation",
            Self::SocialEngineering => "social_engineering",
            Self::PromptExtraction => "prompt_extraction",
            Self::ActionInjection => "action_injection",
            Self::DelimiterEscape => "delimiter_escape",
            Self::PrioritySpoofing => "priority_spoofing",
            Self::UnicodeObfuscation => "unicode_obfuscation",
            Self::Homoglyph => "homoglyph",
        }
    }
}

impl fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A compiled catalogue entry.
#[derive(Debug)]
pub struct ThreatRule {
    pub category: ThreatCategory,
    pub description: &'static str,
    pub pattern: Regex,
}

use ThreatCategory::*;

const RULE_SOURCES: &[(ThreatCategory, &str, &str)] = &[
    // ── Instruction override ───────────────────────────────────
    (
        InstructionOverride,
        "ignore previous instructions",
        r"\bignore\s+(?:all\s+)?(?:the\s+|your\s+)?(?:previous|prior|above|earlier|preceding)\s+(?:instructions?|prompts?|rules?|directions?)",
    ),
    (
        InstructionOverride,
        "disregard prior instructions",
        r"\bdisregard\s+(?:all\s+)?(?:the\s+|your\s+)?(?:previous|prior|above|earlier|preceding)\s+(?:instructions?|prompts?|rules?|directions?|context)",
    ),
    (
        InstructionOverride,
        "forget prior context",
        r"\bforget\s+(?:everything|all)\s+(?:you\s+(?:were|have\s+been)\s+told|above|before|previously)",
    ),
    (
        InstructionOverride,
        "override instructions",
        r"\boverride\s+(?:your|all|the)\s+(?:instructions?|rules?|guidelines|programming)",
    ),
    (
        InstructionOverride,
        "new instructions header",
        r"\bnew\s+instructions?\s*:",
    ),
    (
        InstructionOverride,
        "do not follow instructions",
        r"\bdo\s+not\s+follow\s+(?:your|the|any)\s+(?:previous\s+|original\s+)?(?:instructions?|rules?|guidelines)",
    ),
    // ── System message spoofing ────────────────────────────────
    (
        SystemMessageSpoofing,
        "line starts with a role label",
        r"^\s*(?:system|assistant)\s*:",
    ),
    (
        SystemMessageSpoofing,
        "bracketed system label",
        r"\[\s*(?:system|admin|developer)\s*(?:message|note|prompt)?\s*\]",
    ),
    (
        SystemMessageSpoofing,
        "system tag",
        r"<\s*/?\s*system\s*>",
    ),
    (
        SystemMessageSpoofing,
        "markdown system header",
        r"^\s*#{2,}\s*(?:system|instructions?)\b",
    ),
    (
        SystemMessageSpoofing,
        "message from the system",
        r"\bmessage\s+from\s+(?:the\s+)?(?:system|administrator|admin|developers?)\s*:",
    ),
    // ── Role manipulation ──────────────────────────────────────
    (
        RoleManipulation,
        "you are now",
        r"\byou\s+are\s+now\s+(?:a|an|the|in)\b",
    ),
    (
        RoleManipulation,
        "act as a privileged role",
        r"\bact\s+as\s+(?:if\s+you\s+(?:are|were)\s+)?(?:(?:a|an|the)\s+)?(?:admin|administrator|root|developer|unrestricted|jailbroken)",
    ),
    (
        RoleManipulation,
        "pretend to be",
        r"\bpretend\s+(?:to\s+be|you\s+are)\b",
    ),
    (
        RoleManipulation,
        "special mode request",
        r"\b(?:developer|dan|god|sudo|jailbreak)\s+mode",
    ),
    (
        RoleManipulation,
        "from now on you",
        r"\bfrom\s+now\s+on\s*,?\s+you\s+(?:will|must|are|should)\b",
    ),
    // ── Social engineering ─────────────────────────────────────
    (
        SocialEngineering,
        "claimed executive authorisation",
        r"\b(?:ceo|cfo|cto|director|boss)\s+(?:has\s+)?(?:personally\s+)?authori[sz]ed\s+you\b",
    ),
    (
        SocialEngineering,
        "claimed official request",
        r"\bthis\s+is\s+(?:an?\s+)?(?:authori[sz]ed|official|approved)\s+(?:request|instruction|override)",
    ),
    (
        SocialEngineering,
        "secrecy request",
        r"\bdo\s+not\s+(?:tell|inform|alert|notify)\s+(?:anyone|the\s+(?:user|team|owner|pm))\b",
    ),
    (
        SocialEngineering,
        "keep this secret",
        r"\bkeep\s+this\s+(?:secret|confidential|between\s+us)",
    ),
    // ── Prompt extraction ──────────────────────────────────────
    (
        PromptExtraction,
        "reveal the prompt",
        r"\b(?:reveal|show|print|output|repeat|display|tell)\s+(?:me\s+)?(?:your|the)\s+(?:system\s+|initial\s+|original\s+)?(?:prompt|instructions|rules|guidelines)",
    ),
    (
        PromptExtraction,
        "ask for original instructions",
        r"\bwhat\s+(?:are|were)\s+your\s+(?:original\s+|initial\s+|system\s+)?instructions",
    ),
    (
        PromptExtraction,
        "system prompt reference",
        r"\b(?:system|initial|hidden)\s+prompts?",
    ),
    (
        PromptExtraction,
        "repeat everything above",
        r"\brepeat\s+(?:everything|all\s+(?:the\s+)?text)\s+above",
    ),
    // ── Action injection ───────────────────────────────────────
    (
        ActionInjection,
        "send to an address",
        r"\b(?:send|forward|email|e-mail|mail)\b[^\n]{0,40}?\bto\s+[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}",
    ),
    (
        ActionInjection,
        "bulk deletion",
        r"\b(?:delete|drop|remove|purge|wipe)\s+(?:all|every|the\s+entire)\s+(?:tickets?|issues?|records?|data|files?|projects?|artefacts?|artifacts?)",
    ),
    (
        ActionInjection,
        "money transfer",
        r"\b(?:transfer|wire)\s+(?:\$|usd\s*|eur\s*|€|£)?\d[\d,]*(?:\.\d+)?\s*(?:usd|eur|dollars|euros)?\s+to\b",
    ),
    (
        ActionInjection,
        "credential or integration change",
        r"\b(?:change|update|set|reset)\s+(?:the\s+)?(?:api\s+key|password|credentials?|webhook(?:\s+url)?|integration\s+(?:config|settings))",
    ),
    (
        ActionInjection,
        "execute the following",
        r"\b(?:execute|run|call)\s+(?:the\s+following|this)\s+(?:command|action|tool|function)",
    ),
    (
        ActionInjection,
        "share with an address",
        r"\bshare\s+(?:this|the|all)\b[^\n]{0,30}?\bwith\s+[a-z0-9._%+-]+@",
    ),
    // ── Delimiter escape ───────────────────────────────────────
    (
        DelimiterEscape,
        "chat template token",
        r"<\|\s*(?:im_start|im_end|endoftext|eot_id|start_header_id|end_header_id)\s*\|>",
    ),
    (
        DelimiterEscape,
        "instruction block marker",
        r"\[/?INST\]",
    ),
    (
        DelimiterEscape,
        "fenced system block",
        r"`{3}\s*(?:system|instructions?)\b",
    ),
    (
        DelimiterEscape,
        "fake context boundary",
        r"-{3,}\s*(?:end\s+of\s+(?:context|input|document|data)|begin\s+(?:system|instructions?))",
    ),
    (
        DelimiterEscape,
        "end of input marker",
        r"\bend\s+of\s+(?:user\s+)?(?:input|prompt)\s*(?:-{2,}|={2,}|#{2,})",
    ),
    // ── Priority spoofing ──────────────────────────────────────
    (
        PrioritySpoofing,
        "urgent override",
        r"\b(?:urgent|critical|emergency)\s*[:!]+\s*(?:override|bypass|skip|ignore)",
    ),
    (
        PrioritySpoofing,
        "priority directive",
        r"\b(?:highest|top|maximum|max)\s+priority\s+(?:instruction|override|command|directive)s?",
    ),
    (
        PrioritySpoofing,
        "bypass review",
        r"\b(?:bypass|skip|disable)\s+(?:the\s+)?(?:approval|review|hold|safety|confirmation)(?:\s+(?:process|step|queue|checks?))?",
    ),
    (
        PrioritySpoofing,
        "act without approval",
        r"\bimmediately\s+without\s+(?:approval|review|confirmation|checking)",
    ),
];

/// The compiled catalogue, in declaration order.
pub static RULES: LazyLock<Vec<ThreatRule>> = LazyLock::new(|| {
    RULE_SOURCES
        .iter()
        .filter_map(|&(category, description, source)| {
            match RegexBuilder::new(source)
                .case_insensitive(true)
                .multi_line(true)
                .build()
            {
                Ok(pattern) => Some(ThreatRule {
                    category,
                    description,
                    pattern,
                }),
                Err(e) => {
                    error!(%category, description, error = %e, "threat pattern failed to compile");
                    None
                }
            }
        })
        .collect()
});

/// Number of patterns declared in the catalogue.
pub fn declared_rule_count() -> usize {
    RULE_SOURCES.len()
}

static HOMOGLYPH: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"[A-Za-z][\p{Cyrillic}\p{Greek}]|[\p{Cyrillic}\p{Greek}][A-Za-z]|[\x{FF21}-\x{FF3A}\x{FF41}-\x{FF5A}]",
    )
    .map_err(|e| error!(error = %e, "homoglyph pattern failed to compile"))
    .ok()
});

/// Zero-width, bidi-override and other invisible formatting characters.
pub fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2064}'
            | '\u{2066}'..='\u{2069}'
            | '\u{FEFF}'
    )
}

/// True when Latin letters sit directly beside look-alike letters from another
/// script, or fullwidth Latin letters appear.
pub fn has_homoglyphs(text: &str) -> bool {
    HOMOGLYPH.as_ref().is_some_and(|re| re.is_match(text))
}
