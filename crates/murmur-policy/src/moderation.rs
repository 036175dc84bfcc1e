use std::collections::{BTreeSet, HashMap};
use std::fmt;

use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Profanity,
    HateSpeech,
    Harassment,
    Violence,
    Spam,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Profanity => "profanity",
            Reason::HateSpeech => "hate_speech",
            Reason::Harassment => "harassment",
            Reason::Violence => "violence",
            Reason::Spam => "spam",
        }
    }

    fn user_facing(self) -> &'static str {
        match self {
            Reason::Profanity => "profanity",
            Reason::HateSpeech => "hate speech",
            Reason::Harassment => "harassment",
            Reason::Violence => "threats of violence",
            Reason::Spam => "spam",
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// One rule that fired. `rule` names the term or heuristic, never the user's text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyHit {
    pub reason: Reason,
    pub rule: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModerationVerdict {
    pub reasons: BTreeSet<Reason>,
    pub hits: Vec<PolicyHit>,
    pub severity: Severity,
}

impl ModerationVerdict {
    pub fn clean() -> Self {
        Self {
            reasons: BTreeSet::new(),
            hits: Vec::new(),
            severity: Severity::Low,
        }
    }

    pub fn from_hits(hits: Vec<PolicyHit>) -> Self {
        let reasons = hits.iter().map(|h| h.reason).collect();
        let severity = severity_for(&hits);
        Self {
            reasons,
            hits,
            severity,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn blocks(&self) -> bool {
        self.severity == Severity::High
    }

    pub fn requires_confirmation(&self) -> bool {
        self.severity == Severity::Medium
    }
}

/// Severity is a pure function of the hits:
/// hate speech or violence anywhere is high; a single harassment or profanity hit on its
/// own is low; two or more categories, or harassment next to any other hit, is medium;
/// everything else (spam alone, repeated profanity alone, nothing) is low.
pub fn severity_for(hits: &[PolicyHit]) -> Severity {
    if hits
        .iter()
        .any(|h| matches!(h.reason, Reason::HateSpeech | Reason::Violence))
    {
        return Severity::High;
    }
    if hits.len() == 1 && matches!(hits[0].reason, Reason::Harassment | Reason::Profanity) {
        return Severity::Low;
    }
    let categories: BTreeSet<Reason> = hits.iter().map(|h| h.reason).collect();
    if categories.len() >= 2 {
        return Severity::Medium;
    }
    if hits.len() >= 2 && categories.contains(&Reason::Harassment) {
        return Severity::Medium;
    }
    Severity::Low
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateDecision {
    Allowed { verdict: ModerationVerdict },
    NeedsConfirmation { verdict: ModerationVerdict },
    Blocked { reason: String, verdict: ModerationVerdict },
}

impl GateDecision {
    pub fn verdict(&self) -> &ModerationVerdict {
        match self {
            GateDecision::Allowed { verdict }
            | GateDecision::NeedsConfirmation { verdict }
            | GateDecision::Blocked { verdict, .. } => verdict,
        }
    }
}

const PROFANITY_WORDS: &[&str] = &[
    "fuck",
    "fucking",
    "fucked",
    "fucker",
    "motherfucker",
    "shit",
    "shitty",
    "bullshit",
    "bitch",
    "bastard",
    "asshole",
    "damn",
    "damned",
    "dammit",
    "hell",
    "crap",
    "dick",
    "piss",
    "pissed",
    "cunt",
];

const HARASSMENT_WORDS: &[&str] = &[
    "idiot", "moron", "loser", "stupid", "dumbass", "pathetic", "worthless", "imbecile", "cretin",
];

const HARASSMENT_PHRASES: &[&str] = &[
    r"\bshut up\b",
    r"\bnobody (likes|cares about|wants) you\b",
    r"\byou('re| are) (so )?(ugly|fat|disgusting|useless)\b",
    r"\bget lost\b",
];

const HATE_PHRASES: &[&str] = &[
    r"\b(subhuman|untermensch)s?\b",
    r"\b(master|inferior) race\b",
    r"\bethnic cleansing\b",
    r"\bwhite power\b",
    r"\bgo back to (your( own)? country|where you came from)\b",
    r"\b(all|those|these) (\w+ )?(immigrants|refugees|jews|muslims|christians|gays|blacks|whites|women|men) (are|should be) (vermin|animals|rats|parasites|subhuman|exterminated|eradicated)\b",
    r"\bgas the \w+",
];

const VIOLENCE_PHRASES: &[&str] = &[
    r"\b(i|we)('ll| will|'m going to| am going to| are going to|'re going to| gonna) (kill|murder|shoot|stab|hurt|beat|strangle) (you|u|him|her|them|your family)\b",
    r"\b(kill|shoot|stab|murder) (yourself|urself)\b",
    r"\byou('re| are) (dead|going to die)\b",
    r"\b(bomb|shoot up|burn down) (the|your) (school|house|office|building|church|mosque|synagogue)\b",
    r"\bi know where you live\b",
];

const SPAM_PHRASES: &[&str] = &[
    r"\bclick here\b",
    r"\bbuy now\b",
    r"\blimited time (offer|only)\b",
    r"\bact now\b",
    r"\bfree money\b",
    r"\bearn \$?\d+ (per|a|an) (hour|day|week)\b",
    r"\bdm me for\b",
    r"\bcrypto giveaway\b",
    r"\b100% free\b",
    r"\bwork from home\b",
];

/// Removed from the text before any rule runs. Covers religious vocabulary that
/// overlaps the profanity list, proper nouns, and idioms that read like threats.
const ALLOW_PHRASES: &[&str] = &[
    "heaven and hell",
    "heaven or hell",
    "hell and heaven",
    "gates of hell",
    "descended into hell",
    "harrowing of hell",
    "fires of hell",
    "road to hell",
    "saved from hell",
    "eternal damnation",
    "the damned",
    "damned souls",
    "hell's kitchen",
    "hell, michigan",
    "hell michigan",
    "moby dick",
    "dick van dyke",
    "scunthorpe",
    "killing it",
    "killed it",
    "dressed to kill",
    "break a leg",
    "kill two birds",
    "shoot for the moon",
    "shut up and take my money",
];

const MAX_LINKS: usize = 2;
const REPEATED_CHAR_RUN: usize = 6;
const REPEATED_WORD_RUN: usize = 4;
const CAPS_MIN_LETTERS: usize = 12;
const CAPS_RATIO: f32 = 0.7;

/// Rule data for [`ModerationGate`]. Built-in lists can be extended at runtime.
#[derive(Clone, Debug)]
pub struct ModerationRules {
    words: HashMap<String, Reason>,
    phrases: Vec<(Reason, Regex)>,
    allow: Vec<Regex>,
}

impl ModerationRules {
    pub fn empty() -> Self {
        Self {
            words: HashMap::new(),
            phrases: Vec::new(),
            allow: Vec::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut rules = Self::empty();
        for w in PROFANITY_WORDS {
            rules.words.insert((*w).to_string(), Reason::Profanity);
        }
        for w in HARASSMENT_WORDS {
            rules.words.insert((*w).to_string(), Reason::Harassment);
        }
        let groups = [
            (Reason::Harassment, HARASSMENT_PHRASES),
            (Reason::HateSpeech, HATE_PHRASES),
            (Reason::Violence, VIOLENCE_PHRASES),
            (Reason::Spam, SPAM_PHRASES),
        ];
        for (reason, patterns) in groups {
            for p in patterns {
                let re = Regex::new(p).expect("valid builtin moderation pattern");
                rules.phrases.push((reason, re));
            }
        }
        for phrase in ALLOW_PHRASES {
            rules.push_allow(phrase);
        }
        rules
    }

    /// Single words match on word boundaries; anything with whitespace becomes a phrase rule.
    pub fn with_term(mut self, reason: Reason, term: &str) -> Self {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return self;
        }
        if term.split_whitespace().count() == 1 {
            self.words.insert(term, reason);
        } else if let Ok(re) = Regex::new(&format!(r"\b{}\b", regex::escape(&term))) {
            self.phrases.push((reason, re));
        }
        self
    }

    pub fn with_allow_phrase(mut self, phrase: &str) -> Self {
        self.push_allow(phrase);
        self
    }

    fn push_allow(&mut self, phrase: &str) {
        let phrase = phrase.trim().to_lowercase();
        if phrase.is_empty() {
            return;
        }
        let pattern = format!(r"(^|\W){}($|\W)", regex::escape(&phrase));
        match Regex::new(&pattern) {
            Ok(re) => self.allow.push(re),
            Err(e) => tracing::warn!(%e, "ignoring invalid allow phrase"),
        }
    }
}

impl Default for ModerationRules {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Classifies outgoing text. Pure and synchronous; safe to call on every submit.
#[derive(Clone, Debug, Default)]
pub struct ModerationGate {
    rules: ModerationRules,
}

impl ModerationGate {
    pub fn new(rules: ModerationRules) -> Self {
        Self { rules }
    }

    pub fn classify(&self, text: &str) -> ModerationVerdict {
        if text.trim().is_empty() {
            return ModerationVerdict::clean();
        }

        let normalized = self.strip_allowed(&text.to_lowercase());
        let mut hits = Vec::new();

        for word in normalized.unicode_words() {
            let folded = fold_leetspeak(word);
            if let Some(reason) = self.rules.words.get(folded.as_str()) {
                hits.push(PolicyHit {
                    reason: *reason,
                    rule: format!("word:{folded}"),
                });
            }
        }

        for (reason, re) in &self.rules.phrases {
            if re.is_match(&normalized) {
                hits.push(PolicyHit {
                    reason: *reason,
                    rule: format!("phrase:{}", re.as_str()),
                });
            }
        }

        hits.extend(spam_heuristics(text, &normalized));

        let verdict = ModerationVerdict::from_hits(hits);
        if !verdict.is_clean() {
            tracing::debug!(
                severity = ?verdict.severity,
                reasons = ?verdict.reasons,
                hits = verdict.hits.len(),
                "moderation_classified"
            );
        }
        verdict
    }

    pub fn check_before_send(&self, text: &str) -> GateDecision {
        let verdict = self.classify(text);
        match verdict.severity {
            Severity::High => {
                let worst = verdict
                    .reasons
                    .iter()
                    .copied()
                    .find(|r| matches!(r, Reason::HateSpeech | Reason::Violence))
                    .unwrap_or(Reason::HateSpeech);
                GateDecision::Blocked {
                    reason: format!(
                        "This message can't be sent because it appears to contain {}.",
                        worst.user_facing()
                    ),
                    verdict,
                }
            }
            Severity::Medium => GateDecision::NeedsConfirmation { verdict },
            Severity::Low => GateDecision::Allowed { verdict },
        }
    }

    fn strip_allowed(&self, lowered: &str) -> String {
        let mut out = lowered.to_string();
        for re in &self.rules.allow {
            out = re.replace_all(&out, " ").into_owned();
        }
        out
    }
}

fn fold_leetspeak(word: &str) -> String {
    word.chars()
        .map(|c| match c {
            '@' => 'a',
            '$' => 's',
            '0' => 'o',
            '1' | '!' => 'i',
            '3' => 'e',
            other => other,
        })
        .collect()
}

fn spam_heuristics(original: &str, normalized: &str) -> Vec<PolicyHit> {
    let mut hits = Vec::new();
    let spam = |rule: &str| PolicyHit {
        reason: Reason::Spam,
        rule: rule.to_string(),
    };

    let links = normalized
        .split_whitespace()
        .filter(|w| w.starts_with("http://") || w.starts_with("https://") || w.starts_with("www."))
        .count();
    if links > MAX_LINKS {
        hits.push(spam("many_links"));
    }

    if has_repeated_char_run(original) {
        hits.push(spam("repeated_characters"));
    }

    if has_repeated_word_run(normalized) {
        hits.push(spam("repeated_words"));
    }

    let letters: Vec<char> = original.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.len() >= CAPS_MIN_LETTERS {
        let caps = letters.iter().filter(|c| c.is_uppercase()).count();
        if caps as f32 / letters.len() as f32 > CAPS_RATIO {
            hits.push(spam("excessive_capitalization"));
        }
    }

    hits
}

fn has_repeated_char_run(text: &str) -> bool {
    let mut prev = None;
    let mut run = 0usize;
    for c in text.chars() {
        if c.is_whitespace() {
            prev = None;
            run = 0;
            continue;
        }
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        if run >= REPEATED_CHAR_RUN {
            return true;
        }
    }
    false
}

fn has_repeated_word_run(normalized: &str) -> bool {
    let mut prev: Option<&str> = None;
    let mut run = 0usize;
    for w in normalized.unicode_words() {
        if Some(w) == prev {
            run += 1;
        } else {
            prev = Some(w);
            run = 1;
        }
        if run >= REPEATED_WORD_RUN {
            return true;
        }
    }
    false
}
