//! Salience scoring
//!
//! Salience is a bounded `[0, 1]` score estimating how worth keeping a turn
//! is. The store asks a [`SalienceStrategy`] for the initial score of every
//! recorded turn and for the decayed score of long-term entries during a
//! sweep.

use chrono::{DateTime, Duration, Utc};

use crate::types::{MemoryEntry, Role};

/// Pluggable salience scoring
pub trait SalienceStrategy: Send + Sync {
    /// Initial salience of a freshly recorded turn, in `[0, 1]`
    fn initial(&self, text: &str, role: Role) -> f64;

    /// Salience after `idle` more time without access.
    ///
    /// Must never exceed `entry.salience`.
    fn decayed(&self, entry: &MemoryEntry, idle: Duration, now: DateTime<Utc>) -> f64;
}

/// Keyword signals and their weights; matched on word boundaries
const KEYWORDS: &[(&str, f64)] = &[
    ("remember", 0.3),
    ("don't forget", 0.3),
    ("do not forget", 0.3),
    ("important", 0.3),
    ("my name", 0.35),
    ("birthday", 0.3),
    ("anniversary", 0.3),
    ("allergic", 0.3),
    ("deadline", 0.25),
    ("appointment", 0.2),
    ("goal", 0.2),
    ("promise", 0.2),
    ("i feel", 0.2),
    ("i love", 0.2),
    ("i hate", 0.2),
    ("i prefer", 0.2),
    ("favorite", 0.15),
    ("favourite", 0.15),
    ("always", 0.15),
    ("never", 0.15),
];

const BASE: f64 = 0.2;
const LENGTH_WEIGHT: f64 = 0.25;
const LENGTH_SATURATION_WORDS: f64 = 40.0;
const KEYWORD_CAP: f64 = 0.5;
const QUESTION_BONUS: f64 = 0.05;
const NON_USER_SCALE: f64 = 0.8;

/// Heuristic scoring from length, personal keywords and questions, with
/// access-aware exponential decay.
#[derive(Debug, Clone)]
pub struct HeuristicSalience {
    half_life: Duration,
}

impl HeuristicSalience {
    pub fn new(half_life: Duration) -> Self {
        Self { half_life }
    }

    /// Strategy with the half-life from a memory configuration
    pub fn from_config(config: &crate::config::MemoryConfig) -> Self {
        Self::new(Duration::seconds(
            config.decay_half_life_secs.min(i64::MAX as u64) as i64,
        ))
    }

    fn keyword_signal(text: &str) -> f64 {
        let normalized: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
            .collect();
        let padded = format!(" {} ", normalized.split_whitespace().collect::<Vec<_>>().join(" "));

        let total: f64 = KEYWORDS
            .iter()
            .filter(|(kw, _)| padded.contains(&format!(" {} ", kw)))
            .map(|(_, w)| w)
            .sum();
        total.min(KEYWORD_CAP)
    }
}

impl Default for HeuristicSalience {
    fn default() -> Self {
        Self::new(Duration::days(7))
    }
}

impl SalienceStrategy for HeuristicSalience {
    fn initial(&self, text: &str, role: Role) -> f64 {
        let words = text.split_whitespace().count() as f64;
        let length = LENGTH_WEIGHT * (words.min(LENGTH_SATURATION_WORDS) / LENGTH_SATURATION_WORDS);
        let question = if text.contains('?') { QUESTION_BONUS } else { 0.0 };

        let mut score = BASE + length + Self::keyword_signal(text) + question;
        if role != Role::User {
            score *= NON_USER_SCALE;
        }
        score.clamp(0.0, 1.0)
    }

    fn decayed(&self, entry: &MemoryEntry, idle: Duration, now: DateTime<Utc>) -> f64 {
        let idle_secs = idle.num_seconds().max(0) as f64;
        if idle_secs == 0.0 {
            return entry.salience;
        }

        // Frequently retrieved entries decay more slowly.
        let age_weeks = ((now - entry.created_at).num_seconds().max(0) as f64
            / Duration::weeks(1).num_seconds() as f64)
            .max(1.0);
        let access_rate = entry.access_count as f64 / age_weeks;
        let half_life = self.half_life.num_seconds().max(1) as f64 * (1.0 + access_rate.ln_1p());

        let factor = 0.5_f64.powf(idle_secs / half_life);
        (entry.salience * factor).clamp(0.0, entry.salience)
    }
}

/// Constant initial salience with no decay.
///
/// For callers that score turns themselves before recording them.
#[derive(Debug, Clone, Copy)]
pub struct FixedSalience(pub f64);

impl SalienceStrategy for FixedSalience {
    fn initial(&self, _text: &str, _role: Role) -> f64 {
        self.0.clamp(0.0, 1.0)
    }

    fn decayed(&self, entry: &MemoryEntry, _idle: Duration, _now: DateTime<Utc>) -> f64 {
        entry.salience
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_term_entry(salience: f64, access_count: u32, created_days_ago: i64) -> MemoryEntry {
        let now = Utc::now();
        let mut entry = MemoryEntry::new("x", Role::User, vec![], salience, now - Duration::days(created_days_ago));
        entry.access_count = access_count;
        entry
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Initial scoring
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_small_talk_is_low() {
        let s = HeuristicSalience::default();
        let score = s.initial("ok thanks", Role::User);
        assert!(score < 0.45, "score {score}");
    }

    #[test]
    fn test_personal_facts_are_promotable() {
        let s = HeuristicSalience::default();
        let score = s.initial(
            "Please remember that my name is Ada and my birthday is in March",
            Role::User,
        );
        assert!(score >= 0.75, "score {score}");
    }

    #[test]
    fn test_keywords_match_whole_words() {
        assert_eq!(HeuristicSalience::keyword_signal("goalkeeper practice"), 0.0);
        assert!(HeuristicSalience::keyword_signal("My goal, for now.") > 0.0);
    }

    #[test]
    fn test_assistant_turns_are_scaled() {
        let s = HeuristicSalience::default();
        let text = "It is important to remember the deadline";
        assert!(s.initial(text, Role::Assistant) < s.initial(text, Role::User));
    }

    #[test]
    fn test_initial_is_bounded() {
        let s = HeuristicSalience::default();
        let long = "remember important my name birthday deadline ? ".repeat(20);
        let score = s.initial(&long, Role::User);
        assert!((0.0..=1.0).contains(&score));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Decay
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn test_one_half_life_halves_salience() {
        let s = HeuristicSalience::new(Duration::days(7));
        let entry = long_term_entry(0.8, 0, 30);
        let decayed = s.decayed(&entry, Duration::days(7), Utc::now());
        assert!((decayed - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_decay_never_raises() {
        let s = HeuristicSalience::default();
        let entry = long_term_entry(0.6, 100, 1);
        assert_eq!(s.decayed(&entry, Duration::zero(), Utc::now()), 0.6);
        assert_eq!(s.decayed(&entry, Duration::days(-3), Utc::now()), 0.6);
        assert!(s.decayed(&entry, Duration::days(3), Utc::now()) <= 0.6);
    }

    #[test]
    fn test_frequent_access_slows_decay() {
        let s = HeuristicSalience::default();
        let now = Utc::now();
        let cold = long_term_entry(0.8, 0, 14);
        let hot = long_term_entry(0.8, 20, 14);
        assert!(s.decayed(&hot, Duration::days(7), now) > s.decayed(&cold, Duration::days(7), now));
    }
}
