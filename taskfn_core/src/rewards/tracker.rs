use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

pub const DEFAULT_DISCOUNT: f64 = 0.9;

static GLOBAL: LazyLock<RewardTracker> = LazyLock::new(RewardTracker::default);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardEntry {
    pub score: f64,
    /// Epoch seconds.
    pub timestamp: f64,
    /// Short rendering of the interaction that earned the score.
    #[serde(default)]
    pub example: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceKind {
    Positive,
    Negative,
}

impl AdviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AdviceKind::Positive => "positive",
            AdviceKind::Negative => "negative",
        }
    }
}

impl fmt::Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviceExample {
    pub example: String,
    pub kind: AdviceKind,
    pub impact: f64,
}

#[derive(Debug, Default)]
struct Group {
    entries: Vec<RewardEntry>,
    /// Entries before this index belong to finished episodes.
    episode_start: usize,
}

/// Time-discounted reward history per named group.
///
/// Growth is unbounded: nothing is ever evicted.
pub struct RewardTracker {
    discount: f64,
    groups: RwLock<HashMap<String, Group>>,
}

impl Default for RewardTracker {
    fn default() -> Self {
        Self::new(DEFAULT_DISCOUNT)
    }
}

impl fmt::Debug for RewardTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RewardTracker")
            .field("discount", &self.discount)
            .field("groups", &self.groups.read().len())
            .finish()
    }
}

impl RewardTracker {
    pub fn new(discount: f64) -> Self {
        Self {
            discount,
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide tracker.
    pub fn global() -> &'static RewardTracker {
        &GLOBAL
    }

    pub fn discount(&self) -> f64 {
        self.discount
    }

    pub fn add_reward(&self, group: &str, score: f64, timestamp: f64) {
        self.add_entry(
            group,
            RewardEntry {
                score,
                timestamp,
                example: None,
            },
        );
    }

    #[tracing::instrument(level = "debug", skip(self, entry), fields(score = entry.score))]
    pub fn add_entry(&self, group: &str, entry: RewardEntry) {
        self.groups
            .write()
            .entry(group.to_string())
            .or_default()
            .entries
            .push(entry);
    }

    /// Close the current episode; later cumulative rewards ignore everything before it.
    pub fn end_episode(&self, group: &str) {
        let mut groups = self.groups.write();
        let g = groups.entry(group.to_string()).or_default();
        g.episode_start = g.entries.len();
    }

    pub fn entries(&self, group: &str) -> Vec<RewardEntry> {
        self.groups
            .read()
            .get(group)
            .map(|g| g.entries.clone())
            .unwrap_or_default()
    }

    /// Σ score·γ^k over the current episode, k = 0 for the newest entry.
    pub fn cumulative_reward(&self, group: &str) -> f64 {
        let groups = self.groups.read();
        let Some(g) = groups.get(group) else {
            return 0.0;
        };
        let mut current: Vec<&RewardEntry> = g.entries[g.episode_start..].iter().collect();
        current.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        current
            .iter()
            .rev()
            .enumerate()
            .map(|(k, e)| e.score * self.discount.powi(k as i32))
            .sum()
    }

    /// Highest-impact entries as positives and lowest as negatives, without overlap.
    ///
    /// Impact is score·γ^(steps from the newest entry).
    pub fn advice_examples(
        &self,
        group: &str,
        n_positive: usize,
        n_negative: usize,
    ) -> Vec<AdviceExample> {
        let groups = self.groups.read();
        let Some(g) = groups.get(group) else {
            return Vec::new();
        };
        let mut ordered: Vec<&RewardEntry> = g.entries.iter().collect();
        ordered.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        let n = ordered.len();
        let mut ranked: Vec<(&RewardEntry, f64)> = ordered
            .into_iter()
            .enumerate()
            .map(|(i, e)| (e, e.score * self.discount.powi((n - 1 - i) as i32)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let n_positive = n_positive.min(ranked.len());
        let n_negative = n_negative.min(ranked.len() - n_positive);
        let render = |e: &RewardEntry| {
            e.example
                .clone()
                .unwrap_or_else(|| format!("score={} at {}", e.score, e.timestamp))
        };
        let positives = ranked[..n_positive].iter().map(|(e, impact)| AdviceExample {
            example: render(e),
            kind: AdviceKind::Positive,
            impact: *impact,
        });
        let negatives = ranked[ranked.len() - n_negative..]
            .iter()
            .map(|(e, impact)| AdviceExample {
                example: render(e),
                kind: AdviceKind::Negative,
                impact: *impact,
            });
        positives.chain(negatives).collect()
    }
}
