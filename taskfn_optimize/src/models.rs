use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Candidate instructions, one entry per task unit of the program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionVariant {
    pub id: Ulid,
    pub instructions: Vec<String>,
    #[serde(default)]
    pub parent_id: Option<Ulid>,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl InstructionVariant {
    pub fn new(
        instructions: Vec<String>,
        parent_id: Option<Ulid>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: Ulid::new(),
            instructions,
            parent_id,
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}

/// Mean holdout score of one instruction variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub variant: Ulid,
    pub description: String,
    pub score: f32,
}

/// One round of instruction search: every candidate tried and the round's leader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRound {
    pub round: usize,
    pub candidates: Vec<CandidateScore>,
    pub leader: Ulid,
    pub leader_score: f32,
    /// The leader beat the best instructions so far by at least `min_improvement`.
    pub improved: bool,
}

impl SearchRound {
    /// Summarize a round; the leader improves only if it scores above `to_beat`.
    ///
    /// `None` when no candidate was scored.
    pub fn from_scores(
        round: usize,
        candidates: Vec<CandidateScore>,
        to_beat: f32,
    ) -> Option<Self> {
        let leader = candidates.iter().max_by(|a, b| a.score.total_cmp(&b.score))?;
        Some(Self {
            round,
            leader: leader.variant,
            leader_score: leader.score,
            improved: leader.score > to_beat,
            candidates,
        })
    }
}

/// Outcome of one instruction search run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub run_id: Ulid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub initial_instructions: Vec<String>,
    pub best_instructions: Vec<String>,
    pub baseline_score: f32,
    pub best_score: f32,
    pub rounds: Vec<SearchRound>,
}

impl OptimizationReport {
    pub fn new(initial_instructions: Vec<String>) -> Self {
        Self {
            run_id: Ulid::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            best_instructions: initial_instructions.clone(),
            initial_instructions,
            baseline_score: f32::NEG_INFINITY,
            best_score: f32::NEG_INFINITY,
            rounds: Vec::new(),
        }
    }

    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    pub fn improved(&self) -> bool {
        self.rounds.iter().any(|r| r.improved)
    }
}
