//! Match results: ranks, scores and statistics
//!
//! The stage reports a winner, ranks, scores and named statistics by team
//! name while the match runs. At the end those reports are reconciled into a
//! ranked list: scores imply ranks when no rank was given, a named winner
//! implies rank 1, and a rank-1 team implies the winner.

use serde::{Deserialize, Serialize};

use crate::consts::MAX_SCORE_STATS;

/// A named numeric statistic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreStat {
    pub key: String,
    pub value: f64,
}

/// What the stage reported for one team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamResult {
    pub name: String,
    /// 1 is best; 0 means unranked
    pub rank: u32,
    pub score: f64,
    pub stats: Vec<ScoreStat>,
    /// Hidden for stage-ship teams
    pub show_result: bool,
}

impl TeamResult {
    pub fn new(name: impl Into<String>, show_result: bool) -> Self {
        Self {
            name: name.into(),
            rank: 0,
            score: 0.0,
            stats: Vec::new(),
            show_result,
        }
    }

    /// Replace an existing statistic or append a new one (up to the cap)
    pub fn set_statistic(&mut self, key: &str, value: f64) -> bool {
        if let Some(stat) = self.stats.iter_mut().find(|s| s.key == key) {
            stat.value = value;
            return true;
        }
        if self.stats.len() >= MAX_SCORE_STATS {
            return false;
        }
        self.stats.push(ScoreStat {
            key: key.to_string(),
            value,
        });
        true
    }
}

/// Winner and rank bookkeeping across all teams
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Standings {
    pub winner: Option<String>,
    pub has_ranks: bool,
    pub has_scores: bool,
}

impl Standings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the winner; ignored if no team has that name
    pub fn set_winner(&mut self, results: &[TeamResult], name: &str) {
        if results.iter().any(|r| r.name == name) {
            self.winner = Some(name.to_string());
        }
    }

    pub fn set_rank(&mut self, results: &mut [TeamResult], name: &str, rank: u32) {
        if let Some(result) = results.iter_mut().find(|r| r.name == name) {
            result.rank = rank;
            self.has_ranks = true;
        }
    }

    pub fn set_score(&mut self, results: &mut [TeamResult], name: &str, score: f64) {
        if let Some(result) = results.iter_mut().find(|r| r.name == name) {
            result.score = score;
            self.has_scores = true;
        }
    }

    pub fn set_statistic(
        &mut self,
        results: &mut [TeamResult],
        name: &str,
        key: &str,
        value: f64,
    ) -> bool {
        results
            .iter_mut()
            .find(|r| r.name == name)
            .map(|r| r.set_statistic(key, value))
            .unwrap_or(false)
    }

    /// Reconcile winner, ranks and scores
    pub fn process(&mut self, results: &mut [TeamResult]) {
        let mut has_effective_ranks = self.has_ranks;
        if self.has_scores && !self.has_ranks {
            rank_by_score(results);
            has_effective_ranks = true;
        } else if !self.has_ranks {
            if let Some(winner) = self.winner.clone() {
                if let Some(result) = results.iter_mut().find(|r| r.name == winner) {
                    result.rank = 1;
                    has_effective_ranks = true;
                }
            }
        }
        if self.winner.is_none() && (self.has_scores || has_effective_ranks) {
            self.winner = results.iter().find(|r| r.rank == 1).map(|r| r.name.clone());
        }
    }
}

/// Assign ranks 1..n by descending score; ties keep team order
fn rank_by_score(results: &mut [TeamResult]) {
    let mut order: Vec<usize> = (0..results.len()).collect();
    order.sort_by(|&a, &b| results[b].score.total_cmp(&results[a].score));
    for (position, &i) in order.iter().enumerate() {
        results[i].rank = position as u32 + 1;
    }
}

/// Results sorted by ascending rank, unranked teams last
pub fn ranked(results: &[TeamResult]) -> Vec<TeamResult> {
    let mut sorted = results.to_vec();
    sorted.sort_by_key(|r| if r.rank == 0 { u32::MAX } else { r.rank });
    sorted
}

/// End-of-match summary for one ship
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipSummary {
    pub name: String,
    pub alive: bool,
    pub energy: f64,
    pub kills: f64,
    pub friendly_kills: f64,
    pub damage: f64,
    pub friendly_damage: f64,
    pub shielded_damage: f64,
}

/// End-of-match summary for one team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub name: String,
    pub disabled: bool,
    pub errored: bool,
    pub cpu_total_micros: u64,
    pub cpu_average_micros: f64,
    pub ships: Vec<ShipSummary>,
}

/// Everything the match reports once it is over
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub winner: Option<String>,
    pub ticks: u64,
    pub ranked: Vec<TeamResult>,
    pub teams: Vec<TeamSummary>,
}
