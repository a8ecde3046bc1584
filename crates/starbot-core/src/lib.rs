//! Core domain model for starbot: leaderboard snapshots, account links and
//! the display-name star codec.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod names;

pub use names::{
    compose, compose_within, decompose, is_shortened_form, NameParts, NICKNAME_MAX_CHARS, STAR,
};

pub const CRATE_NAME: &str = "starbot-core";

/// A claimed 1:1 pairing between a platform user and an event user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub user_id: u64,
    pub aoc_user_id: u64,
}

/// Completion timestamp for a single puzzle part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StarTimestamp {
    pub get_star_ts: i64,
    #[serde(default)]
    pub star_index: u64,
}

/// Per-member stats as reported by the private leaderboard endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberStats {
    pub id: u64,
    /// `None` for members who chose to stay anonymous.
    pub name: Option<String>,
    pub stars: u32,
    pub local_score: u64,
    pub global_score: i64,
    #[serde(default)]
    pub last_star_ts: i64,
    /// Day -> part -> completion time.
    #[serde(default)]
    pub completion_day_level: BTreeMap<String, BTreeMap<String, StarTimestamp>>,
}

impl MemberStats {
    pub fn display_name(&self) -> String {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("(anonymous user #{})", self.id),
        }
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("malformed leaderboard payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("member key {key} does not match member id {id}")]
    MemberKeyMismatch { key: String, id: u64 },
}

/// Immutable view of one leaderboard fetch. Replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardSnapshot {
    pub members: BTreeMap<String, MemberStats>,
    pub event: String,
    pub owner_id: u64,
}

impl Default for LeaderboardSnapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl LeaderboardSnapshot {
    /// Placeholder used until the first successful fetch.
    pub fn empty() -> Self {
        Self {
            members: BTreeMap::new(),
            event: "unknown".to_string(),
            owner_id: 0,
        }
    }

    /// Decode and validate a raw leaderboard payload.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_slice(bytes)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    fn validate(&self) -> Result<(), SnapshotError> {
        for (key, member) in &self.members {
            if key.parse::<u64>().ok() != Some(member.id) {
                return Err(SnapshotError::MemberKeyMismatch {
                    key: key.clone(),
                    id: member.id,
                });
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn member(&self, aoc_user_id: u64) -> Option<&MemberStats> {
        self.members.get(&aoc_user_id.to_string())
    }

    /// Stars recorded for a member, 0 when they have not shown up yet.
    pub fn stars_for(&self, aoc_user_id: u64) -> u32 {
        self.member(aoc_user_id).map(|m| m.stars).unwrap_or(0)
    }

    /// Members ordered by local score (descending), name as tie-break.
    ///
    /// Tied scores share the rank of the first member in the tie; only that
    /// first entry carries `Some(rank)`.
    pub fn ranked(&self) -> Vec<RankedEntry<'_>> {
        let mut members = self
            .members
            .values()
            .map(|m| (m.display_name(), m))
            .collect::<Vec<_>>();
        members.sort_by(|(name_a, a), (name_b, b)| {
            b.local_score
                .cmp(&a.local_score)
                .then_with(|| name_a.to_lowercase().cmp(&name_b.to_lowercase()))
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut out = Vec::with_capacity(members.len());
        let mut previous_score = None;
        for (idx, (name, stats)) in members.into_iter().enumerate() {
            let rank = if previous_score == Some(stats.local_score) {
                None
            } else {
                Some(idx + 1)
            };
            previous_score = Some(stats.local_score);
            out.push(RankedEntry { rank, name, stats });
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEntry<'a> {
    /// `None` when this entry ties with the one above it.
    pub rank: Option<usize>,
    pub name: String,
    pub stats: &'a MemberStats,
}
