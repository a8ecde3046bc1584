//! Per-member reconciliation of display name and role against the
//! leaderboard.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use starbot_adapters::{GuildInfo, Member, MemberEdit, NickChange, Platform, PlatformError};
use starbot_core::{
    compose_within, decompose, is_shortened_form, LeaderboardSnapshot, NICKNAME_MAX_CHARS,
};
use starbot_storage::LinkStore;
use tracing::{debug, warn};

/// When a linked member holds the tracking role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RolePolicy {
    /// Role only once the member has at least one star.
    #[default]
    StarsRequired,
    /// Role for every linked member, starred or not.
    WhileLinked,
}

impl RolePolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "stars" | "stars_required" => Some(Self::StarsRequired),
            "linked" | "while_linked" => Some(Self::WhileLinked),
            _ => None,
        }
    }

    fn wants_role(self, stars: u32) -> bool {
        match self {
            Self::StarsRequired => stars > 0,
            Self::WhileLinked => true,
        }
    }
}

/// What the reconciler decided for one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Owner or ranked at/above the bot.
    Skip,
    Unchanged,
    Mutate(MemberEdit),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOutcome {
    Mutated,
    Unchanged,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub examined: usize,
    pub mutated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn record(&mut self, outcome: MemberOutcome) {
        self.examined += 1;
        match outcome {
            MemberOutcome::Mutated => self.mutated += 1,
            MemberOutcome::Unchanged => self.unchanged += 1,
            MemberOutcome::Skipped => self.skipped += 1,
            MemberOutcome::Failed => self.failed += 1,
        }
    }
}

/// Compute the change needed to bring `member` in line.
///
/// `stars` is `None` for members without a link; they end up with a bare
/// base name and without the role. A base that was cut to fit a suffix is
/// restored from the account name.
pub fn plan(
    member: &Member,
    guild: &GuildInfo,
    role_id: u64,
    stars: Option<u32>,
    policy: RolePolicy,
) -> Decision {
    if !guild.can_modify(member) {
        return Decision::Skip;
    }

    let current = member.display_name();
    let account_name = member.global_name.as_deref().unwrap_or(&member.username);
    let mut base = decompose(current).base;
    if is_shortened_form(&base, account_name, NICKNAME_MAX_CHARS) {
        base = account_name.to_string();
    }
    let (desired_name, desired_role) = match stars {
        Some(stars) => (
            compose_within(&base, Some(stars), NICKNAME_MAX_CHARS),
            policy.wants_role(stars),
        ),
        None => (base, false),
    };

    let mut edit = MemberEdit::default();
    if desired_name != current {
        edit.nick = Some(if desired_name == account_name {
            NickChange::Reset
        } else {
            NickChange::Set(desired_name)
        });
    }
    if member.has_role(role_id) != desired_role {
        let mut roles = member
            .roles
            .iter()
            .copied()
            .filter(|r| *r != role_id)
            .collect::<Vec<_>>();
        if desired_role {
            roles.push(role_id);
        }
        edit.roles = Some(roles);
    }

    if edit.is_empty() {
        Decision::Unchanged
    } else {
        Decision::Mutate(edit)
    }
}

pub struct Reconciler {
    links: Arc<dyn LinkStore>,
    platform: Arc<dyn Platform>,
    role_id: u64,
    policy: RolePolicy,
}

impl Reconciler {
    pub fn new(
        links: Arc<dyn LinkStore>,
        platform: Arc<dyn Platform>,
        role_id: u64,
        policy: RolePolicy,
    ) -> Self {
        Self {
            links,
            platform,
            role_id,
            policy,
        }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn role_id(&self) -> u64 {
        self.role_id
    }

    /// Apply a decision. Platform failures are logged and reported, never
    /// propagated.
    async fn apply(&self, member: &Member, decision: Decision) -> MemberOutcome {
        match decision {
            Decision::Skip => MemberOutcome::Skipped,
            Decision::Unchanged => MemberOutcome::Unchanged,
            Decision::Mutate(edit) => match self.platform.edit_member(member.id, &edit).await {
                Ok(()) => {
                    debug!(user_id = member.id, ?edit, "member updated");
                    MemberOutcome::Mutated
                }
                Err(err) => {
                    warn!(user_id = member.id, error = %err, "member update failed");
                    MemberOutcome::Failed
                }
            },
        }
    }

    /// Reconcile a single member, looking up their link in the store.
    pub async fn reconcile_member(
        &self,
        member: &Member,
        guild: &GuildInfo,
        snapshot: &LeaderboardSnapshot,
    ) -> MemberOutcome {
        if !guild.can_modify(member) {
            return MemberOutcome::Skipped;
        }
        let linked = match self.links.lookup_event_id(member.id).await {
            Ok(linked) => linked,
            Err(err) => {
                warn!(user_id = member.id, error = %err, "link lookup failed");
                return MemberOutcome::Failed;
            }
        };
        let stars = linked.map(|aoc_id| snapshot.stars_for(aoc_id));
        let decision = plan(member, guild, self.role_id, stars, self.policy);
        self.apply(member, decision).await
    }

    /// Reconcile the whole roster. Only failing to load the roster, guild or
    /// link table is an error; individual member failures are counted.
    pub async fn reconcile_roster(
        &self,
        snapshot: &LeaderboardSnapshot,
    ) -> Result<BatchReport, ReconcileError> {
        let guild = self.platform.guild().await?;
        let links = self
            .links
            .list_all_links()
            .await?
            .into_iter()
            .map(|l| (l.user_id, l.aoc_user_id))
            .collect::<HashMap<_, _>>();
        let members = self.platform.members().await?;

        let mut report = BatchReport::default();
        for member in &members {
            let stars = links.get(&member.id).map(|aoc_id| snapshot.stars_for(*aoc_id));
            let decision = plan(member, &guild, self.role_id, stars, self.policy);
            report.record(self.apply(member, decision).await);
        }
        Ok(report)
    }

    /// Strip star suffixes and the role from every member, linked or not.
    pub async fn clear_roster(&self) -> Result<BatchReport, ReconcileError> {
        let guild = self.platform.guild().await?;
        let members = self.platform.members().await?;

        let mut report = BatchReport::default();
        for member in &members {
            let decision = plan(member, &guild, self.role_id, None, self.policy);
            report.record(self.apply(member, decision).await);
        }
        Ok(report)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error(transparent)]
    Links(#[from] starbot_storage::LinkError),
}
