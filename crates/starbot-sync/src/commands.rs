//! User-invoked actions: link, unlink and the leaderboard listing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use starbot_core::LeaderboardSnapshot;
use starbot_storage::{LinkConstraint, LinkError, LinkStore};
use thiserror::Error;
use tracing::{info, warn};

use crate::engine::SyncEngine;
use crate::reconcile::MemberOutcome;

pub const LEADERBOARD_PAGE_SIZE: usize = 15;

const LINK_INSTRUCTIONS: &str = concat!(
    "**How to get your AOC User ID:**\n",
    "First head to [adventofcode.com](https://adventofcode.com/) and log in, ",
    "click on `[Settings]`, there you will see your User ID:\n",
    "\n```\n\u{200b}\n",
    "What would you like to be called?\n",
    "\n",
    "( ) (anonymous user #1234567)\n",
    "        There it is! ^^^^^^^\n",
    "\u{200b}\n```\n",
    "Great! Now you can claim your account using `/link user_id: YOUR ID`",
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    /// Only visible to the invoking user.
    pub ephemeral: bool,
}

impl Reply {
    fn public(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: false,
        }
    }

    fn private(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }
}

/// A reply plus the member whose name and role should be refreshed once the
/// reply has been sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub reply: Reply,
    pub reconcile_user: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardPage {
    pub content: String,
    /// Zero-based.
    pub page: usize,
    pub pages: usize,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("link storage failed: {0}")]
    Links(#[from] LinkError),
}

pub struct CommandSurface {
    links: Arc<dyn LinkStore>,
    engine: Arc<SyncEngine>,
    invite: String,
    refresh_budget: Duration,
}

impl CommandSurface {
    pub fn new(
        links: Arc<dyn LinkStore>,
        engine: Arc<SyncEngine>,
        invite: impl Into<String>,
        refresh_budget: Duration,
    ) -> Self {
        Self {
            links,
            engine,
            invite: invite.into(),
            refresh_budget,
        }
    }

    pub async fn link(
        &self,
        invoker: u64,
        aoc_user_id: Option<u64>,
    ) -> Result<CommandOutcome, CommandError> {
        let Some(aoc_user_id) = aoc_user_id.filter(|id| *id != 0) else {
            return Ok(CommandOutcome {
                reply: Reply::private(LINK_INSTRUCTIONS),
                reconcile_user: None,
            });
        };

        let detail = match self.links.insert_link(invoker, aoc_user_id).await {
            Ok(()) => {
                info!(user_id = invoker, aoc_user_id, "account linked");
                return Ok(CommandOutcome {
                    reply: Reply::public(format!(
                        "Successfully linked AOC account. Please go [here](https://adventofcode.com/leaderboard/private) \
                         and join the leaderboard (`{}`) so we can track your stars.",
                        self.invite
                    )),
                    reconcile_user: Some(invoker),
                });
            }
            Err(LinkError::UniqueViolation {
                constraint: LinkConstraint::PlatformUser,
            }) => "You already have an AOC User ID claimed. Please `/unlink` first!",
            Err(LinkError::UniqueViolation {
                constraint: LinkConstraint::EventUser,
            }) => "That AOC User ID is already claimed.",
            Err(LinkError::IdOutOfRange(_)) => "That is not a valid AOC User ID.",
            Err(err) => return Err(err.into()),
        };
        Ok(CommandOutcome {
            reply: Reply::private(detail),
            reconcile_user: None,
        })
    }

    pub async fn unlink(&self, invoker: u64) -> Result<CommandOutcome, CommandError> {
        match self.links.delete_link(invoker).await? {
            Some(removed) => {
                info!(user_id = invoker, aoc_user_id = removed.aoc_user_id, "account unlinked");
                Ok(CommandOutcome {
                    reply: Reply::public("Account unlinked."),
                    reconcile_user: Some(invoker),
                })
            }
            None => Ok(CommandOutcome {
                reply: Reply::private("You do not have an AOC account linked to your account."),
                reconcile_user: None,
            }),
        }
    }

    /// Run the single-member reconcile requested by a command outcome.
    pub async fn follow_up(&self, outcome: &CommandOutcome) -> Option<MemberOutcome> {
        let user_id = outcome.reconcile_user?;
        match self.engine.reconcile_user(user_id).await {
            Ok(result) => result,
            Err(err) => {
                warn!(user_id, error = %err, "post-command reconcile failed");
                None
            }
        }
    }

    /// Refresh (bounded by the configured budget) and render one page.
    pub async fn leaderboard(&self, page: usize) -> Result<LeaderboardPage, CommandError> {
        let snapshot = self.engine.snapshot_within(self.refresh_budget).await;
        self.render(&snapshot, page).await
    }

    /// Render one page of the stored snapshot without refreshing.
    pub async fn leaderboard_page(&self, page: usize) -> Result<LeaderboardPage, CommandError> {
        let snapshot = self.engine.snapshot();
        self.render(&snapshot, page).await
    }

    async fn render(
        &self,
        snapshot: &LeaderboardSnapshot,
        page: usize,
    ) -> Result<LeaderboardPage, CommandError> {
        let mentions = self
            .links
            .list_all_links()
            .await?
            .into_iter()
            .map(|l| (l.aoc_user_id, l.user_id))
            .collect::<HashMap<_, _>>();
        Ok(render_leaderboard(snapshot, &mentions, page))
    }
}

/// Render a page of the ranked leaderboard. `mentions` maps event user ids to
/// platform user ids; linked entries are shown as mentions.
static MARKDOWN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\\*_`~|>]").expect("markdown pattern is valid"));

/// Backslash-escape characters the chat client treats as formatting.
pub fn escape_markdown(text: &str) -> String {
    MARKDOWN_RE.replace_all(text, r"\$0").into_owned()
}

pub fn render_leaderboard(
    snapshot: &LeaderboardSnapshot,
    mentions: &HashMap<u64, u64>,
    page: usize,
) -> LeaderboardPage {
    let ranked = snapshot.ranked();
    if ranked.is_empty() {
        return LeaderboardPage {
            content: "No one has joined the leaderboard yet.".to_string(),
            page: 0,
            pages: 1,
        };
    }

    let pages = ranked.len().div_ceil(LEADERBOARD_PAGE_SIZE);
    let page = page.min(pages - 1);
    let mut content = format!("**Leaderboard {}** (page {}/{})\n", snapshot.event, page + 1, pages);
    for entry in ranked
        .iter()
        .skip(page * LEADERBOARD_PAGE_SIZE)
        .take(LEADERBOARD_PAGE_SIZE)
    {
        let label = entry.rank.map(|r| format!("{r}.")).unwrap_or_default();
        let who = match mentions.get(&entry.stats.id) {
            Some(user_id) => format!("<@{user_id}>"),
            None => escape_markdown(&entry.name),
        };
        content.push_str(&format!(
            "`{label:>4} {score:>5}` ⭐{stars} {who}\n",
            score = entry.stats.local_score,
            stars = entry.stats.stars,
        ));
    }
    LeaderboardPage {
        content: content.trim_end().to_string(),
        page,
        pages,
    }
}
