//! Daily "today's puzzle" forum post.

use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Datelike, Utc};
use starbot_adapters::{ForumPost, Platform, Puzzle, PuzzleSource};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnounceOutcome {
    Disabled,
    OutOfSeason,
    /// Past the last puzzle day of the event.
    NoPuzzle,
    AlreadyPosted,
    Posted(String),
}

/// Substring identifying the post for a given day, independent of title.
pub fn thread_marker(year: i32, day: u32) -> String {
    format!("{year}: Day {day}:")
}

pub fn thread_name(puzzle: &Puzzle) -> String {
    format!("--- {}: Day {}: {} ---", puzzle.year, puzzle.day, puzzle.title)
}

pub struct Announcer {
    platform: Arc<dyn Platform>,
    puzzles: Arc<dyn PuzzleSource>,
    forum_id: u64,
    role_id: u64,
    last_day: u32,
}

impl Announcer {
    pub fn new(
        platform: Arc<dyn Platform>,
        puzzles: Arc<dyn PuzzleSource>,
        forum_id: u64,
        role_id: u64,
        last_day: u32,
    ) -> Self {
        Self {
            platform,
            puzzles,
            forum_id,
            role_id,
            last_day,
        }
    }

    /// Post today's puzzle unless a post for today already exists. Season
    /// gating is the caller's job.
    pub async fn announce(&self, now: DateTime<Utc>) -> anyhow::Result<AnnounceOutcome> {
        let (year, day) = (now.year(), now.day());
        if day > self.last_day {
            return Ok(AnnounceOutcome::NoPuzzle);
        }

        let marker = thread_marker(year, day);
        let existing = self
            .platform
            .active_thread_names(self.forum_id)
            .await
            .context("listing forum threads")?;
        if existing.iter().any(|name| name.contains(&marker)) {
            return Ok(AnnounceOutcome::AlreadyPosted);
        }

        let puzzle = self
            .puzzles
            .fetch_puzzle(year, day)
            .await
            .with_context(|| format!("fetching puzzle for {year} day {day}"))?;
        let name = thread_name(&puzzle);
        let content = format!(
            "{} {}\n-# Don't want notifications? `/unlink` to remove your role!",
            self.platform.role_mention(self.role_id),
            puzzle.url
        );
        self.platform
            .create_forum_post(
                self.forum_id,
                &ForumPost {
                    name: name.clone(),
                    content,
                    mention_role: Some(self.role_id),
                },
            )
            .await
            .context("creating puzzle post")?;
        info!(thread = %name, "announced puzzle");
        Ok(AnnounceOutcome::Posted(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use starbot_adapters::testing::{MemoryPlatform, StaticPuzzles};
    use starbot_adapters::GuildInfo;

    const FORUM: u64 = 900;

    fn setup() -> (Arc<MemoryPlatform>, Arc<StaticPuzzles>, Announcer) {
        let platform = Arc::new(MemoryPlatform::new(GuildInfo {
            owner_id: 1,
            bot_top_role_position: 10,
        }));
        let puzzles = Arc::new(StaticPuzzles::new("Mull It Over"));
        let announcer = Announcer::new(platform.clone(), puzzles.clone(), FORUM, 77, 25);
        (platform, puzzles, announcer)
    }

    fn dec(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, day, 5, 0, 0).single().unwrap()
    }

    #[tokio::test]
    async fn posts_once_per_day() {
        let (platform, puzzles, announcer) = setup();

        let first = announcer.announce(dec(3)).await.unwrap();
        assert_eq!(
            first,
            AnnounceOutcome::Posted("--- 2024: Day 3: Mull It Over ---".into())
        );
        let posts = platform.posts();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].0, FORUM);
        assert!(posts[0].1.content.starts_with("<@&77> https://adventofcode.com/2024/day/3"));
        assert_eq!(posts[0].1.mention_role, Some(77));

        let second = announcer.announce(dec(3)).await.unwrap();
        assert_eq!(second, AnnounceOutcome::AlreadyPosted);
        assert_eq!(puzzles.calls(), 1);
    }

    #[tokio::test]
    async fn existing_thread_for_other_day_does_not_block() {
        let (platform, _puzzles, announcer) = setup();
        platform.add_thread(FORUM, "--- 2024: Day 1: Historian Hysteria ---");
        platform.add_thread(FORUM + 1, "--- 2024: Day 2: elsewhere ---");

        let outcome = announcer.announce(dec(2)).await.unwrap();
        assert!(matches!(outcome, AnnounceOutcome::Posted(_)));
    }

    #[tokio::test]
    async fn nothing_to_post_after_last_day() {
        let (platform, puzzles, announcer) = setup();
        assert_eq!(announcer.announce(dec(26)).await.unwrap(), AnnounceOutcome::NoPuzzle);
        assert!(platform.posts().is_empty());
        assert_eq!(puzzles.calls(), 0);
    }
}
