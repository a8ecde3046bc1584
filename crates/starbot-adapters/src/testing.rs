//! In-memory doubles for the external collaborators.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use starbot_core::LeaderboardSnapshot;
use starbot_storage::HttpError;
use tokio::sync::watch;

use crate::aoc::{FetchError, LeaderboardSource, Puzzle, PuzzleSource};
use crate::platform::{
    ForumPost, GuildInfo, Member, MemberEdit, NickChange, Platform, PlatformError, Presence,
};

pub fn member(id: u64, username: &str, nick: Option<&str>, top_role_position: i64) -> Member {
    Member {
        id,
        username: username.to_string(),
        global_name: None,
        nick: nick.map(str::to_string),
        roles: Vec::new(),
        top_role_position,
    }
}

/// Roster held in memory. Edits are applied to the stored members and
/// recorded so tests can count platform calls.
pub struct MemoryPlatform {
    guild: GuildInfo,
    members: Mutex<BTreeMap<u64, Member>>,
    edits: Mutex<Vec<(u64, MemberEdit)>>,
    failing: Mutex<HashSet<u64>>,
    threads: Mutex<Vec<(u64, String)>>,
    posts: Mutex<Vec<(u64, ForumPost)>>,
    ready_calls: AtomicUsize,
    ready: watch::Sender<bool>,
    online: AtomicBool,
}

impl MemoryPlatform {
    pub fn new(guild: GuildInfo) -> Self {
        Self {
            guild,
            members: Mutex::new(BTreeMap::new()),
            edits: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            threads: Mutex::new(Vec::new()),
            posts: Mutex::new(Vec::new()),
            ready_calls: AtomicUsize::new(0),
            ready: watch::Sender::new(true),
            online: AtomicBool::new(false),
        }
    }

    pub fn with_members(guild: GuildInfo, members: impl IntoIterator<Item = Member>) -> Self {
        let platform = Self::new(guild);
        for m in members {
            platform.insert_member(m);
        }
        platform
    }

    pub fn insert_member(&self, member: Member) {
        self.members.lock().insert(member.id, member);
    }

    pub fn snapshot_member(&self, user_id: u64) -> Option<Member> {
        self.members.lock().get(&user_id).cloned()
    }

    pub fn edits(&self) -> Vec<(u64, MemberEdit)> {
        self.edits.lock().clone()
    }

    pub fn clear_edits(&self) {
        self.edits.lock().clear();
    }

    /// Make every edit of this member fail with a 403.
    pub fn fail_edits_for(&self, user_id: u64) {
        self.failing.lock().insert(user_id);
    }

    pub fn add_thread(&self, channel_id: u64, name: &str) {
        self.threads.lock().push((channel_id, name.to_string()));
    }

    pub fn posts(&self) -> Vec<(u64, ForumPost)> {
        self.posts.lock().clone()
    }

    pub fn ready_calls(&self) -> usize {
        self.ready_calls.load(Ordering::SeqCst)
    }

    /// Block `wait_until_ready` until [`MemoryPlatform::release_readiness`].
    pub fn hold_readiness(&self) {
        self.ready.send_replace(false);
    }

    pub fn release_readiness(&self) {
        self.ready.send_replace(true);
    }
}

#[async_trait]
impl Platform for MemoryPlatform {
    async fn wait_until_ready(&self) -> Result<(), PlatformError> {
        self.ready_calls.fetch_add(1, Ordering::SeqCst);
        let mut ready = self.ready.subscribe();
        ready
            .wait_for(|ready| *ready)
            .await
            .map_err(|_| PlatformError::Message("readiness gate dropped".into()))?;
        Ok(())
    }

    async fn guild(&self) -> Result<GuildInfo, PlatformError> {
        Ok(self.guild)
    }

    async fn member(&self, user_id: u64) -> Result<Option<Member>, PlatformError> {
        Ok(self.snapshot_member(user_id))
    }

    async fn members(&self) -> Result<Vec<Member>, PlatformError> {
        Ok(self.members.lock().values().cloned().collect())
    }

    async fn edit_member(&self, user_id: u64, edit: &MemberEdit) -> Result<(), PlatformError> {
        if self.failing.lock().contains(&user_id) {
            return Err(PlatformError::Status {
                status: 403,
                path: format!("/members/{user_id}"),
                body: "Missing Permissions".into(),
            });
        }
        let mut members = self.members.lock();
        let member = members.get_mut(&user_id).ok_or_else(|| PlatformError::Status {
            status: 404,
            path: format!("/members/{user_id}"),
            body: "Unknown Member".into(),
        })?;
        match &edit.nick {
            Some(NickChange::Set(nick)) => member.nick = Some(nick.clone()),
            Some(NickChange::Reset) => member.nick = None,
            None => {}
        }
        if let Some(roles) = &edit.roles {
            member.roles = roles.clone();
        }
        self.edits.lock().push((user_id, edit.clone()));
        Ok(())
    }

    async fn set_presence(&self, presence: Presence) -> Result<(), PlatformError> {
        self.online.store(presence == Presence::Online, Ordering::SeqCst);
        Ok(())
    }

    fn presence(&self) -> Presence {
        if self.online.load(Ordering::SeqCst) {
            Presence::Online
        } else {
            Presence::Offline
        }
    }

    async fn active_thread_names(&self, channel_id: u64) -> Result<Vec<String>, PlatformError> {
        Ok(self
            .threads
            .lock()
            .iter()
            .filter(|(c, _)| *c == channel_id)
            .map(|(_, name)| name.clone())
            .collect())
    }

    async fn create_forum_post(&self, channel_id: u64, post: &ForumPost) -> Result<(), PlatformError> {
        self.threads.lock().push((channel_id, post.name.clone()));
        self.posts.lock().push((channel_id, post.clone()));
        Ok(())
    }
}

/// Leaderboard source whose next result is set by the test.
pub struct ScriptedLeaderboard {
    next: Mutex<Option<LeaderboardSnapshot>>,
    calls: AtomicUsize,
}

impl ScriptedLeaderboard {
    pub fn returning(snapshot: LeaderboardSnapshot) -> Self {
        Self {
            next: Mutex::new(Some(snapshot)),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            next: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, snapshot: Option<LeaderboardSnapshot>) {
        *self.next.lock() = snapshot;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeaderboardSource for ScriptedLeaderboard {
    async fn fetch_leaderboard(&self) -> Result<LeaderboardSnapshot, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.next.lock().clone().ok_or_else(|| {
            FetchError::Transport(HttpError::HttpStatus {
                status: 503,
                url: "scripted://leaderboard".into(),
            })
        })
    }
}

/// Puzzle source answering every day with a fixed title.
pub struct StaticPuzzles {
    pub title: String,
    calls: AtomicUsize,
}

impl StaticPuzzles {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PuzzleSource for StaticPuzzles {
    async fn fetch_puzzle(&self, year: i32, day: u32) -> Result<Puzzle, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Puzzle {
            year,
            day,
            title: self.title.clone(),
            url: format!("https://adventofcode.com/{year}/day/{day}"),
        })
    }
}
