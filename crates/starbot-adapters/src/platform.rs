//! Chat-platform roster contract consumed by the sync engine.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: u64,
    pub username: String,
    pub global_name: Option<String>,
    pub nick: Option<String>,
    pub roles: Vec<u64>,
    /// Position of the member's highest role; `0` is the implicit base role.
    pub top_role_position: i64,
}

impl Member {
    /// Name shown in the community: nickname, then global name, then username.
    pub fn display_name(&self) -> &str {
        self.nick
            .as_deref()
            .or(self.global_name.as_deref())
            .unwrap_or(&self.username)
    }

    pub fn has_role(&self, role_id: u64) -> bool {
        self.roles.contains(&role_id)
    }
}

/// Facts about the community needed for the permission boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuildInfo {
    pub owner_id: u64,
    pub bot_top_role_position: i64,
}

impl GuildInfo {
    /// The bot cannot touch the owner or anyone ranked at or above itself.
    pub fn can_modify(&self, member: &Member) -> bool {
        member.id != self.owner_id && member.top_role_position < self.bot_top_role_position
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NickChange {
    Set(String),
    /// Drop the nickname so the account name shows through.
    Reset,
}

/// One combined member update; `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberEdit {
    pub nick: Option<NickChange>,
    pub roles: Option<Vec<u64>>,
}

impl MemberEdit {
    pub fn is_empty(&self) -> bool {
        self.nick.is_none() && self.roles.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForumPost {
    pub name: String,
    pub content: String,
    /// Role allowed to be pinged by the post.
    pub mention_role: Option<u64>,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform returned {status} for {path}: {body}")]
    Status {
        status: u16,
        path: String,
        body: String,
    },
    #[error("could not decode platform response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid snowflake id {0:?}")]
    InvalidId(String),
    #[error("{0}")]
    Message(String),
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// Resolves once the connection is usable.
    async fn wait_until_ready(&self) -> Result<(), PlatformError>;

    async fn guild(&self) -> Result<GuildInfo, PlatformError>;

    async fn member(&self, user_id: u64) -> Result<Option<Member>, PlatformError>;

    /// The complete roster; never a partially loaded member cache.
    async fn members(&self) -> Result<Vec<Member>, PlatformError>;

    async fn edit_member(&self, user_id: u64, edit: &MemberEdit) -> Result<(), PlatformError>;

    /// Record the presence the bot should show. Implementations without a
    /// live session only store it; [`Platform::presence`] reads it back.
    async fn set_presence(&self, presence: Presence) -> Result<(), PlatformError>;

    /// Last presence passed to [`Platform::set_presence`].
    fn presence(&self) -> Presence;

    async fn active_thread_names(&self, channel_id: u64) -> Result<Vec<String>, PlatformError>;

    async fn create_forum_post(&self, channel_id: u64, post: &ForumPost) -> Result<(), PlatformError>;

    fn role_mention(&self, role_id: u64) -> String {
        format!("<@&{role_id}>")
    }

    fn user_mention(&self, user_id: u64) -> String {
        format!("<@{user_id}>")
    }
}
