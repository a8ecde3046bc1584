//! Discord HTTP API (v10) implementation of [`Platform`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use starbot_storage::BackoffPolicy;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::platform::{
    ForumPost, GuildInfo, Member, MemberEdit, NickChange, Platform, PlatformError, Presence,
};

const MEMBER_PAGE_SIZE: usize = 1000;
const THREAD_NAME_MAX_CHARS: usize = 100;
const MAX_RATE_LIMIT_WAIT: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub api_base: String,
    pub token: SecretString,
    pub guild_id: u64,
    pub user_agent: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
}

#[derive(Debug, Deserialize)]
struct WireUser {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMember {
    user: WireUser,
    #[serde(default)]
    nick: Option<String>,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct WireRole {
    id: String,
    position: i64,
}

#[derive(Debug, Deserialize)]
struct WireGuild {
    owner_id: String,
}

#[derive(Debug, Deserialize)]
struct WireThread {
    name: String,
    #[serde(default)]
    parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireActiveThreads {
    threads: Vec<WireThread>,
}

#[derive(Debug, Deserialize)]
struct RateLimited {
    retry_after: f64,
}

fn parse_snowflake(raw: &str) -> Result<u64, PlatformError> {
    raw.parse()
        .map_err(|_| PlatformError::InvalidId(raw.to_string()))
}

fn convert_member(
    wire: WireMember,
    role_positions: &HashMap<u64, i64>,
) -> Result<Member, PlatformError> {
    let roles = wire
        .roles
        .iter()
        .map(|r| parse_snowflake(r))
        .collect::<Result<Vec<_>, _>>()?;
    let top_role_position = roles
        .iter()
        .filter_map(|r| role_positions.get(r).copied())
        .max()
        .unwrap_or(0);
    Ok(Member {
        id: parse_snowflake(&wire.user.id)?,
        username: wire.user.username,
        global_name: wire.user.global_name,
        nick: wire.nick,
        roles,
        top_role_position,
    })
}

fn edit_body(edit: &MemberEdit) -> Value {
    let mut body = Map::new();
    match &edit.nick {
        Some(NickChange::Set(nick)) => {
            body.insert("nick".into(), Value::String(nick.clone()));
        }
        Some(NickChange::Reset) => {
            body.insert("nick".into(), Value::Null);
        }
        None => {}
    }
    if let Some(roles) = &edit.roles {
        body.insert(
            "roles".into(),
            Value::Array(roles.iter().map(|r| Value::String(r.to_string())).collect()),
        );
    }
    Value::Object(body)
}

fn forum_post_body(post: &ForumPost) -> Value {
    let name = post.name.chars().take(THREAD_NAME_MAX_CHARS).collect::<String>();
    let roles = post
        .mention_role
        .map(|r| vec![r.to_string()])
        .unwrap_or_default();
    json!({
        "name": name,
        "message": {
            "content": post.content,
            "allowed_mentions": { "parse": [], "roles": roles },
        },
    })
}

pub struct DiscordRest {
    client: reqwest::Client,
    config: DiscordConfig,
    bot_user_id: OnceCell<u64>,
    online: AtomicBool,
}

impl DiscordRest {
    pub fn new(config: DiscordConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("building discord client")?;
        Ok(Self {
            client,
            config,
            bot_user_id: OnceCell::new(),
            online: AtomicBool::new(false),
        })
    }

    fn guild_path(&self, rest: &str) -> String {
        format!("/guilds/{}{rest}", self.config.guild_id)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response, PlatformError> {
        let url = format!("{}{path}", self.config.api_base.trim_end_matches('/'));
        let backoff = self.config.backoff;
        let mut attempt = 0;
        loop {
            let mut request = self.client.request(method.clone(), &url).header(
                AUTHORIZATION,
                format!("Bot {}", self.config.token.expose_secret()),
            );
            if let Some(body) = body {
                request = request.json(body);
            }
            let resp = request.send().await?;
            let status = resp.status();
            let retry_left = attempt < backoff.max_retries;

            if status == StatusCode::TOO_MANY_REQUESTS && retry_left {
                let wait = resp
                    .json::<RateLimited>()
                    .await
                    .map(|r| r.retry_after)
                    .unwrap_or(1.0)
                    .clamp(0.0, MAX_RATE_LIMIT_WAIT);
                warn!(path, wait, "rate limited by platform");
                tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            } else if status.is_server_error() && retry_left {
                tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
            } else if status.is_success() {
                return Ok(resp);
            } else {
                let body = resp.text().await.unwrap_or_default();
                return Err(PlatformError::Status {
                    status: status.as_u16(),
                    path: path.to_string(),
                    body,
                });
            }
            attempt += 1;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PlatformError> {
        let bytes = self.send(Method::GET, path, None).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn bot_user_id(&self) -> Result<u64, PlatformError> {
        self.bot_user_id
            .get_or_try_init(|| async {
                let me: WireUser = self.get_json("/users/@me").await?;
                parse_snowflake(&me.id)
            })
            .await
            .copied()
    }

    async fn role_positions(&self) -> Result<HashMap<u64, i64>, PlatformError> {
        let roles: Vec<WireRole> = self.get_json(&self.guild_path("/roles")).await?;
        roles
            .into_iter()
            .map(|r| Ok((parse_snowflake(&r.id)?, r.position)))
            .collect()
    }

    async fn fetch_member(
        &self,
        user_id: u64,
        role_positions: &HashMap<u64, i64>,
    ) -> Result<Option<Member>, PlatformError> {
        match self
            .get_json::<WireMember>(&self.guild_path(&format!("/members/{user_id}")))
            .await
        {
            Ok(wire) => convert_member(wire, role_positions).map(Some),
            Err(PlatformError::Status { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl Platform for DiscordRest {
    async fn wait_until_ready(&self) -> Result<(), PlatformError> {
        let mut attempt = 0;
        loop {
            match self.bot_user_id().await {
                Ok(id) => {
                    info!(bot_user_id = id, guild_id = self.config.guild_id, "platform ready");
                    return Ok(());
                }
                Err(PlatformError::Status { status, .. }) if status == 401 || status == 403 => {
                    return Err(PlatformError::Message(format!(
                        "platform rejected bot token (status {status})"
                    )));
                }
                Err(err) => {
                    let delay = self.config.backoff.delay_for_attempt(attempt);
                    warn!(error = %err, ?delay, "platform not ready yet");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn guild(&self) -> Result<GuildInfo, PlatformError> {
        let guild: WireGuild = self.get_json(&self.guild_path("")).await?;
        let positions = self.role_positions().await?;
        let bot_id = self.bot_user_id().await?;
        let me = self
            .fetch_member(bot_id, &positions)
            .await?
            .ok_or_else(|| PlatformError::Message("bot is not a member of the guild".into()))?;
        Ok(GuildInfo {
            owner_id: parse_snowflake(&guild.owner_id)?,
            bot_top_role_position: me.top_role_position,
        })
    }

    async fn member(&self, user_id: u64) -> Result<Option<Member>, PlatformError> {
        let positions = self.role_positions().await?;
        self.fetch_member(user_id, &positions).await
    }

    async fn members(&self) -> Result<Vec<Member>, PlatformError> {
        let positions = self.role_positions().await?;
        let mut out = Vec::new();
        let mut after = 0u64;
        loop {
            let page: Vec<WireMember> = self
                .get_json(&self.guild_path(&format!(
                    "/members?limit={MEMBER_PAGE_SIZE}&after={after}"
                )))
                .await?;
            let page_len = page.len();
            for wire in page {
                let member = convert_member(wire, &positions)?;
                after = after.max(member.id);
                out.push(member);
            }
            if page_len < MEMBER_PAGE_SIZE {
                break;
            }
        }
        Ok(out)
    }

    async fn edit_member(&self, user_id: u64, edit: &MemberEdit) -> Result<(), PlatformError> {
        if edit.is_empty() {
            return Ok(());
        }
        self.send(
            Method::PATCH,
            &self.guild_path(&format!("/members/{user_id}")),
            Some(&edit_body(edit)),
        )
        .await?;
        Ok(())
    }

    /// REST cannot change presence; only a gateway session can. The desired
    /// state is stored for `/health` and nothing is sent.
    async fn set_presence(&self, presence: Presence) -> Result<(), PlatformError> {
        self.online
            .store(presence == Presence::Online, Ordering::SeqCst);
        info!(?presence, "desired presence recorded");
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
        let active: WireActiveThreads = self.get_json(&self.guild_path("/threads/active")).await?;
        let parent = channel_id.to_string();
        Ok(active
            .threads
            .into_iter()
            .filter(|t| t.parent_id.as_deref() == Some(parent.as_str()))
            .map(|t| t.name)
            .collect())
    }

    async fn create_forum_post(&self, channel_id: u64, post: &ForumPost) -> Result<(), PlatformError> {
        self.send(
            Method::POST,
            &format!("/channels/{channel_id}/threads"),
            Some(&forum_post_body(post)),
        )
        .await?;
        Ok(())
    }
}
