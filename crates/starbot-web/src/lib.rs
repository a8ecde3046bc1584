//! Axum interactions endpoint and health check for starbot.

mod signature;

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use starbot_sync::{CommandError, CommandOutcome, CommandSurface, LeaderboardPage, Reply, SyncEngine};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

pub use signature::{InteractionVerifier, SignatureError};

pub const CRATE_NAME: &str = "starbot-web";

const SIGNATURE_HEADER: &str = "x-signature-ed25519";
const TIMESTAMP_HEADER: &str = "x-signature-timestamp";
const LEADERBOARD_COMPONENT: &str = "leaderboard:";

const PING: u8 = 1;
const APPLICATION_COMMAND: u8 = 2;
const MESSAGE_COMPONENT: u8 = 3;

const PONG: u8 = 1;
const CHANNEL_MESSAGE: u8 = 4;
const UPDATE_MESSAGE: u8 = 7;
const EPHEMERAL_FLAG: u64 = 1 << 6;

#[derive(Clone)]
pub struct AppState {
    pub commands: Arc<CommandSurface>,
    pub engine: Arc<SyncEngine>,
    pub verifier: Arc<InteractionVerifier>,
}

impl AppState {
    pub fn new(
        commands: Arc<CommandSurface>,
        engine: Arc<SyncEngine>,
        verifier: InteractionVerifier,
    ) -> Self {
        Self {
            commands,
            engine,
            verifier: Arc::new(verifier),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Interaction {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    data: Option<InteractionData>,
    #[serde(default)]
    member: Option<InteractionMember>,
    #[serde(default)]
    user: Option<InteractionUser>,
}

#[derive(Debug, Deserialize)]
struct InteractionData {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    options: Vec<CommandOption>,
    #[serde(default)]
    custom_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CommandOption {
    name: String,
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct InteractionMember {
    user: InteractionUser,
}

#[derive(Debug, Deserialize)]
struct InteractionUser {
    id: String,
}

impl Interaction {
    /// Invoking user: guild member if sent from the community, else the DM user.
    fn invoker(&self) -> Option<u64> {
        self.member
            .as_ref()
            .map(|m| &m.user)
            .or(self.user.as_ref())
            .and_then(|u| u.id.parse().ok())
    }

    fn option_u64(&self, name: &str) -> Option<u64> {
        let value = self
            .data
            .as_ref()?
            .options
            .iter()
            .find(|o| o.name == name)?
            .value
            .as_ref()?;
        value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
    }
}

#[derive(Debug, thiserror::Error)]
enum InteractionError {
    #[error("bad interaction: {0}")]
    BadRequest(&'static str),
    #[error(transparent)]
    Command(#[from] CommandError),
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/interactions", post(interactions_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving interactions endpoint");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> Response {
    Json(state.engine.status()).into_response()
}

async fn interactions_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(signature), Some(timestamp)) = (header(SIGNATURE_HEADER), header(TIMESTAMP_HEADER))
    else {
        return (StatusCode::UNAUTHORIZED, "missing request signature").into_response();
    };
    if let Err(err) = state.verifier.verify(timestamp, &body, signature) {
        debug!(error = %err, "rejected interaction");
        return (StatusCode::UNAUTHORIZED, "invalid request signature").into_response();
    }

    let interaction: Interaction = match serde_json::from_slice(&body) {
        Ok(interaction) => interaction,
        Err(err) => {
            debug!(error = %err, "undecodable interaction");
            return (StatusCode::BAD_REQUEST, "malformed interaction").into_response();
        }
    };

    match dispatch(&state, &interaction).await {
        Ok(payload) => Json(payload).into_response(),
        Err(InteractionError::BadRequest(reason)) => {
            (StatusCode::BAD_REQUEST, reason).into_response()
        }
        Err(err) => {
            error!(error = %err, "interaction failed");
            Json(message(&Reply {
                content: "Something went wrong while handling that command.".to_string(),
                ephemeral: true,
            }))
            .into_response()
        }
    }
}

async fn dispatch(state: &AppState, interaction: &Interaction) -> Result<Value, InteractionError> {
    match interaction.kind {
        PING => Ok(json!({ "type": PONG })),
        APPLICATION_COMMAND => {
            let name = interaction
                .data
                .as_ref()
                .and_then(|d| d.name.as_deref())
                .ok_or(InteractionError::BadRequest("command without name"))?;
            let invoker = interaction
                .invoker()
                .ok_or(InteractionError::BadRequest("command without user"))?;
            match name {
                "link" => {
                    let outcome = state
                        .commands
                        .link(invoker, interaction.option_u64("user_id"))
                        .await?;
                    Ok(reply_and_follow_up(state, outcome))
                }
                "unlink" => {
                    let outcome = state.commands.unlink(invoker).await?;
                    Ok(reply_and_follow_up(state, outcome))
                }
                "leaderboard" => {
                    let page = state.commands.leaderboard(0).await?;
                    Ok(leaderboard_message(CHANNEL_MESSAGE, &page))
                }
                _ => Ok(message(&Reply {
                    content: "Unknown command.".to_string(),
                    ephemeral: true,
                })),
            }
        }
        MESSAGE_COMPONENT => {
            let page = interaction
                .data
                .as_ref()
                .and_then(|d| d.custom_id.as_deref())
                .and_then(|id| id.strip_prefix(LEADERBOARD_COMPONENT))
                .and_then(|page| page.parse::<usize>().ok())
                .ok_or(InteractionError::BadRequest("unknown component"))?;
            let page = state.commands.leaderboard_page(page).await?;
            Ok(leaderboard_message(UPDATE_MESSAGE, &page))
        }
        _ => Err(InteractionError::BadRequest("unsupported interaction type")),
    }
}

/// Reply now; the member reconcile runs after the response is on its way.
fn reply_and_follow_up(state: &AppState, outcome: CommandOutcome) -> Value {
    let payload = message(&outcome.reply);
    if outcome.reconcile_user.is_some() {
        let commands = state.commands.clone();
        tokio::spawn(async move {
            commands.follow_up(&outcome).await;
        });
    }
    payload
}

fn message(reply: &Reply) -> Value {
    json!({
        "type": CHANNEL_MESSAGE,
        "data": {
            "content": reply.content,
            "flags": if reply.ephemeral { EPHEMERAL_FLAG } else { 0 },
            "allowed_mentions": { "parse": [] },
        },
    })
}

fn leaderboard_message(kind: u8, page: &LeaderboardPage) -> Value {
    json!({
        "type": kind,
        "data": {
            "content": page.content,
            "allowed_mentions": { "parse": [] },
            "components": pager(page),
        },
    })
}

fn pager(page: &LeaderboardPage) -> Value {
    if page.pages <= 1 {
        return json!([]);
    }
    let button = |label: &str, target: usize, disabled: bool| {
        json!({
            "type": 2,
            "style": 2,
            "label": label,
            "custom_id": format!("{LEADERBOARD_COMPONENT}{target}"),
            "disabled": disabled,
        })
    };
    json!([{
        "type": 1,
        "components": [
            button("◀", page.page.saturating_sub(1), page.page == 0),
            button("▶", page.page + 1, page.page + 1 >= page.pages),
        ],
    }])
}
