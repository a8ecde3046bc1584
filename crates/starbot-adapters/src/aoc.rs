//! Advent of Code private leaderboard + puzzle page client.

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use secrecy::SecretString;
use starbot_core::LeaderboardSnapshot;
use starbot_storage::{HttpError, HttpFetcher};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(#[from] HttpError),
    #[error("unparseable response from {url}: {reason}")]
    ParseError { url: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Puzzle {
    pub year: i32,
    pub day: u32,
    pub title: String,
    pub url: String,
}

#[async_trait]
pub trait LeaderboardSource: Send + Sync {
    /// Fetch and decode the current leaderboard. Never touches stored state.
    async fn fetch_leaderboard(&self) -> Result<LeaderboardSnapshot, FetchError>;
}

#[async_trait]
pub trait PuzzleSource: Send + Sync {
    async fn fetch_puzzle(&self, year: i32, day: u32) -> Result<Puzzle, FetchError>;
}

#[derive(Debug, Clone)]
pub struct AocConfig {
    pub base_url: String,
    pub leaderboard_id: String,
    pub session: SecretString,
    /// Pin the event year instead of following the wall clock.
    pub year: Option<i32>,
}

pub fn leaderboard_url(base_url: &str, year: i32, leaderboard_id: &str) -> String {
    format!(
        "{}/{year}/leaderboard/private/view/{leaderboard_id}.json",
        base_url.trim_end_matches('/')
    )
}

pub fn puzzle_url(base_url: &str, year: i32, day: u32) -> String {
    format!("{}/{year}/day/{day}", base_url.trim_end_matches('/'))
}

pub fn parse_leaderboard(url: &str, body: &[u8]) -> Result<LeaderboardSnapshot, FetchError> {
    LeaderboardSnapshot::from_json(body).map_err(|err| FetchError::ParseError {
        url: url.to_string(),
        reason: err.to_string(),
    })
}

// Title text never spans tags or lines.
static HEADING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"--- Day [0-9]+: ([^<>\n]+?) ---").expect("heading pattern is valid")
});

/// Pull `<Title>` out of the first well-formed `--- Day N: <Title> ---`.
fn title_from_heading(text: &str) -> Option<String> {
    HEADING_RE.captures_iter(text).find_map(|caps| {
        let title = caps.get(1)?.as_str().trim();
        (!title.is_empty()).then(|| title.to_string())
    })
}

pub fn parse_puzzle_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let headings = Selector::parse("article.day-desc h2, h2").ok()?;
    document
        .select(&headings)
        .find_map(|node| title_from_heading(&node.text().collect::<String>()))
        .or_else(|| title_from_heading(html))
}

#[derive(Debug, Clone)]
pub struct AocClient {
    http: HttpFetcher,
    config: AocConfig,
}

impl AocClient {
    pub fn new(http: HttpFetcher, config: AocConfig) -> Self {
        Self { http, config }
    }

    pub fn year(&self) -> i32 {
        self.config.year.unwrap_or_else(|| Utc::now().year())
    }

    pub fn leaderboard_url(&self) -> String {
        leaderboard_url(&self.config.base_url, self.year(), &self.config.leaderboard_id)
    }
}

#[async_trait]
impl LeaderboardSource for AocClient {
    async fn fetch_leaderboard(&self) -> Result<LeaderboardSnapshot, FetchError> {
        let url = self.leaderboard_url();
        let resp = self.http.fetch_bytes(&url, Some(&self.config.session)).await?;
        debug!(bytes = resp.body.len(), "leaderboard payload received");
        parse_leaderboard(&resp.final_url, &resp.body)
    }
}

#[async_trait]
impl PuzzleSource for AocClient {
    async fn fetch_puzzle(&self, year: i32, day: u32) -> Result<Puzzle, FetchError> {
        let url = puzzle_url(&self.config.base_url, year, day);
        let resp = self.http.fetch_bytes(&url, Some(&self.config.session)).await?;
        let html = String::from_utf8_lossy(&resp.body);
        let title = parse_puzzle_title(&html).ok_or_else(|| FetchError::ParseError {
            url: resp.final_url.clone(),
            reason: "no `--- Day N: <title> ---` heading".to_string(),
        })?;
        Ok(Puzzle {
            year,
            day,
            title,
            url: resp.final_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use starbot_storage::{BackoffPolicy, HttpClientConfig};

    const LEADERBOARD: &str = include_str!("../../../fixtures/leaderboard.json");
    const PUZZLE: &str = include_str!("../../../fixtures/puzzle_day.html");

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(base_url: String) -> AocClient {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(5),
            user_agent: None,
            backoff: BackoffPolicy {
                max_retries: 1,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        })
        .unwrap();
        AocClient::new(
            http,
            AocConfig {
                base_url,
                leaderboard_id: "123456".into(),
                session: SecretString::from("cookie-value".to_string()),
                year: Some(2024),
            },
        )
    }

    fn aoc_app() -> Router {
        Router::new()
            .route(
                "/2024/leaderboard/private/view/{file}",
                get(|headers: HeaderMap| async move {
                    let authed = headers
                        .get("cookie")
                        .and_then(|v| v.to_str().ok())
                        .is_some_and(|v| v == "session=cookie-value");
                    if authed {
                        (StatusCode::OK, LEADERBOARD.to_string())
                    } else {
                        (StatusCode::OK, "<html>log in</html>".to_string())
                    }
                }),
            )
            .route("/2024/day/3", get(|| async { PUZZLE }))
            .route("/2024/day/4", get(|| async { "<html><h2>Soon</h2></html>" }))
    }

    #[test]
    fn urls_follow_site_layout() {
        assert_eq!(
            leaderboard_url("https://adventofcode.com/", 2024, "42"),
            "https://adventofcode.com/2024/leaderboard/private/view/42.json"
        );
        assert_eq!(
            puzzle_url("https://adventofcode.com", 2024, 9),
            "https://adventofcode.com/2024/day/9"
        );
    }

    #[test]
    fn puzzle_title_comes_from_day_heading() {
        assert_eq!(parse_puzzle_title(PUZZLE).as_deref(), Some("Mull It Over"));
        assert_eq!(
            parse_puzzle_title("<p>--- Day 12: Garden Groups ---</p>").as_deref(),
            Some("Garden Groups")
        );
        assert_eq!(parse_puzzle_title("<h2>--- Day x: Nope ---</h2>"), None);
        assert_eq!(parse_puzzle_title("<h2>Not yet</h2>"), None);
        assert_eq!(
            parse_puzzle_title("<p>--- Day x: Nope ---</p><p>--- Day 2: Red-Nosed Reports ---</p>")
                .as_deref(),
            Some("Red-Nosed Reports")
        );
        assert_eq!(
            parse_puzzle_title("<p>--- Day 1:  ---</p><p>--- Day 3: Mull It Over ---</p>")
                .as_deref(),
            Some("Mull It Over")
        );
    }

    #[tokio::test]
    async fn fetches_leaderboard_with_session_cookie() {
        let base = serve(aoc_app()).await;
        let snapshot = client(base).fetch_leaderboard().await.unwrap();
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.stars_for(1_000_002), 9);
    }

    #[tokio::test]
    async fn login_page_instead_of_json_is_a_parse_error() {
        let base = serve(aoc_app()).await;
        let mut aoc = client(base);
        aoc.config.session = SecretString::from("expired".to_string());
        let err = aoc.fetch_leaderboard().await.unwrap_err();
        assert!(matches!(err, FetchError::ParseError { .. }));
    }

    #[tokio::test]
    async fn server_errors_are_transport_failures() {
        let app = Router::new().route(
            "/2024/leaderboard/private/view/{file}",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "down") }),
        );
        let base = serve(app).await;
        let err = client(base).fetch_leaderboard().await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Transport(HttpError::HttpStatus { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn fetches_puzzle_title() {
        let base = serve(aoc_app()).await;
        let aoc = client(base.clone());
        let puzzle = aoc.fetch_puzzle(2024, 3).await.unwrap();
        assert_eq!(puzzle.title, "Mull It Over");
        assert_eq!(puzzle.url, format!("{base}/2024/day/3"));

        let err = aoc.fetch_puzzle(2024, 4).await.unwrap_err();
        assert!(matches!(err, FetchError::ParseError { .. }));
    }
}
