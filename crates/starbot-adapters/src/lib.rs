//! External collaborators: the Advent of Code site and the chat platform.

pub mod aoc;
pub mod discord;
pub mod platform;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use aoc::{
    leaderboard_url, parse_leaderboard, parse_puzzle_title, puzzle_url, AocClient, AocConfig,
    FetchError, LeaderboardSource, Puzzle, PuzzleSource,
};
pub use discord::{DiscordConfig, DiscordRest};
pub use platform::{
    ForumPost, GuildInfo, Member, MemberEdit, NickChange, Platform, PlatformError, Presence,
};

pub const CRATE_NAME: &str = "starbot-adapters";
