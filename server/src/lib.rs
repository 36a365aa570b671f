pub mod config;
pub mod db;
pub mod error;
pub mod http_server;
pub mod leaderboard_cache;
pub mod leaderboard_server;
pub mod player_connections;
pub mod retry;
pub mod sync_server;
pub mod ws_server;
