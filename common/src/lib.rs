mod player_score;
mod protocol;

pub use player_score::*;
pub use protocol::*;
