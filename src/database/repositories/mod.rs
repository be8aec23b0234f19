pub mod score_state;

pub use score_state::{ScoreStateRepository, ScoreStateRow};
