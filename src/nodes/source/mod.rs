mod player;
mod sine;

pub use player::{PlayerControl, PlayerMessage, PlayerStatus, SamplePlayer};
pub use sine::Sine;
