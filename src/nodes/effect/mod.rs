mod passthrough;
mod splitter;

pub use passthrough::Passthrough;
pub use splitter::Splitter;
