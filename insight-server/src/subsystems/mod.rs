pub mod analysis;
pub mod chart;
pub mod executor;
pub mod guard;
pub mod insight;
pub mod sqlgen;
