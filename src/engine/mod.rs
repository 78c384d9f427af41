// The authoritative simulation: map, spatial index, entities, the tick
// engine, and the gates around its input edge.

pub mod ai;
pub mod anticheat;
pub mod arbiter;
pub mod constants;
pub mod entities;
pub mod game;
pub mod map;
pub mod snapshot;
pub mod spatial;
pub mod validate;
