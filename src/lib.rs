//! Deterministic fixed-tick simulator for a four-player grid bomb combat
//! game, with per-agent partial observations and state reconstruction
//! heuristics for search and training rollouts.

pub mod agent;
pub mod agents;
pub mod board;
pub mod bomb;
pub mod bridge;
pub mod environment;
pub mod observation;
pub mod queue;
pub mod rng;
pub mod state;
pub mod step;
pub mod types;

pub use agent::{Agent, TeamMessage};
pub use agents::{HarmlessAgent, LazyAgent, RandomAgent, ScriptedAgent};
pub use board::{AgentInfo, Board};
pub use bomb::{Bomb, Flame};
pub use bridge::{
    direction_from_code, game_mode_from_code, item_from_code, message_from_json, message_to_json,
    observation_from_json, state_from_json, BridgeError, BridgeSession,
};
pub use environment::Environment;
pub use observation::{ItemAgeGrid, Observation};
pub use queue::FixedQueue;
pub use rng::SplitMix64;
pub use state::{BoardGeneration, State};
pub use step::step;
pub use types::{
    AgentInfoVisibility, Cell, Direction, GameMode, Move, ObservationParameters, Position,
    AGENT_COUNT, BOARD_SIZE, BOMB_DEFAULT_STRENGTH, BOMB_LIFETIME, FLAME_LIFETIME, MAX_BOMBS,
    MAX_BOMBS_PER_AGENT,
};

#[cfg(test)]
mod tests;
