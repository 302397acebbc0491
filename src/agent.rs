//! The agent interface and TeamRadio messages.

use serde::{Deserialize, Serialize};

use crate::observation::Observation;
use crate::types::Move;

/// A message between teammates in TeamRadio mode: two words, each in
/// `0..=7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMessage {
    pub words: [i32; 2],
}

impl TeamMessage {
    pub fn new(word0: i32, word1: i32) -> TeamMessage {
        TeamMessage {
            words: [word0, word1],
        }
    }

    /// Whether both words are inside the allowed range.
    pub fn is_valid(&self) -> bool {
        self.words.iter().all(|&w| (0..=7).contains(&w))
    }
}

impl std::fmt::Display for TeamMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.words[0], self.words[1])
    }
}

/// The behaviour of one agent.
///
/// Per tick the environment builds an observation, calls [`Agent::act`] and
/// feeds the returned move into the step. In TeamRadio mode, at most one
/// outgoing message is collected after acting and delivered to the teammate
/// at the start of the next tick.
pub trait Agent: Send {
    /// For a given observation, return a move.
    fn act(&mut self, obs: &Observation) -> Move;

    /// Reset the agent for a new episode.
    fn reset(&mut self) {}

    /// TeamRadio: hand over this tick's outgoing message, if any.
    fn take_outgoing(&mut self) -> Option<TeamMessage> {
        None
    }

    /// TeamRadio: receive the teammate's message from the previous tick.
    fn deliver_incoming(&mut self, _message: TeamMessage) {}
}
