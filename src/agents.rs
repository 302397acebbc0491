//! Simple built-in agent policies, mostly for tests and harnesses.

use std::collections::VecDeque;

use crate::agent::{Agent, TeamMessage};
use crate::observation::Observation;
use crate::rng::SplitMix64;
use crate::types::Move;

/// Never does anything.
#[derive(Debug, Default)]
pub struct LazyAgent;

impl Agent for LazyAgent {
    fn act(&mut self, _obs: &Observation) -> Move {
        Move::Idle
    }
}

/// Picks uniformly among all six moves.
#[derive(Debug)]
pub struct RandomAgent {
    rng: SplitMix64,
}

impl RandomAgent {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SplitMix64::new(seed),
        }
    }
}

impl Agent for RandomAgent {
    fn act(&mut self, _obs: &Observation) -> Move {
        Move::from_index(self.rng.next_below(Move::ALL.len() as u64) as i32).unwrap_or(Move::Idle)
    }
}

/// Random walker that never plants bombs.
#[derive(Debug)]
pub struct HarmlessAgent {
    rng: SplitMix64,
}

impl HarmlessAgent {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SplitMix64::new(seed),
        }
    }
}

impl Agent for HarmlessAgent {
    fn act(&mut self, _obs: &Observation) -> Move {
        // everything except Bomb
        Move::from_index(self.rng.next_below(5) as i32).unwrap_or(Move::Idle)
    }
}

/// Replays a fixed list of moves, idling once it runs out.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    moves: VecDeque<Move>,
    outgoing: Option<TeamMessage>,
    pub incoming: Vec<TeamMessage>,
}

impl ScriptedAgent {
    pub fn new(moves: impl IntoIterator<Item = Move>) -> Self {
        Self {
            moves: moves.into_iter().collect(),
            outgoing: None,
            incoming: Vec::new(),
        }
    }

    /// Queues a message for the teammate.
    pub fn send(&mut self, message: TeamMessage) {
        self.outgoing = Some(message);
    }
}

impl Agent for ScriptedAgent {
    fn act(&mut self, _obs: &Observation) -> Move {
        self.moves.pop_front().unwrap_or(Move::Idle)
    }

    fn reset(&mut self) {
        self.moves.clear();
        self.outgoing = None;
        self.incoming.clear();
    }

    fn take_outgoing(&mut self) -> Option<TeamMessage> {
        self.outgoing.take()
    }

    fn deliver_incoming(&mut self, message: TeamMessage) {
        self.incoming.push(message);
    }
}
