//! The game loop: move collection, message routing, rendering hooks.

use std::io::BufRead;

use crate::agent::{Agent, TeamMessage};
use crate::observation::Observation;
use crate::state::State;
use crate::types::{teammate_of, GameMode, Move, ObservationParameters, AGENT_COUNT};

/// Owns a game: the true state, the participating agents and their
/// observation buffers. Distributes observations, collects moves
/// (optionally on one thread per live agent) and routes TeamRadio messages.
pub struct Environment {
    state: State,
    agents: Vec<Box<dyn Agent>>,
    observations: [Observation; AGENT_COUNT],
    game_mode: GameMode,
    observation_parameters: ObservationParameters,
    has_started: bool,
    last_moves: [Move; AGENT_COUNT],
    has_acted: [bool; AGENT_COUNT],
    /// TeamRadio mailboxes: one slot per sender, delivered next tick.
    pending_messages: [Option<TeamMessage>; AGENT_COUNT],
    listener: Option<Box<dyn FnMut(&State) + Send>>,
}

impl Environment {
    pub fn new() -> Self {
        Self {
            state: State::new(),
            agents: Vec::new(),
            observations: Default::default(),
            game_mode: GameMode::FreeForAll,
            observation_parameters: ObservationParameters::default(),
            has_started: false,
            last_moves: [Move::Idle; AGENT_COUNT],
            has_acted: [false; AGENT_COUNT],
            pending_messages: [None; AGENT_COUNT],
            listener: None,
        }
    }

    /// Initializes a new game with the given agents and seeds.
    ///
    /// `agent_position_seed != -1` shuffles the start corners.
    pub fn make_game(
        &mut self,
        agents: [Box<dyn Agent>; AGENT_COUNT],
        game_mode: GameMode,
        board_seed: i64,
        agent_position_seed: i64,
    ) {
        if self.has_started {
            self.state = State::new();
        }
        self.game_mode = game_mode;
        self.state.init(game_mode, board_seed, agent_position_seed);

        self.agents = agents.into_iter().collect();
        for agent in self.agents.iter_mut() {
            agent.reset();
        }
        self.last_moves = [Move::Idle; AGENT_COUNT];
        self.has_acted = [false; AGENT_COUNT];
        self.pending_messages = [None; AGENT_COUNT];
        self.has_started = true;
    }

    /// Sets the parameters used to build every agent's observation.
    pub fn set_observation_parameters(&mut self, parameters: ObservationParameters) {
        self.observation_parameters = parameters;
    }

    /// Runs the game for `steps` steps, or until it is done for
    /// `steps <= 0`. Blocking.
    pub fn run_game(
        &mut self,
        steps: i32,
        async_moves: bool,
        render: bool,
        render_clear: bool,
        render_interactive: bool,
        render_wait_ms: u64,
    ) {
        let start = self.state.board.time_step;
        while !self.is_done() && (steps <= 0 || self.state.board.time_step - start < steps) {
            if render {
                self.print(render_clear);
                if render_interactive {
                    let mut line = String::new();
                    let _ = std::io::stdin().lock().read_line(&mut line);
                }
                if render_wait_ms > 0 {
                    std::thread::sleep(std::time::Duration::from_millis(render_wait_ms));
                }
            }
            self.step(async_moves);
        }

        if render {
            self.print(render_clear);
            println!("{}", self.game_result_summary());
        }
    }

    /// Executes one environment step: routes messages, collects moves and
    /// advances the state.
    pub fn step(&mut self, async_moves: bool) {
        if !self.has_started || self.is_done() {
            return;
        }

        if self.game_mode == GameMode::TeamRadio {
            self.deliver_pending_messages();
        }

        // each agent acts on its own observation buffer
        for i in 0..AGENT_COUNT {
            if !self.state.board.agents[i].dead {
                self.observations[i] =
                    Observation::get(&self.state, i, self.observation_parameters);
            }
        }

        let mut moves = [Move::Idle; AGENT_COUNT];
        if async_moves {
            let state = &self.state;
            let observations = &self.observations;
            std::thread::scope(|scope| {
                for (i, (agent, slot)) in
                    self.agents.iter_mut().zip(moves.iter_mut()).enumerate()
                {
                    if state.board.agents[i].dead {
                        continue;
                    }
                    let obs = &observations[i];
                    scope.spawn(move || {
                        *slot = agent.act(obs);
                    });
                }
            });
            for i in 0..AGENT_COUNT {
                self.has_acted[i] = !self.state.board.agents[i].dead;
                if self.has_acted[i] {
                    self.last_moves[i] = moves[i];
                }
            }
        } else {
            for i in 0..AGENT_COUNT {
                if self.state.board.agents[i].dead {
                    self.has_acted[i] = false;
                    continue;
                }
                moves[i] = self.agents[i].act(&self.observations[i]);
                self.last_moves[i] = moves[i];
                self.has_acted[i] = true;
            }
        }

        if self.game_mode == GameMode::TeamRadio {
            self.collect_outgoing_messages();
        }

        self.state.step(&moves);

        if let Some(listener) = self.listener.as_mut() {
            listener(&self.state);
        }
    }

    fn deliver_pending_messages(&mut self) {
        for sender in 0..AGENT_COUNT {
            let Some(message) = self.pending_messages[sender].take() else {
                continue;
            };
            let receiver = teammate_of(sender);
            if !self.state.board.agents[receiver].dead {
                self.agents[receiver].deliver_incoming(message);
            }
        }
    }

    fn collect_outgoing_messages(&mut self) {
        for i in 0..AGENT_COUNT {
            if self.state.board.agents[i].dead {
                continue;
            }
            if let Some(message) = self.agents[i].take_outgoing() {
                if message.is_valid() {
                    self.pending_messages[i] = Some(message);
                } else {
                    log::warn!("agent {} sent invalid message {}, dropped", i, message);
                }
            }
        }
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn game_mode(&self) -> GameMode {
        self.game_mode
    }

    /// Updates and returns the observation of the given agent.
    pub fn observation(&mut self, agent_id: usize) -> &Observation {
        self.observations[agent_id] =
            Observation::get(&self.state, agent_id, self.observation_parameters);
        &self.observations[agent_id]
    }

    /// True if the last step ended the game.
    pub fn is_done(&self) -> bool {
        self.state.finished
    }

    pub fn is_draw(&self) -> bool {
        self.state.is_draw
    }

    /// The single winning agent, -1 if there is none (or a team won).
    pub fn winning_agent(&self) -> i32 {
        self.state.winning_agent
    }

    /// The winning team, 0 if no team won.
    pub fn winning_team(&self) -> i32 {
        self.state.winning_team
    }

    /// The last move of the given agent. Stale for dead agents; combine
    /// with [`Environment::has_acted`].
    pub fn last_move(&self, agent_id: usize) -> Move {
        self.last_moves[agent_id]
    }

    /// Whether the agent acted in the last step.
    pub fn has_acted(&self, agent_id: usize) -> bool {
        self.has_acted[agent_id]
    }

    /// Invoked after every step with the new state.
    pub fn set_step_listener(&mut self, listener: impl FnMut(&State) + Send + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn print(&self, clear: bool) {
        println!("Step {}", self.state.board.time_step);
        self.state.print(clear);
    }

    /// A one-line description of the game result.
    pub fn game_result_summary(&self) -> String {
        if !self.is_done() {
            return "Not done!".to_string();
        }
        if self.is_draw() {
            return "Draw! All agents are dead.".to_string();
        }
        if self.winning_agent() != -1 {
            return format!("Finished! Winning agent: {}", self.winning_agent());
        }
        if self.winning_team() != 0 {
            let members: Vec<String> = (0..AGENT_COUNT)
                .filter(|&i| self.state.board.agents[i].team == self.winning_team())
                .map(|i| i.to_string())
                .collect();
            return format!(
                "Finished! Winning team: {} ({})",
                self.winning_team(),
                members.join(", ")
            );
        }
        "Finished! Undefined result!".to_string()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
