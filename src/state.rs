//! The true game state: board initialization, explosions, terminal detection.

use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::rng::{take_random, SplitMix64};
use crate::step;
use crate::types::{
    self, team_of, Cell, GameMode, Move, Position, AGENT_COUNT, BOARD_SIZE, BOMB_LIFETIME,
    FLAME_LIFETIME, MAX_BOMBS_PER_AGENT,
};

/// Parameters for random board generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardGeneration {
    pub num_rigid: i32,
    pub num_wood: i32,
    pub num_power_ups: i32,
    /// Distance of the agent start positions to the walls.
    pub padding: i32,
    /// Size of the free space carved around each start position.
    pub breathing_room_size: i32,
}

impl Default for BoardGeneration {
    fn default() -> Self {
        Self {
            num_rigid: 36,
            num_wood: 36,
            num_power_ups: 20,
            padding: 1,
            breathing_room_size: 3,
        }
    }
}

/// The full game state. A terminal state absorbs further steps as no-ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub board: Board,
    /// Whether this is a terminal state.
    pub finished: bool,
    pub is_draw: bool,
    /// The winning team (0 if no team has won).
    pub winning_team: i32,
    /// The single winning agent (-1 if there is none, or the winners form a
    /// team).
    pub winning_agent: i32,
    /// Number of alive agents.
    pub alive_agents: i32,
}

impl Default for State {
    fn default() -> Self {
        Self {
            board: Board::new(),
            finished: false,
            is_draw: false,
            winning_team: 0,
            winning_agent: -1,
            alive_agents: AGENT_COUNT as i32,
        }
    }
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executes one simulation step with the given moves.
    pub fn step(&mut self, moves: &[Move; AGENT_COUNT]) {
        step::step(self, moves);
    }

    /// Sets the agent teams according to the game mode.
    pub fn set_teams(&mut self, mode: GameMode) {
        for (id, agent) in self.board.agents.iter_mut().enumerate() {
            agent.team = team_of(mode, id);
        }
    }

    /// Initializes the board with boxes, rigid walls, power-ups and agents,
    /// using the default generation parameters.
    ///
    /// `agent_position_seed != -1` shuffles the agent start corners.
    pub fn init(&mut self, mode: GameMode, board_seed: i64, agent_position_seed: i64) {
        self.init_with(mode, board_seed, agent_position_seed, BoardGeneration::default());
    }

    /// Initializes the board with explicit generation parameters.
    pub fn init_with(
        &mut self,
        mode: GameMode,
        board_seed: i64,
        agent_position_seed: i64,
        generation: BoardGeneration,
    ) {
        let BoardGeneration {
            mut num_rigid,
            mut num_wood,
            mut num_power_ups,
            padding,
            breathing_room_size,
        } = generation;

        self.board.clear(types::PASSAGE);

        let mut ids = [0usize, 1, 2, 3];
        if agent_position_seed != -1 {
            let mut rng = SplitMix64::new(agent_position_seed as u64);
            rng.shuffle(&mut ids);
        }
        self.board.put_agents_in_corners(ids, padding);
        self.set_teams(mode);

        let mut rng = SplitMix64::new(board_seed as u64);

        // Carve a wood-lined "breathing room" along the padding edges. Every
        // other cell goes into the pool for random fills.
        //
        //            |   padding    |
        // padding - [1][ ][x][x][ ][2] - padding
        //           [ ][?]      [?][ ] <- breathing room
        //           [x]   [?][?]   [x]
        //           [x]   [?][?]   [x] <- wood separating the rooms
        //           [ ][?]      [?][ ]
        // padding - [4][ ][x][x][ ][3] - padding
        let invert = |v: i32| BOARD_SIZE as i32 - 1 - v;
        let mut wood_coordinates: Vec<Position> = Vec::with_capacity(num_wood as usize);
        let mut coordinates: Vec<Position> = Vec::new();

        for y in 0..BOARD_SIZE as i32 {
            for x in 0..BOARD_SIZE as i32 {
                let edge_norm = if y == padding || invert(y) == padding {
                    x.min(invert(x))
                } else if x == padding || invert(x) == padding {
                    y.min(invert(y))
                } else {
                    -1
                };

                if edge_norm != -1 {
                    if edge_norm >= padding && edge_norm <= breathing_room_size {
                        // breathing room
                        continue;
                    }
                    if edge_norm > padding {
                        self.board.put_item(x, y, types::WOOD);
                        wood_coordinates.push(Position::new(x, y));
                        num_wood -= 1;
                        continue;
                    }
                }

                coordinates.push(Position::new(x, y));
            }
        }

        // Random rigid walls, then random wood, then power-ups hidden in a
        // random subset of the wood. In-place partial shuffle keeps the
        // selections unique.
        let mut taken = 0;
        while num_rigid > 0 {
            let coord = take_random(&mut coordinates[taken..], &mut rng);
            taken += 1;
            self.board.set_item_at(coord, types::RIGID);
            num_rigid -= 1;
        }
        while num_wood > 0 {
            let coord = take_random(&mut coordinates[taken..], &mut rng);
            taken += 1;
            self.board.set_item_at(coord, types::WOOD);
            wood_coordinates.push(coord);
            num_wood -= 1;
        }

        let mut taken = 0;
        while num_power_ups > 0 {
            let coord = take_random(&mut wood_coordinates[taken..], &mut rng);
            taken += 1;
            let flag = rng.next_below(3) as Cell + 1;
            self.board.set_item_at(coord, types::WOOD + flag);
            num_power_ups -= 1;
        }

        self.board.time_step = 0;
        self.board.current_flame_time = 0;
    }

    /// Kills an agent. Dead agents never resurrect; their bombs stay in play.
    pub fn kill(&mut self, agent_id: usize) {
        if !self.board.agents[agent_id].dead {
            self.board.agents[agent_id].dead = true;
            self.alive_agents -= 1;
        }
    }

    /// Puts a bomb at the agent's position if it has a bomb available and the
    /// cell holds no bomb yet. A bomb planted mid-step gets one extra tick to
    /// compensate for the timer decrement later in the same step.
    pub fn try_put_bomb(&mut self, agent_id: usize, during_step: bool, set_cell: bool) {
        let agent = self.board.agents[agent_id];
        if agent.bomb_count >= agent.max_bomb_count || self.board.has_bomb(agent.x, agent.y) {
            return;
        }
        self.board.put_bomb(
            agent.x,
            agent.y,
            agent_id,
            agent.bomb_strength,
            BOMB_LIFETIME + during_step as i32,
            set_cell,
        );
    }

    /// Explodes the bomb at the given queue slot and spawns its flames.
    /// Chain reactions detonate further bombs recursively.
    pub fn explode_bomb_at(&mut self, index: usize) {
        let bomb = if index == 0 {
            self.board.bombs.pop().unwrap()
        } else {
            self.board.bombs.remove_at(index)
        };

        self.spawn_flames(bomb.x(), bomb.y(), bomb.strength());

        let owner = bomb.owner();
        if owner < AGENT_COUNT && self.board.agents[owner].stats_visible {
            let count = &mut self.board.agents[owner].bomb_count;
            *count = (*count - 1).max(0);
        }
    }

    /// Detonates expired bombs (timer <= 0) and bombs flagged by flame
    /// contact, head-first in queue order.
    pub fn explode_bombs(&mut self) {
        loop {
            if !self.board.bombs.is_empty() && self.board.bombs[0].time_left() <= 0 {
                self.explode_bomb_at(0);
                continue;
            }
            let flagged = (0..self.board.bombs.len()).find(|&i| self.board.bombs[i].flag());
            match flagged {
                Some(i) => self.explode_bomb_at(i),
                None => break,
            }
        }
    }

    /// Spawns a flame cross centered at `(x, y)` with ray length `strength`.
    pub fn spawn_flames(&mut self, x: i32, y: i32, strength: i32) {
        assert!(
            self.board.current_flame_time != -1 || self.board.flames.is_empty(),
            "spawn_flames requires an optimized flame queue"
        );

        // center flame
        if !self.spawn_flame_item(x, y, true) {
            return;
        }

        // rays: right, left, down, up
        for (dx, dy) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            for i in 1..=strength {
                let fx = x + dx * i;
                let fy = y + dy * i;
                if types::is_out_of_bounds(Position::new(fx, fy)) {
                    break;
                }
                if !self.spawn_flame_item(fx, fy, false) {
                    break;
                }
            }
        }
    }

    /// Places a single flame. Returns whether the ray continues past this
    /// cell.
    fn spawn_flame_item(&mut self, x: i32, y: i32, is_center: bool) -> bool {
        let cell = self.board.items[y as usize][x as usize];

        if cell == types::RIGID {
            return false;
        }

        if types::is_agent(cell) {
            self.kill(types::cell_agent_id(cell));
        }

        if !is_center && (cell == types::BOMB || types::is_agent(cell)) {
            // chain explosion; bombs can hide below agents
            if let Some(i) = self.board.get_bomb_index(x, y) {
                self.explode_bomb_at(i);
                return false;
            }
        }

        let (spawn, continue_ray) = self.clean_flame_spawn_position(cell, x, y);
        if !spawn {
            return continue_ray;
        }

        let time_left = if is_center {
            let t = if self.board.flames.is_empty() {
                FLAME_LIFETIME
            } else {
                FLAME_LIFETIME - self.board.current_flame_time
            };
            self.board.current_flame_time = FLAME_LIFETIME;
            t
        } else {
            // same detonation as the center flame, zero differential
            0
        };

        let index = self.board.flames.len() as Cell;
        let mut destroyed_wood_at = -1;
        let mut new_cell = types::FLAME + (index << 3);
        let mut continue_after = continue_ray;

        if types::is_wood(cell) {
            // carry the hidden power-up into the flame cell and stop the ray
            new_cell += types::power_up_flag(cell);
            destroyed_wood_at = self.board.time_step;
            continue_after = false;
        }

        self.board.items[y as usize][x as usize] = new_cell;
        self.board.flames.push(crate::bomb::Flame {
            position: Position::new(x, y),
            time_left,
            destroyed_wood_at,
        });

        continue_after
    }

    /// Checks whether a flame can be spawned at `(x, y)`. An existing flame
    /// with a different lifetime is removed, merging its differential into
    /// its successor so the remaining absolute expiries are preserved.
    /// Returns `(spawn_flame, continue_ray)`.
    fn clean_flame_spawn_position(&mut self, cell: Cell, x: i32, y: i32) -> (bool, bool) {
        if !types::is_flame(cell) || self.board.flames.is_empty() {
            return (true, true);
        }

        // find the flame object for this position; the index stored in the
        // cell is an upper bound after earlier removals
        let start = types::flame_index(cell).min(self.board.flames.len() - 1);
        let mut found = None;
        for i in (0..=start).rev() {
            let f = self.board.flames[i];
            if f.position.x == x && f.position.y == y {
                found = Some(i);
                break;
            }
        }
        let Some(i) = found else {
            return (true, true);
        };

        let flame = self.board.flames[i];
        if flame.destroyed_wood_at == self.board.time_step {
            // this flame burned a wood block this very tick, stop here
            return (false, false);
        }
        if flame.time_left == FLAME_LIFETIME {
            // a fresh full-life flame is already there
            return (false, true);
        }

        // remove the old flame, preserving the differential encoding
        if i == 0 {
            let old = self.board.flames.pop().unwrap();
            if !self.board.flames.is_empty() {
                self.board.flames[0].time_left += old.time_left;
            } else {
                self.board.current_flame_time = 0;
            }
        } else {
            let old = self.board.flames.remove_at(i);
            if i < self.board.flames.len() {
                self.board.flames[i].time_left += old.time_left;
            } else {
                self.board.current_flame_time -= old.time_left;
            }
        }
        (true, true)
    }

    // ------------------------------------------------------------------
    // Terminal detection
    // ------------------------------------------------------------------

    /// Re-evaluates whether the game is over after the alive count changed.
    pub fn check_terminal(&mut self) {
        let mut winning_team = 0;

        if self.alive_agents == 0 {
            self.finished = true;
            self.is_draw = true;
        } else if self.alive_agents == 1 {
            self.finished = true;
            self.is_draw = false;
            if let Some(survivor) = (0..AGENT_COUNT).find(|&i| !self.board.agents[i].dead) {
                winning_team = self.board.agents[survivor].team;
                if winning_team == 0 {
                    self.winning_agent = survivor as i32;
                }
            }
        } else {
            winning_team = self.winning_team_candidate();
        }

        if winning_team != 0 {
            self.finished = true;
            self.is_draw = false;
        }
        self.winning_team = winning_team;
    }

    /// The team that has won if all alive agents share one non-zero team,
    /// else 0.
    fn winning_team_candidate(&self) -> i32 {
        let mut candidate = 0;
        for agent in &self.board.agents {
            if agent.dead {
                continue;
            }
            if agent.team == 0 {
                return 0;
            }
            if candidate == 0 {
                candidate = agent.team;
            } else if candidate != agent.team {
                // two alive agents from different teams
                return 0;
            }
        }
        candidate
    }

    /// Whether the given agent has won the (finished) game.
    pub fn is_winner(&self, agent_id: usize) -> bool {
        if !self.finished {
            return false;
        }
        self.winning_agent == agent_id as i32
            || (self.winning_team != 0 && self.board.agents[agent_id].team == self.winning_team)
    }

    /// Pessimistic stat bounds for reconstruction: assume the strongest
    /// possible opponent.
    pub fn pessimistic_stats() -> (i32, i32, bool) {
        (
            MAX_BOMBS_PER_AGENT as i32,
            BOARD_SIZE as i32,
            true,
        )
    }

    pub fn print(&self, clear_console: bool) {
        self.board.print(clear_console);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{is_flame, is_power_up, is_wood, FOG, PASSAGE, RIGID, WOOD};

    fn count_cells(state: &State, pred: impl Fn(Cell) -> bool) -> usize {
        state
            .board
            .items
            .iter()
            .flat_map(|row| row.iter())
            .filter(|&&c| pred(c))
            .count()
    }

    #[test]
    fn init_is_reproducible() {
        let mut a = State::new();
        let mut b = State::new();
        a.init(GameMode::FreeForAll, 0x1337, -1);
        b.init(GameMode::FreeForAll, 0x1337, -1);
        assert_eq!(a, b);

        let mut c = State::new();
        c.init(GameMode::FreeForAll, 0x1338, -1);
        assert_ne!(a.board.items, c.board.items);
    }

    #[test]
    fn init_places_requested_items() {
        let mut state = State::new();
        state.init(GameMode::FreeForAll, 42, -1);

        assert_eq!(count_cells(&state, |c| c == RIGID), 36);
        assert_eq!(count_cells(&state, is_wood), 36);
        assert_eq!(count_cells(&state, |c| is_wood(c) && c != WOOD), 20);
        assert_eq!(count_cells(&state, |c| c == FOG), 0);
        assert_eq!(count_cells(&state, types::is_agent), 4);
        assert_eq!(state.board.time_step, 0);
        assert_eq!(state.board.current_flame_time, 0);
        assert_eq!(state.alive_agents, 4);
    }

    #[test]
    fn init_shuffles_agent_positions() {
        let mut plain = State::new();
        plain.init(GameMode::FreeForAll, 1, -1);
        assert_eq!(plain.board.agents[0].position(), Position::new(1, 1));

        // some seed must produce a different corner for agent 0
        let moved = (0..16).any(|seed| {
            let mut s = State::new();
            s.init(GameMode::FreeForAll, 1, seed);
            s.board.agents[0].position() != Position::new(1, 1)
        });
        assert!(moved);
    }

    #[test]
    fn init_sets_teams() {
        let mut state = State::new();
        state.init(GameMode::TwoTeams, 1, -1);
        assert_eq!(state.board.agents[0].team, 1);
        assert_eq!(state.board.agents[1].team, 2);
        assert_eq!(state.board.agents[2].team, 1);
        assert_eq!(state.board.agents[3].team, 2);
        assert!(state.board.enemies(0, 1));
        assert!(!state.board.agents[0].is_enemy(&state.board.agents[2]));
    }

    #[test]
    fn breathing_room_is_free() {
        let mut state = State::new();
        state.init(GameMode::FreeForAll, 99, -1);
        // the cells next to each corner along the padding edges are passages
        for (x, y) in [(2, 1), (1, 2), (8, 1), (9, 2), (2, 9), (1, 8)] {
            let cell = state.board.items[y][x];
            assert!(
                cell == PASSAGE || is_power_up(cell),
                "expected free breathing room at ({}, {}), got {}",
                x,
                y,
                cell
            );
        }
    }

    #[test]
    fn kill_is_idempotent() {
        let mut state = State::new();
        state.kill(1);
        state.kill(1);
        assert_eq!(state.alive_agents, 3);
        assert!(state.board.agents[1].dead);
    }

    #[test]
    fn try_put_bomb_respects_cap_and_cell() {
        let mut state = State::new();
        state.board.put_agent(4, 4, 0);
        state.try_put_bomb(0, false, true);
        assert_eq!(state.board.agents[0].bomb_count, 1);

        // same cell already holds a bomb
        state.try_put_bomb(0, false, true);
        assert_eq!(state.board.agents[0].bomb_count, 1);

        // cap reached elsewhere
        state.board.put_agent(5, 4, 0);
        state.try_put_bomb(0, false, true);
        assert_eq!(state.board.agents[0].bomb_count, 1);
        assert_eq!(state.board.bombs.len(), 1);
        assert_eq!(state.board.bombs[0].time_left(), BOMB_LIFETIME);
    }

    #[test]
    fn mid_step_bomb_gets_extra_tick() {
        let mut state = State::new();
        state.board.put_agent(4, 4, 0);
        state.try_put_bomb(0, true, false);
        assert_eq!(state.board.bombs[0].time_left(), BOMB_LIFETIME + 1);
    }

    #[test]
    fn spawn_flames_cross_and_rigid_stop() {
        let mut state = State::new();
        state.board.put_item(6, 5, RIGID);
        state.spawn_flames(5, 5, 2);

        assert!(is_flame(state.board.item_at(Position::new(5, 5))));
        // right ray stopped by the rigid wall
        assert_eq!(state.board.item_at(Position::new(6, 5)), RIGID);
        assert!(!is_flame(state.board.item_at(Position::new(7, 5))));
        // other rays reach full length
        for p in [
            Position::new(4, 5),
            Position::new(3, 5),
            Position::new(5, 4),
            Position::new(5, 3),
            Position::new(5, 6),
            Position::new(5, 7),
        ] {
            assert!(is_flame(state.board.item_at(p)));
        }
        assert_eq!(state.board.current_flame_time, FLAME_LIFETIME);
        // differentials sum to the current flame time
        let sum: i32 = state.board.flames.iter().map(|f| f.time_left).sum();
        assert_eq!(sum, state.board.current_flame_time);
    }

    #[test]
    fn wood_burn_hides_power_up_in_flame() {
        let mut state = State::new();
        state.board.put_item(6, 5, WOOD + 3); // hidden kick
        state.board.put_item(7, 5, WOOD);
        state.spawn_flames(5, 5, 4);

        let cell = state.board.item_at(Position::new(6, 5));
        assert!(is_flame(cell));
        assert_eq!(types::power_up_flag(cell), 3);
        // the ray stopped at the first wood
        assert!(is_wood(state.board.item_at(Position::new(7, 5))));

        // flame expiry reveals the power-up
        let idle = [Move::Idle; 4];
        for _ in 0..FLAME_LIFETIME {
            state.step(&idle);
        }
        assert_eq!(state.board.item_at(Position::new(6, 5)), types::KICK);
    }

    #[test]
    fn flames_kill_agents() {
        let mut state = State::new();
        state.board.put_agent(5, 6, 2);
        state.spawn_flames(5, 5, 2);
        assert!(state.board.agents[2].dead);
        assert_eq!(state.alive_agents, 3);
    }

    #[test]
    fn explode_bomb_decrements_owner_count() {
        let mut state = State::new();
        state.board.put_agent(0, 0, 0);
        state.board.put_bomb(5, 5, 0, 1, 9, true);
        assert_eq!(state.board.agents[0].bomb_count, 1);
        state.explode_bomb_at(0);
        assert_eq!(state.board.agents[0].bomb_count, 0);
        assert!(state.board.bombs.is_empty());
        assert!(is_flame(state.board.item_at(Position::new(5, 5))));
    }

    #[test]
    fn chain_explosion_via_spawn() {
        let mut state = State::new();
        state.board.put_bomb(5, 5, 0, 2, 9, true);
        state.board.put_bomb(7, 5, 1, 1, 9, true);
        state.explode_bomb_at(0);
        // the second bomb is caught by the ray and detonates too
        assert!(state.board.bombs.is_empty());
        assert!(is_flame(state.board.item_at(Position::new(7, 5))));
        assert!(is_flame(state.board.item_at(Position::new(8, 5))));
    }

    #[test]
    fn terminal_draw_and_single_winner() {
        let mut state = State::new();
        state.kill(0);
        state.kill(1);
        state.kill(2);
        state.check_terminal();
        assert!(state.finished);
        assert!(!state.is_draw);
        assert_eq!(state.winning_agent, 3);
        assert!(state.is_winner(3));
        assert!(!state.is_winner(0));

        let mut draw = State::new();
        for i in 0..AGENT_COUNT {
            draw.kill(i);
        }
        draw.check_terminal();
        assert!(draw.finished);
        assert!(draw.is_draw);
        assert_eq!(draw.winning_agent, -1);
    }

    #[test]
    fn terminal_team_win() {
        let mut state = State::new();
        state.set_teams(GameMode::TwoTeams);
        state.kill(1);
        state.kill(3);
        state.check_terminal();
        assert!(state.finished);
        assert_eq!(state.winning_team, 1);
        assert_eq!(state.winning_agent, -1);
        assert!(state.is_winner(0));
        assert!(state.is_winner(2));
        assert!(!state.is_winner(1));
    }

    #[test]
    fn no_terminal_while_teams_compete() {
        let mut state = State::new();
        state.set_teams(GameMode::TwoTeams);
        state.kill(2);
        state.check_terminal();
        assert!(!state.finished);
        assert_eq!(state.winning_team, 0);
    }
}
