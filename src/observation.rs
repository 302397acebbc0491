//! Partial observations and state reconstruction.

use std::sync::atomic::{AtomicI32, Ordering};

use serde::{Deserialize, Serialize};

use crate::board::{AgentInfo, Board};
use crate::bomb::Bomb;
use crate::state::State;
use crate::types::{
    self, in_view_range, is_out_of_bounds, origin_position, AgentInfoVisibility, Cell, Direction,
    ObservationParameters, Position, AGENT_COUNT, BOARD_SIZE,
};

/// Per-cell age counters for reconstructed boards (steps since last seen).
pub type ItemAgeGrid = [[i32; BOARD_SIZE]; BOARD_SIZE];

// Reconstruction is a heuristic; its diagnostics are rate-limited instead of
// flooding the log.
static TIMESTEP_WARNINGS: AtomicI32 = AtomicI32::new(3);
static BACKTRACK_WARNINGS: AtomicI32 = AtomicI32::new(3);
static CAPACITY_WARNINGS: AtomicI32 = AtomicI32::new(3);

fn warn_limited(budget: &AtomicI32, message: std::fmt::Arguments<'_>) {
    if budget.load(Ordering::Relaxed) > 0 {
        let remaining = budget.fetch_sub(1, Ordering::Relaxed) - 1;
        log::warn!("{} (this message repeats {} more times)", message, remaining.max(0));
    }
}

/// The partial view one agent has of a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub board: Board,
    /// The observing agent.
    pub agent_id: usize,
    /// The parameters this observation was built under.
    pub params: ObservationParameters,
}

impl Default for Observation {
    fn default() -> Self {
        Self {
            board: Board::new(),
            agent_id: 0,
            params: ObservationParameters::default(),
        }
    }
}

impl Observation {
    /// Builds the observation of `agent_id` from the true state.
    pub fn get(state: &State, agent_id: usize, params: ObservationParameters) -> Observation {
        let mut obs = Observation {
            board: Board::new(),
            agent_id,
            params,
        };
        obs.board.time_step = state.board.time_step;

        // fully observable environment
        if params.expose_power_ups
            && !params.agent_partial_map_view
            && params.agent_info_visibility == AgentInfoVisibility::All
        {
            obs.board = state.board.clone();
            return obs;
        }

        if params.agent_partial_map_view {
            let info = state.board.agents[agent_id];
            let view = params.agent_view_size;

            for y in 0..BOARD_SIZE {
                if (y as i32 - info.y).abs() > view {
                    for x in 0..BOARD_SIZE {
                        obs.board.items[y][x] = types::FOG;
                    }
                    continue;
                }
                for x in 0..BOARD_SIZE {
                    if (x as i32 - info.x).abs() > view {
                        obs.board.items[y][x] = types::FOG;
                        continue;
                    }
                    obs.board.items[y][x] =
                        reveal_cell(state.board.items[y][x], params.expose_power_ups);
                }
            }

            // only bombs and flames inside the view survive
            for i in 0..state.board.bombs.len() {
                let b = state.board.bombs[i];
                if in_view_range(info.position(), b.position(), view) {
                    obs.board.bombs.push(b);
                }
            }
            filter_flames(state, &mut obs, info.position(), view);
        } else {
            obs.board.copy_from(&state.board, false);
            if !params.expose_power_ups {
                for y in 0..BOARD_SIZE {
                    for x in 0..BOARD_SIZE {
                        obs.board.items[y][x] = reveal_cell(obs.board.items[y][x], false);
                    }
                }
            }
        }

        // agent records: self is always fully known
        let self_info = state.board.agents[agent_id];
        obs.board.agents[agent_id] = self_info;

        for i in 0..AGENT_COUNT {
            if i == agent_id {
                continue;
            }
            let other = state.board.agents[i];
            let mut record = obs.board.agents[i];

            let in_sight = other.visible
                && (!params.agent_partial_map_view
                    || in_view_range(
                        self_info.position(),
                        other.position(),
                        params.agent_view_size,
                    ));

            if in_sight {
                match params.agent_info_visibility {
                    AgentInfoVisibility::OnlySelf => {
                        record.visible = true;
                        record.x = other.x;
                        record.y = other.y;
                        record.stats_visible = false;
                    }
                    AgentInfoVisibility::InView | AgentInfoVisibility::All => {
                        record = other;
                    }
                }
            } else {
                if params.agent_info_visibility == AgentInfoVisibility::All {
                    record = other;
                } else {
                    record.stats_visible = false;
                }
                record.visible = false;
                // unique positions out of bounds, so destination checks
                // still treat hidden agents as distinct
                record.x = -(i as i32);
                record.y = -1;
            }

            // lives and teams are public knowledge
            record.dead = other.dead;
            record.team = other.team;
            obs.board.agents[i] = record;
        }

        obs
    }

    /// Collapses this observation into a state usable for planning steps.
    ///
    /// Stats of agents that are not visible here are taken over from the
    /// given state (a previous reconstruction, or a fresh default).
    pub fn to_state(&self, state: &mut State) {
        self.to_state_impl(state, false);
    }

    /// Like [`Observation::to_state`], but fills unknown enemy stats with
    /// pessimistic maxima instead of carrying previous values.
    pub fn to_state_pessimistic(&self, state: &mut State) {
        self.to_state_impl(state, true);
    }

    fn to_state_impl(&self, state: &mut State, pessimistic: bool) {
        state.board.copy_from(&self.board, false);
        state.board.optimize_flame_queue();

        let mut alive = 0;
        for i in 0..AGENT_COUNT {
            let mut info = self.board.agents[i];
            if !info.stats_visible {
                if pessimistic {
                    let (max_bombs, strength, kick) = State::pessimistic_stats();
                    info.bomb_count = 0;
                    info.max_bomb_count = max_bombs;
                    info.bomb_strength = strength;
                    info.can_kick = kick;
                } else {
                    let prev = state.board.agents[i];
                    info.bomb_count = prev.bomb_count;
                    info.max_bomb_count = prev.max_bomb_count;
                    info.bomb_strength = prev.bomb_strength;
                    info.can_kick = prev.can_kick;
                }
                info.stats_visible = true;
            }
            state.board.agents[i] = info;
            if !info.dead {
                alive += 1;
            }
        }
        state.alive_agents = alive;
        state.check_terminal();
    }

    /// Advances a planning state from time `t` by merging this observation
    /// at time `t + 1` into it.
    ///
    /// `keep_agents` retains agents that dropped out of view at their last
    /// known positions; `keep_bombs` does the same for bombs (their timers
    /// keep running and they detonate on schedule). `item_age` counts steps
    /// since each cell was last actually observed.
    pub fn virtual_step(
        &self,
        state: &mut State,
        keep_agents: bool,
        keep_bombs: bool,
        mut item_age: Option<&mut ItemAgeGrid>,
    ) {
        if state.board.time_step != self.board.time_step - 1 {
            warn_limited(
                &TIMESTEP_WARNINGS,
                format_args!(
                    "virtual step on non-adjacent timesteps: state {}, observation {}",
                    state.board.time_step, self.board.time_step
                ),
            );
        }
        state.board.time_step = self.board.time_step;

        let self_info = self.board.agents[self.agent_id];

        // merge agent records
        for i in 0..AGENT_COUNT {
            let obs_agent = self.board.agents[i];
            let state_agent = &mut state.board.agents[i];

            state_agent.dead = obs_agent.dead;
            state_agent.team = obs_agent.team;

            if obs_agent.visible {
                state_agent.visible = true;
                state_agent.x = obs_agent.x;
                state_agent.y = obs_agent.y;
            } else if !keep_agents
                || !self.params.agent_partial_map_view
                || in_view_range(
                    self_info.position(),
                    state_agent.position(),
                    self.params.agent_view_size,
                )
            {
                // agents we should have seen (or do not track) are dropped
                state_agent.visible = false;
                state_agent.x = -(i as i32);
                state_agent.y = -1;
            }

            if obs_agent.stats_visible {
                state_agent.stats_visible = true;
                state_agent.bomb_count = obs_agent.bomb_count;
                state_agent.bomb_strength = obs_agent.bomb_strength;
                state_agent.max_bomb_count = obs_agent.max_bomb_count;
                state_agent.can_kick = obs_agent.can_kick;
            } else if !keep_agents {
                state_agent.stats_visible = false;
            }
        }

        // merge cells; fog is reconstructed from the old state
        for y in 0..BOARD_SIZE {
            for x in 0..BOARD_SIZE {
                let item = self.board.items[y][x];
                if item != types::FOG {
                    state.board.items[y][x] = item;
                    if let Some(age) = item_age.as_deref_mut() {
                        age[y][x] = 0;
                    }
                    continue;
                }

                let mut old = state.board.items[y][x];
                if old == types::FOG {
                    continue;
                }
                if types::is_agent(old) {
                    let id = types::cell_agent_id(old);
                    if id >= AGENT_COUNT || !keep_agents || self.board.agents[id].visible {
                        // dropped, or visible elsewhere now: it moved
                        old = types::PASSAGE;
                    }
                }
                if old == types::BOMB && !keep_bombs {
                    old = types::PASSAGE;
                }
                state.board.items[y][x] = old;
                if let Some(age) = item_age.as_deref_mut() {
                    age[y][x] += 1;
                }
            }
        }

        // the tracked flames are one tick older now
        state.board.tick_flames();

        if keep_bombs {
            self.merge_bombs_into(state);
            state.explode_bombs();
        } else {
            state.board.bombs = self.board.bombs;
        }

        self.merge_flames_into(state);

        state.alive_agents = state
            .board
            .agents
            .iter()
            .filter(|a| !a.dead)
            .count() as i32;
        state.check_terminal();
    }

    /// Re-inserts bombs that were known before but are now out of view.
    fn merge_bombs_into(&self, state: &mut State) {
        if !self.params.agent_partial_map_view {
            state.board.bombs = self.board.bombs;
            return;
        }

        let center = self.board.agents[self.agent_id].position();
        let old_bombs = state.board.bombs;
        state.board.bombs = self.board.bombs;

        for i in 0..old_bombs.len() {
            let old = old_bombs[i];
            if in_view_range(center, old.position(), self.params.agent_view_size) {
                // in-view bombs are exactly the observed ones
                continue;
            }
            if self
                .board
                .bombs
                .iter()
                .any(|b| b.position() == old.position())
            {
                continue;
            }
            if state.board.bombs.remaining_capacity() == 0 {
                warn_limited(
                    &CAPACITY_WARNINGS,
                    format_args!("bomb queue full while merging tracked bombs"),
                );
                break;
            }

            let mut bomb = old;
            bomb.tick();
            bomb.set_direction(Direction::Idle);
            let at = (0..state.board.bombs.len())
                .find(|&k| state.board.bombs[k].time_left() > bomb.time_left())
                .unwrap_or(state.board.bombs.len());
            state.board.bombs.insert_at(at, bomb);
        }
    }

    /// Merges observed flames with flames tracked out of view. Known flames
    /// keep their absolute expiry; new ones are inserted, then the queue is
    /// re-optimized.
    fn merge_flames_into(&self, state: &mut State) {
        if !self.params.agent_partial_map_view {
            state.board.flames = self.board.flames;
            state.board.current_flame_time = self.board.current_flame_time;
            return;
        }

        state.board.convert_to_absolute_flame_times();

        let mut cumulative = 0;
        for i in 0..self.board.flames.len() {
            let mut flame = self.board.flames[i];
            cumulative += flame.time_left;
            let known = state
                .board
                .flames
                .iter()
                .any(|f| f.position == flame.position);
            if !known {
                flame.time_left = cumulative;
                state.board.flames.push(flame);
            }
        }

        state.board.optimize_flame_queue();
    }

    /// Reconstructs hidden agent stats and bomb ownership from the previous
    /// board (state or observation). A heuristic: even in a fully observable
    /// game some histories cannot be disambiguated.
    pub fn track_stats(&mut self, old_board: &Board) {
        let all_visible = self.board.agents.iter().all(|a| a.stats_visible);
        if self.board.time_step == 0 || all_visible {
            return;
        }

        for i in 0..AGENT_COUNT {
            let old_info = old_board.agents[i];
            let mut info = self.board.agents[i];

            if info.dead {
                info.max_bomb_count = old_info.max_bomb_count;
                info.bomb_strength = old_info.bomb_strength;
                info.can_kick = old_info.can_kick;
                info.bomb_count = 0;
                self.board.agents[i] = info;
                // dead agents cannot own new bombs
                continue;
            }

            if !info.stats_visible {
                // active bombs are counted per owner below
                info.bomb_count = 0;
                info.max_bomb_count = old_info.max_bomb_count;
                info.bomb_strength = old_info.bomb_strength;
                info.can_kick = old_info.can_kick;

                if info.visible {
                    // a visible agent entering a power-up cell collected it
                    match old_board.item_at(info.position()) {
                        types::EXTRA_BOMB => info.max_bomb_count = old_info.max_bomb_count + 1,
                        types::INCR_RANGE => info.bomb_strength = old_info.bomb_strength + 1,
                        types::KICK => info.can_kick = true,
                        _ => {}
                    }
                    if !info.can_kick && self.has_kicked_bomb(old_board, i) {
                        // we missed the kick power-up pickup
                        info.can_kick = true;
                    }
                }
            }

            self.board.agents[i] = info;

            // an agent standing on a bomb owns it, and the bomb reveals the
            // agent's blast strength
            if let Some(bi) = self.board.get_bomb_index(info.x, info.y) {
                self.board.agents[i].bomb_strength = self.board.bombs[bi].strength();
                self.board.bombs[bi].set_owner(i);
            }
        }

        // count bombs per owner; backtrack bombs whose owner is unknown
        for k in 0..self.board.bombs.len() {
            let owner = self.board.bombs[k].owner();
            if owner < AGENT_COUNT {
                count_bomb_if_stats_invisible(&mut self.board.agents[owner]);
                continue;
            }

            let bomb = self.board.bombs[k];
            match backtrack_bomb_index(old_board, &self.board, bomb) {
                Some(old_index) => {
                    let old_owner = old_board.bombs[old_index].owner();
                    if old_owner < AGENT_COUNT {
                        self.board.bombs[k].set_owner(old_owner);
                        count_bomb_if_stats_invisible(&mut self.board.agents[old_owner]);
                    }
                }
                None => warn_limited(
                    &BACKTRACK_WARNINGS,
                    format_args!(
                        "could not backtrack the owner of the bomb at {}",
                        bomb.position()
                    ),
                ),
            }
        }

        for agent in self.board.agents.iter_mut() {
            agent.stats_visible = true;
        }
    }

    /// Whether the agent is seen kicking a bomb: it moved, and the cell two
    /// steps along its movement holds a bomb whose backtrack shows a changed
    /// direction.
    fn has_kicked_bomb(&self, old_board: &Board, agent_id: usize) -> bool {
        let info = self.board.agents[agent_id];
        let old_info = old_board.agents[agent_id];
        if info.dead || old_info.dead || !info.visible || !old_info.visible {
            return false;
        }
        if info.position() == old_info.position() {
            return false;
        }

        let movement = info.position() - old_info.position();
        let kick_position = info.position() + movement;
        if is_out_of_bounds(kick_position) {
            return false;
        }
        if self.board.item_at(kick_position) != types::BOMB {
            return false;
        }
        let Some(bi) = self
            .board
            .get_bomb_index(kick_position.x, kick_position.y)
        else {
            return false;
        };
        let bomb = self.board.bombs[bi];
        let Some(old_index) = backtrack_bomb_index(old_board, &self.board, bomb) else {
            return false;
        };
        bomb.direction() != old_board.bombs[old_index].direction()
    }
}

fn reveal_cell(cell: Cell, expose_power_ups: bool) -> Cell {
    if expose_power_ups {
        return cell;
    }
    if types::is_wood(cell) {
        types::WOOD
    } else if types::is_flame(cell) {
        types::clear_power_up_flag(cell)
    } else {
        cell
    }
}

/// Copies the in-view flames with absolute remaining times, then re-optimizes
/// the filtered queue.
fn filter_flames(state: &State, obs: &mut Observation, center: Position, view: i32) {
    assert!(
        state.board.current_flame_time != -1,
        "observation requires an optimized state flame queue"
    );

    obs.board.current_flame_time = -1;
    let mut cumulative = 0;
    for i in 0..state.board.flames.len() {
        let mut flame = state.board.flames[i];
        cumulative += flame.time_left;
        if in_view_range(flame.position, center, view) {
            flame.time_left = cumulative;
            obs.board.flames.push(flame);
        }
    }
    obs.board.optimize_flame_queue();
}

fn count_bomb_if_stats_invisible(info: &mut AgentInfo) {
    if !info.stats_visible {
        info.bomb_count += 1;
        // a count above the cap means we missed an extra-bomb pickup
        if info.bomb_count > info.max_bomb_count {
            info.max_bomb_count = info.bomb_count;
        }
    }
}

/// Finds the queue slot in `old_board` of the bomb that became `bomb` one
/// step later: first at its kick-free origin, then by backtracking same-tick
/// kick chains.
fn backtrack_bomb_index(old_board: &Board, obs_board: &Board, bomb: Bomb) -> Option<usize> {
    let origin = origin_position(bomb.position(), bomb.direction().as_move());
    if !is_out_of_bounds(origin) {
        if let Some(index) = old_board.get_bomb_index(origin.x, origin.y) {
            return Some(index);
        }
    }
    backtrack_kicked(
        old_board,
        obs_board,
        origin,
        bomb.direction(),
        bomb.time_left() + 1,
        bomb.strength(),
        0,
    )
}

fn backtrack_kicked(
    old_board: &Board,
    obs_board: &Board,
    position: Position,
    direction: Direction,
    time_left: i32,
    strength: i32,
    depth: usize,
) -> Option<usize> {
    // bounded: a bomb can be kicked at most once per agent in a single tick
    if depth >= AGENT_COUNT || is_out_of_bounds(position) {
        return None;
    }

    if old_board.item_at(position) == types::BOMB {
        let index = old_board.get_bomb_index(position.x, position.y)?;
        let candidate = old_board.bombs[index];
        let matches = candidate.strength() == strength
            && candidate.time_left() == time_left
            && candidate.direction() == direction;
        return matches.then_some(index);
    }

    let obs_cell = obs_board.item_at(position);
    if types::is_agent(obs_cell) {
        // the agent here may have deflected the bomb; it must have walked in
        // against the bomb's arrival direction
        let came_from = origin_position(position, direction.as_move());
        if !is_out_of_bounds(came_from) && old_board.item_at(came_from) == obs_cell {
            for next in [
                Direction::Up,
                Direction::Down,
                Direction::Left,
                Direction::Right,
            ] {
                if next == direction {
                    continue;
                }
                let next_position = origin_position(position, next.as_move());
                if let Some(found) = backtrack_kicked(
                    old_board,
                    obs_board,
                    next_position,
                    next,
                    time_left,
                    strength,
                    depth + 1,
                ) {
                    return Some(found);
                }
            }
        }
    }

    None
}
