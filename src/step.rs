//! One-tick state transition: agent motion chains, bomb kinetics, detonation.

use crate::state::State;
use crate::types::{
    self, agent_cell, desired_position, direction_of_step, is_out_of_bounds, origin_position,
    Direction, Move, Position, AGENT_COUNT,
};

/// Advances the state by one tick. Terminal states absorb steps as no-ops.
///
/// Order of play: age flames, move agents (dependency order), resolve and
/// move bombs, tick bomb timers and detonate, then re-check the terminal
/// condition if the alive count changed.
pub fn step(state: &mut State, moves: &[Move; AGENT_COUNT]) {
    if state.finished {
        return;
    }
    let alive_before = state.alive_agents;

    state.board.tick_flames();

    // -------- agent movement --------

    let old_pos: [Position; AGENT_COUNT] =
        std::array::from_fn(|i| state.board.agents[i].position());
    let desired: [Position; AGENT_COUNT] =
        std::array::from_fn(|i| desired_position(old_pos[i], moves[i]));
    let mut dest = desired;
    fix_destinations(state, &mut dest);

    // cells claimed by bombs already in motion before this tick; walking
    // into their path is only allowed for agents that could kick them on
    let bomb_claims: Vec<Position> = (0..state.board.bombs.len())
        .filter(|&i| state.board.bombs[i].direction() != Direction::Idle)
        .map(|i| state.board.bombs[i].desired_position())
        .collect();
    // directions before the agent phase; a direction that changes during
    // the phase marks a bomb as freshly kicked
    let old_dirs: Vec<Direction> = (0..state.board.bombs.len())
        .map(|i| state.board.bombs[i].direction())
        .collect();

    let (dependency, roots, root_count) = resolve_dependencies(state, &dest);
    let ouroboros = root_count == 0;

    let mut root_index = 0;
    let mut current: i32 = if root_count == 0 { 0 } else { roots[0] };
    for _ in 0..AGENT_COUNT {
        if current == -1 {
            root_index += 1;
            if root_index >= AGENT_COUNT {
                break;
            }
            current = roots[root_index];
            if current == -1 {
                break;
            }
        }
        let id = current as usize;
        move_agent(state, id, moves[id], dest[id], ouroboros, &bomb_claims);
        current = dependency[id];
    }

    // -------- bomb movement --------

    reset_bomb_flags(state);
    let mut bomb_dest: Vec<Position> = (0..state.board.bombs.len())
        .map(|i| state.board.bombs[i].desired_position())
        .collect();
    resolve_bomb_movement(state, moves, &old_pos, &desired, &old_dirs, &mut bomb_dest);
    move_bombs(state, &mut bomb_dest);

    // -------- detonation --------

    tick_bombs(state);

    state.board.time_step += 1;
    if alive_before != state.alive_agents {
        state.check_terminal();
    }
}

/// Resets destinations of agent pairs that target the same cell or would
/// swap positions. Both colliders lose; swaps are forbidden even without a
/// third party.
fn fix_destinations(state: &State, dest: &mut [Position; AGENT_COUNT]) {
    let agents = &state.board.agents;
    let mut fix = [false; AGENT_COUNT];

    for i in 0..AGENT_COUNT {
        if agents[i].dead {
            continue;
        }
        for j in i + 1..AGENT_COUNT {
            if agents[j].dead {
                continue;
            }
            let swap = dest[i] == agents[j].position() && dest[j] == agents[i].position();
            if dest[i] == dest[j] || swap {
                fix[i] = true;
                fix[j] = true;
            }
        }
    }

    for i in 0..AGENT_COUNT {
        if fix[i] {
            dest[i] = agents[i].position();
        }
    }
}

/// Builds the movement dependency chain: `dependency[j] = i` means agent `i`
/// waits for `j` to vacate its cell. Dead agents count as roots. A cycle
/// with no root at all is an ouroboros.
fn resolve_dependencies(
    state: &State,
    dest: &[Position; AGENT_COUNT],
) -> ([i32; AGENT_COUNT], [i32; AGENT_COUNT], usize) {
    let agents = &state.board.agents;
    let mut dependency = [-1i32; AGENT_COUNT];
    let mut roots = [-1i32; AGENT_COUNT];
    let mut root_count = 0;

    for i in 0..AGENT_COUNT {
        if agents[i].dead {
            roots[root_count] = i as i32;
            root_count += 1;
            continue;
        }
        let mut is_root = true;
        for j in 0..AGENT_COUNT {
            if i == j || agents[j].dead {
                continue;
            }
            if dest[i] == agents[j].position() {
                dependency[j] = i as i32;
                is_root = false;
                break;
            }
        }
        if is_root {
            roots[root_count] = i as i32;
            root_count += 1;
        }
    }

    (dependency, roots, root_count)
}

fn move_agent(
    state: &mut State,
    id: usize,
    mv: Move,
    dest: Position,
    ouroboros: bool,
    bomb_claims: &[Position],
) {
    let agent = state.board.agents[id];
    if agent.dead || !agent.visible {
        return;
    }

    if mv == Move::Bomb {
        state.try_put_bomb(id, true, false);
        return;
    }
    if mv == Move::Idle {
        return;
    }

    let source = agent.position();
    if dest == source || is_out_of_bounds(dest) {
        return;
    }

    // a bomb in motion owns its next cell; only a kicker may contest it
    if !agent.can_kick && bomb_claims.contains(&dest) {
        return;
    }

    let mut item = state.board.item_at(dest);
    // in an ouroboros the destination bomb can be covered by an agent
    if ouroboros && state.board.has_bomb(dest.x, dest.y) {
        item = types::BOMB;
    }

    if types::is_flame(item) {
        state.kill(id);
        clear_source_cell(state, id, source);
        return;
    }

    if types::is_power_up(item) {
        consume_power_up(state, id, item);
        item = types::PASSAGE;
    }

    if item == types::PASSAGE || (ouroboros && types::is_agent(item)) {
        clear_source_cell(state, id, source);
        state.board.set_item_at(dest, agent_cell(id));
        state.board.agents[id].set_position(dest);
    } else if item == types::BOMB {
        // step onto the bomb; whether it actually leaves is resolved later
        clear_source_cell(state, id, source);
        state.board.set_item_at(dest, agent_cell(id));
        state.board.agents[id].set_position(dest);
        if agent.can_kick {
            if let (Some(bi), Some(dir)) =
                (state.board.get_bomb_index(dest.x, dest.y), mv.direction())
            {
                state.board.bombs[bi].set_direction(dir);
            }
        }
    }
    // rigid, wood, fog, or an occupied cell outside an ouroboros: stay put
}

fn clear_source_cell(state: &mut State, id: usize, source: Position) {
    // only clear the cell if no other agent took it already
    if state.board.item_at(source) == agent_cell(id) {
        let replacement = if state.board.has_bomb(source.x, source.y) {
            types::BOMB
        } else {
            types::PASSAGE
        };
        state.board.set_item_at(source, replacement);
    }
}

fn consume_power_up(state: &mut State, id: usize, item: types::Cell) {
    let agent = &mut state.board.agents[id];
    match item {
        types::EXTRA_BOMB => agent.max_bomb_count += 1,
        types::INCR_RANGE => agent.bomb_strength += 1,
        types::KICK => agent.can_kick = true,
        _ => {}
    }
}

fn reset_bomb_flags(state: &mut State) {
    for i in 0..state.board.bombs.len() {
        state.board.bombs[i].set_flag(false);
    }
}

fn agent_moved(
    state: &State,
    moves: &[Move; AGENT_COUNT],
    old_pos: &[Position; AGENT_COUNT],
    id: usize,
) -> bool {
    moves[id] != Move::Idle
        && moves[id] != Move::Bomb
        && !state.board.agents[id].dead
        && state.board.agents[id].position() != old_pos[id]
}

/// Whether the bomb at queue slot `i` was set in motion this tick. A bomb
/// re-kicked in the direction it was already travelling counts as already
/// moving.
fn freshly_kicked(state: &State, old_dirs: &[Direction], i: usize) -> bool {
    let dir = state.board.bombs[i].direction();
    dir != Direction::Idle && old_dirs.get(i).copied().unwrap_or(Direction::Idle) != dir
}

/// Settles all bomb destinations: static blocks, agent blocks and claims,
/// bomb-bomb conflicts and kick transfers. Stopped bombs revert the agents
/// that depended on their movement (chain reversion).
fn resolve_bomb_movement(
    state: &mut State,
    moves: &[Move; AGENT_COUNT],
    old_pos: &[Position; AGENT_COUNT],
    agent_desired: &[Position; AGENT_COUNT],
    old_dirs: &[Direction],
    bomb_dest: &mut Vec<Position>,
) {
    // every round either stops a bomb or reverts an agent, so this settles
    // quickly; the cap is just a backstop
    for _round in 0..(AGENT_COUNT + types::MAX_BOMBS) * 2 {
        let mut changed = false;

        for i in 0..state.board.bombs.len() {
            let bomb = state.board.bombs[i];
            let source = bomb.position();
            let target = bomb_dest[i];

            if target == source {
                // a stationary bomb bounces back an agent that walked onto it
                if let Some(rider) = state.board.get_agent(source.x, source.y) {
                    if agent_moved(state, moves, old_pos, rider) {
                        chain_revert(state, moves, bomb_dest, rider);
                        if state.board.get_agent(source.x, source.y).is_none() {
                            state.board.set_item_at(source, types::BOMB);
                        }
                        changed = true;
                    }
                }
                continue;
            }

            if !bomb_blocked(state, agent_desired, bomb_dest, i, target, old_dirs) {
                continue;
            }

            if try_kick_transfer(state, old_pos, bomb_dest, i, target) {
                changed = true;
                continue;
            }

            // stop the bomb; a contested cell also stops every other bomb
            // of the same class (in motion vs freshly kicked) aiming at it
            let fresh = freshly_kicked(state, old_dirs, i);
            let mut stopping = vec![i];
            for j in 0..bomb_dest.len() {
                if j != i
                    && bomb_dest[j] == target
                    && bomb_dest[j] != state.board.bombs[j].position()
                    && freshly_kicked(state, old_dirs, j) == fresh
                {
                    stopping.push(j);
                }
            }
            for &k in &stopping {
                let k_source = state.board.bombs[k].position();
                state.board.bombs[k].set_direction(Direction::Idle);
                bomb_dest[k] = k_source;
                if state.board.get_agent(k_source.x, k_source.y).is_none() {
                    state.board.set_item_at(k_source, types::BOMB);
                }
            }
            changed = true;

            // a bomb already in motion bounces the agent blocking its path;
            // a bomb kicked this tick bounces its kicker instead (picked up
            // by the stationary rule on the next round)
            if !fresh && !is_out_of_bounds(target) {
                if let Some(blocker) = state.board.get_agent(target.x, target.y) {
                    if agent_moved(state, moves, old_pos, blocker) {
                        chain_revert(state, moves, bomb_dest, blocker);
                    }
                }
            }
        }

        if !changed {
            break;
        }
    }
}

fn bomb_blocked(
    state: &State,
    agent_desired: &[Position; AGENT_COUNT],
    bomb_dest: &[Position],
    i: usize,
    target: Position,
    old_dirs: &[Direction],
) -> bool {
    if is_out_of_bounds(target) {
        return true;
    }
    let cell = state.board.item_at(target);
    if types::is_static_movement_block(cell) || types::is_agent(cell) {
        return true;
    }

    // destination claimed by an alive agent, even one whose own move failed
    for j in 0..AGENT_COUNT {
        if !state.board.agents[j].dead && agent_desired[j] == target {
            return true;
        }
    }

    // another bomb parked on the target
    for j in 0..bomb_dest.len() {
        if j != i
            && state.board.bombs[j].position() == target
            && bomb_dest[j] == state.board.bombs[j].position()
        {
            return true;
        }
    }

    // moving bombs contesting the same cell: a bomb already in motion wins
    // over one freshly kicked this tick, equals both stop
    let fresh_i = freshly_kicked(state, old_dirs, i);
    for j in 0..bomb_dest.len() {
        if j == i || bomb_dest[j] != target {
            continue;
        }
        if bomb_dest[j] == state.board.bombs[j].position() {
            continue;
        }
        if fresh_i || !freshly_kicked(state, old_dirs, j) {
            return true;
        }
    }

    false
}

/// A moving bomb meeting a kicker on its target cell is passed on in the
/// kicker's own movement direction, if the cell beyond is free.
fn try_kick_transfer(
    state: &mut State,
    old_pos: &[Position; AGENT_COUNT],
    bomb_dest: &mut [Position],
    i: usize,
    target: Position,
) -> bool {
    if state.board.bombs[i].direction() == Direction::Idle || is_out_of_bounds(target) {
        return false;
    }
    let Some(kicker) = state.board.get_agent(target.x, target.y) else {
        return false;
    };
    if !state.board.agents[kicker].can_kick {
        return false;
    }
    let step_vec = state.board.agents[kicker].position() - old_pos[kicker];
    let Some(dir) = direction_of_step(step_vec) else {
        return false;
    };
    if dir == Direction::Idle {
        return false;
    }

    let beyond = state.board.agents[kicker].position() + step_vec;
    if is_out_of_bounds(beyond) {
        return false;
    }
    let source = state.board.bombs[i].position();
    if beyond != source {
        let cell = state.board.item_at(beyond);
        if types::is_static_movement_block(cell) || types::is_agent(cell) {
            return false;
        }
        if state.board.has_bomb(beyond.x, beyond.y) {
            return false;
        }
    }
    // not already claimed by another moving bomb
    for j in 0..bomb_dest.len() {
        if j != i
            && bomb_dest[j] == beyond
            && bomb_dest[j] != state.board.bombs[j].position()
        {
            return false;
        }
    }

    state.board.bombs[i].set_direction(dir);
    bomb_dest[i] = beyond;
    true
}

/// Recursively undoes an agent's move: the agent returns to its origin,
/// displacing in turn any agent already sitting there; a bomb that was
/// rolling into the origin is stopped and returned as well, together with
/// whoever rode it. A kick the reverted agent performed this tick is undone
/// with the move.
fn chain_revert(
    state: &mut State,
    moves: &[Move; AGENT_COUNT],
    bomb_dest: &mut Vec<Position>,
    id: usize,
) {
    let pos = state.board.agents[id].position();

    if let Some(bi) = state.board.get_bomb_index(pos.x, pos.y) {
        let b = state.board.bombs[bi];
        if b.direction() != Direction::Idle && moves[id].direction() == Some(b.direction()) {
            state.board.bombs[bi].set_direction(Direction::Idle);
            bomb_dest[bi] = b.position();
        }
    }

    let origin = origin_position(pos, moves[id]);
    if is_out_of_bounds(origin) {
        return;
    }

    let origin_agent = state
        .board
        .get_agent(origin.x, origin.y)
        .filter(|&j| j != id);
    let rolling_in = (0..bomb_dest.len()).find(|&k| {
        bomb_dest[k] == origin && bomb_dest[k] != state.board.bombs[k].position()
    });

    state.board.agents[id].set_position(origin);
    state.board.set_item_at(origin, agent_cell(id));

    if let Some(j) = origin_agent {
        if moves[j] != Move::Idle && moves[j] != Move::Bomb {
            chain_revert(state, moves, bomb_dest, j);
        }
        return;
    }

    if let Some(k) = rolling_in {
        let bomb_origin = state.board.bombs[k].position();
        let rider = state.board.get_agent(bomb_origin.x, bomb_origin.y);
        state.board.bombs[k].set_direction(Direction::Idle);
        bomb_dest[k] = bomb_origin;
        state.board.set_item_at(bomb_origin, types::BOMB);
        if let Some(r) = rider {
            if moves[r] != Move::Idle && moves[r] != Move::Bomb {
                chain_revert(state, moves, bomb_dest, r);
            }
        }
    }
}

/// Applies the settled destinations. A bomb landing on a flame is flagged
/// and detonated after every bomb has stepped, so simultaneous hits resolve
/// deterministically in queue order. A bomb rolling into fog (reconstructed
/// states only) is dropped.
fn move_bombs(state: &mut State, bomb_dest: &mut Vec<Position>) {
    let mut i = 0;
    while i < state.board.bombs.len() {
        let source = state.board.bombs[i].position();
        let target = bomb_dest[i];
        if target == source {
            i += 1;
            continue;
        }

        state.board.bombs[i].set_position(target);
        if !state.board.has_bomb(source.x, source.y)
            && state.board.item_at(source) == types::BOMB
        {
            state.board.set_item_at(source, types::PASSAGE);
        }

        let cell = state.board.item_at(target);
        if cell == types::FOG {
            state.board.bombs.remove_at(i);
            bomb_dest.remove(i);
            continue;
        }
        if types::is_walkable(cell) {
            state.board.set_item_at(target, types::BOMB);
        } else if types::is_flame(cell) {
            state.board.bombs[i].set_flag(true);
        }
        i += 1;
    }

    // deferred flame hits
    loop {
        let flagged = (0..state.board.bombs.len()).find(|&k| state.board.bombs[k].flag());
        match flagged {
            Some(k) => state.explode_bomb_at(k),
            None => break,
        }
    }
}

/// Decrements every bomb timer, then detonates expired bombs head-first.
fn tick_bombs(state: &mut State) {
    for i in 0..state.board.bombs.len() {
        state.board.bombs[i].tick();
    }
    while !state.board.bombs.is_empty() && state.board.bombs[0].time_left() <= 0 {
        state.explode_bomb_at(0);
    }
}
