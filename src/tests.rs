//! Cross-module scenario tests for the step and observation pipelines.

use crate::agent::Agent;
use crate::agents::RandomAgent;
use crate::observation::{ItemAgeGrid, Observation};
use crate::state::State;
use crate::types::{
    self, agent_cell, in_view_range, AgentInfoVisibility, Direction, GameMode, Move,
    ObservationParameters, Position, AGENT_COUNT, BOARD_SIZE, BOMB_LIFETIME, FLAME_LIFETIME,
};

fn assert_agent(state: &State, id: usize, x: i32, y: i32) {
    assert_eq!(
        state.board.agents[id].position(),
        Position::new(x, y),
        "agent {} record",
        id
    );
    assert_eq!(
        state.board.item_at(Position::new(x, y)),
        agent_cell(id),
        "agent {} cell",
        id
    );
}

fn several_steps(state: &mut State, times: usize, moves: &[Move; AGENT_COUNT]) {
    for _ in 0..times {
        state.step(moves);
    }
}

fn corners_state() -> State {
    let mut state = State::new();
    state.board.put_agents_in_corners([0, 1, 2, 3], 0);
    state
}

// ============================================================================
// Agent movement
// ============================================================================

#[test]
fn basic_moves_in_all_directions() {
    let mut state = corners_state();
    let mut moves = [Move::Idle; AGENT_COUNT];

    moves[0] = Move::Right;
    state.step(&moves);
    assert_agent(&state, 0, 1, 0);

    moves[0] = Move::Down;
    state.step(&moves);
    assert_agent(&state, 0, 1, 1);

    moves[0] = Move::Left;
    state.step(&moves);
    assert_agent(&state, 0, 0, 1);

    moves[0] = Move::Up;
    state.step(&moves);
    assert_agent(&state, 0, 0, 0);

    moves[3] = Move::Up;
    state.step(&moves);
    assert_agent(&state, 3, 0, 9);
}

#[test]
fn destination_collision_blocks_both() {
    let mut state = State::new();
    state.board.put_agent(0, 1, 0);
    state.board.put_agent(2, 1, 1);
    state.kill(2);
    state.kill(3);

    state.step(&[Move::Right, Move::Left, Move::Idle, Move::Idle]);
    assert_agent(&state, 0, 0, 1);
    assert_agent(&state, 1, 2, 1);
}

#[test]
fn dead_agents_do_not_collide() {
    let mut state = State::new();
    state.board.put_agent(0, 1, 0);
    state.board.put_agent(2, 1, 1);
    state.kill(1);
    state.kill(2);
    state.kill(3);

    state.step(&[Move::Right, Move::Left, Move::Idle, Move::Idle]);
    assert_agent(&state, 0, 1, 1);
}

#[test]
fn swaps_are_forbidden_even_without_third_party() {
    let mut state = State::new();
    state.board.put_agent(0, 0, 0);
    state.board.put_agent(1, 0, 1);
    state.kill(2);
    state.kill(3);

    state.step(&[Move::Right, Move::Left, Move::Idle, Move::Idle]);
    assert_agent(&state, 0, 0, 0);
    assert_agent(&state, 1, 1, 0);
}

#[test]
fn four_way_collision_on_center() {
    let mut state = State::new();
    state.board.put_agent(0, 1, 0);
    state.board.put_agent(2, 1, 1);
    state.board.put_agent(1, 0, 2);
    state.board.put_agent(1, 2, 3);

    state.step(&[Move::Right, Move::Left, Move::Down, Move::Up]);
    assert_agent(&state, 0, 0, 1);
    assert_agent(&state, 1, 2, 1);
    assert_agent(&state, 2, 1, 0);
    assert_agent(&state, 3, 1, 2);
}

// ============================================================================
// Ouroboros
// ============================================================================

fn ouroboros_state() -> State {
    let mut state = State::new();
    state.board.put_agent(0, 0, 0);
    state.board.put_agent(1, 0, 1);
    state.board.put_agent(1, 1, 2);
    state.board.put_agent(0, 1, 3);
    state
}

const ROTATE: [Move; AGENT_COUNT] = [Move::Right, Move::Down, Move::Left, Move::Up];

fn assert_rotated(state: &State, moved: bool) {
    if moved {
        assert_agent(state, 3, 0, 0);
        assert_agent(state, 0, 1, 0);
        assert_agent(state, 1, 1, 1);
        assert_agent(state, 2, 0, 1);
    } else {
        assert_agent(state, 0, 0, 0);
        assert_agent(state, 1, 1, 0);
        assert_agent(state, 2, 1, 1);
        assert_agent(state, 3, 0, 1);
    }
}

#[test]
fn ouroboros_rotates() {
    let mut state = ouroboros_state();
    state.step(&ROTATE);
    assert_rotated(&state, true);
}

#[test]
fn ouroboros_with_bomb_blocks_rotation() {
    let mut state = ouroboros_state();
    state.try_put_bomb(0, false, false);
    state.step(&ROTATE);
    assert_rotated(&state, false);
}

#[test]
fn ouroboros_with_kicker_rotates() {
    let mut state = ouroboros_state();
    state.try_put_bomb(1, false, false);
    state.board.agents[0].can_kick = true;
    state.step(&ROTATE);
    assert_rotated(&state, true);
    assert_eq!(state.board.item_at(Position::new(2, 0)), types::BOMB);
}

#[test]
fn ouroboros_kick_blocked_by_obstacles() {
    for item in [
        types::WOOD,
        types::RIGID,
        types::EXTRA_BOMB,
        types::INCR_RANGE,
        types::KICK,
    ] {
        let mut state = ouroboros_state();
        state.try_put_bomb(1, false, false);
        state.board.agents[0].can_kick = true;
        state.board.put_item(2, 0, item);
        state.step(&ROTATE);
        assert_rotated(&state, false);
    }
}

#[test]
fn ouroboros_vertical_kick_rotates() {
    let mut state = ouroboros_state();
    state.try_put_bomb(2, false, false);
    state.board.agents[1].can_kick = true;
    state.step(&ROTATE);
    assert_rotated(&state, true);
    assert_eq!(state.board.item_at(Position::new(1, 2)), types::BOMB);
}

#[test]
fn ouroboros_kick_off_board_blocks_rotation() {
    let mut state = ouroboros_state();
    state.try_put_bomb(0, false, false);
    state.board.agents[3].can_kick = true;
    state.step(&ROTATE);
    assert_rotated(&state, false);
}

#[test]
fn ouroboros_all_planting_blocks_rotation() {
    let mut state = ouroboros_state();
    state.step(&[Move::Bomb; AGENT_COUNT]);
    state.step(&ROTATE);
    assert_rotated(&state, false);
}

// ============================================================================
// Bombs and flames
// ============================================================================

#[test]
fn bomb_detonation_after_lifetime() {
    let mut state = State::new();
    state.board.put_agent(5, 5, 0);
    state.kill(1);
    state.kill(2);
    state.kill(3);

    let mut moves = [Move::Idle; AGENT_COUNT];
    moves[0] = Move::Bomb;
    state.step(&moves);

    // step clear of the blast radius, then wait
    moves[0] = Move::Up;
    state.step(&moves);
    state.step(&moves);
    moves[0] = Move::Idle;
    several_steps(&mut state, BOMB_LIFETIME as usize - 3, &moves);
    assert_eq!(state.board.item_at(Position::new(5, 5)), types::BOMB);
    state.step(&moves);

    // flame cross of half-length 1 around (5, 5); the agent is safe one
    // cell further up
    for p in [
        Position::new(5, 5),
        Position::new(4, 5),
        Position::new(6, 5),
        Position::new(5, 6),
    ] {
        assert!(types::is_flame(state.board.item_at(p)), "{}", p);
    }
    // (5, 4) burned too, which is why the agent had to keep clear
    assert!(types::is_flame(state.board.item_at(Position::new(5, 4))));
    assert_eq!(state.board.agents[0].position(), Position::new(5, 3));
    assert!(!state.board.agents[0].dead);
    assert!(state.board.bombs.is_empty());
}

#[test]
fn chain_explosion_of_two_bombs() {
    let mut state = State::new();
    state.board.put_agent(5, 5, 0);
    state.board.put_agent(4, 5, 1);
    state.kill(2);
    state.kill(3);

    let mut moves = [Move::Idle; AGENT_COUNT];
    moves[0] = Move::Bomb;
    state.step(&moves);

    moves[0] = Move::Down;
    moves[1] = Move::Bomb;
    state.step(&moves);

    moves[0] = Move::Down;
    moves[1] = Move::Down;
    several_steps(&mut state, BOMB_LIFETIME as usize - 2, &moves);
    assert_eq!(state.board.bombs.len(), 2);

    // both bombs go off in the same tick via the chain
    state.step(&moves);
    assert!(state.board.bombs.is_empty());
    for x in 3..=6 {
        assert!(
            types::is_flame(state.board.item_at(Position::new(x, 5))),
            "({}, 5)",
            x
        );
    }
    for p in [
        Position::new(5, 4),
        Position::new(5, 6),
        Position::new(4, 4),
        Position::new(4, 6),
    ] {
        assert!(types::is_flame(state.board.item_at(p)), "{}", p);
    }
    assert!(!state.board.agents[0].dead);
    assert!(!state.board.agents[1].dead);
}

#[test]
fn kick_travels_until_the_wall() {
    let mut state = State::new();
    state.board.put_agent(0, 1, 0);
    state.board.agents[0].can_kick = true;
    state.board.put_bomb(1, 1, 0, 1, 15, true);
    state.kill(1);
    state.kill(2);
    state.kill(3);

    let mut moves = [Move::Idle; AGENT_COUNT];
    moves[0] = Move::Right;
    state.step(&moves);
    assert_agent(&state, 0, 1, 1);
    assert_eq!(state.board.bombs[0].position(), Position::new(2, 1));

    // the bomb keeps rolling one cell per tick until the board edge
    moves[0] = Move::Idle;
    for x in 3..=10 {
        state.step(&moves);
        assert_eq!(state.board.bombs[0].position(), Position::new(x, 1));
    }
    state.step(&moves);
    assert_eq!(state.board.bombs[0].position(), Position::new(10, 1));
    assert_eq!(state.board.bombs[0].direction(), Direction::Idle);
    assert_agent(&state, 0, 1, 1);
}

#[test]
fn ray_burns_only_the_first_wood() {
    let mut state = State::new();
    state.board.put_agent(0, 0, 0);
    state.board.put_item(7, 5, types::WOOD);
    state.board.put_item(8, 5, types::WOOD);
    state.board.put_bomb(6, 5, 0, 5, 9, true);

    several_steps(&mut state, BOMB_LIFETIME as usize, &[Move::Idle; AGENT_COUNT]);

    assert!(types::is_flame(state.board.item_at(Position::new(7, 5))));
    assert!(types::is_wood(state.board.item_at(Position::new(8, 5))));
}

#[test]
fn chained_bomb_does_not_reburn_fresh_wood() {
    let mut state = State::new();
    state.board.put_agent(0, 0, 0);
    state.board.agents[0].max_bomb_count = 2;
    state.board.put_item(8, 6, types::WOOD);
    state.board.put_item(9, 6, types::WOOD);
    state.board.put_bomb(7, 6, 0, 5, 9, true);
    state.board.put_bomb(6, 6, 0, 5, 9, true);

    several_steps(&mut state, BOMB_LIFETIME as usize, &[Move::Idle; AGENT_COUNT]);

    // the first wood burned, the one behind it survived the chain
    assert!(types::is_flame(state.board.item_at(Position::new(8, 6))));
    assert!(types::is_wood(state.board.item_at(Position::new(9, 6))));
    assert!(types::is_flame(state.board.item_at(Position::new(6, 6))));
    assert!(types::is_flame(state.board.item_at(Position::new(7, 6))));
    assert!(state.board.bombs.is_empty());
}

#[test]
fn overlapping_flames_expire_independently() {
    let mut state = State::new();
    state.board.put_agents_in_corners([0, 1, 2, 3], 0);
    let idle = [Move::Idle; AGENT_COUNT];

    state.spawn_flames(5, 5, 4);
    state.step(&idle);

    state.spawn_flames(6, 6, 4);
    several_steps(&mut state, FLAME_LIFETIME as usize - 1, &idle);

    // the first cross expired, the overlap was refreshed by the second
    assert!(!types::is_flame(state.board.item_at(Position::new(5, 5))));
    assert!(types::is_flame(state.board.item_at(Position::new(6, 5))));
    assert!(types::is_flame(state.board.item_at(Position::new(5, 6))));

    state.step(&idle);
    assert!(!types::is_flame(state.board.item_at(Position::new(6, 5))));
    assert!(!types::is_flame(state.board.item_at(Position::new(5, 6))));
    assert!(state.board.flames.is_empty());
}

// ============================================================================
// Observations
// ============================================================================

fn assert_correct_fog(state: &State, agent_id: usize, board: &crate::board::Board, view: i32) {
    let center = state.board.agents[agent_id].position();
    for y in 0..BOARD_SIZE {
        for x in 0..BOARD_SIZE {
            let in_range = in_view_range(center, Position::new(x as i32, y as i32), view);
            let is_fog = board.items[y][x] == types::FOG;
            assert_ne!(in_range, is_fog, "cell ({}, {})", x, y);
        }
    }
}

#[test]
fn fog_round_trip_preserves_the_visible_world() {
    let mut state = State::new();
    state.init(GameMode::FreeForAll, 1234, -1);

    let params = ObservationParameters {
        agent_partial_map_view: true,
        agent_view_size: 4,
        ..ObservationParameters::default()
    };
    let obs = Observation::get(&state, 2, params);
    assert_correct_fog(&state, 2, &obs.board, 4);

    let mut round_tripped = State::new();
    obs.to_state(&mut round_tripped);

    assert_correct_fog(&state, 2, &round_tripped.board, 4);
    assert_eq!(round_tripped.alive_agents, state.alive_agents);
    assert_eq!(
        round_tripped.board.agents[2].position(),
        state.board.agents[2].position()
    );
    assert_eq!(round_tripped.board.agents[2].team, state.board.agents[2].team);
    assert!(round_tripped.board.agents[2].visible);
}

#[test]
fn full_observation_to_state_reproduces_the_state() {
    let mut state = State::new();
    state.init(GameMode::FreeForAll, 77, -1);

    let mut agents: Vec<RandomAgent> = (0..4).map(|i| RandomAgent::new(100 + i)).collect();
    for _ in 0..20 {
        let mut moves = [Move::Idle; AGENT_COUNT];
        for i in 0..AGENT_COUNT {
            let obs = Observation::get(&state, i, ObservationParameters::default());
            moves[i] = agents[i].act(&obs);
        }
        state.step(&moves);
        if state.finished {
            break;
        }
    }

    let obs = Observation::get(&state, 1, ObservationParameters::default());
    let mut reproduced = State::new();
    obs.to_state(&mut reproduced);

    assert_eq!(reproduced.board, state.board);
    assert_eq!(reproduced.alive_agents, state.alive_agents);
    assert_eq!(reproduced.finished, state.finished);
}

#[test]
fn planning_steps_run_on_reconstructed_states() {
    let mut state = State::new();
    state.init(GameMode::FreeForAll, 1234, -1);

    let params = ObservationParameters {
        agent_partial_map_view: true,
        agent_view_size: 4,
        ..ObservationParameters::default()
    };
    let obs = Observation::get(&state, 0, params);
    let mut planning = State::new();
    obs.to_state(&mut planning);

    let mut moves = [Move::Idle; AGENT_COUNT];

    // planting on the reconstruction kills the planner on schedule
    moves[0] = Move::Bomb;
    planning.step(&moves);
    moves[0] = Move::Idle;
    for _ in 0..BOMB_LIFETIME {
        planning.step(&moves);
    }
    assert!(planning.board.agents[0].dead);
}

#[test]
fn virtual_step_keeps_tracked_bombs_on_schedule() {
    let mut state = State::new();
    state.board.time_step = 0;
    state.board.put_agents_in_corners([0, 1, 2, 3], 1);

    let params = ObservationParameters {
        agent_partial_map_view: true,
        agent_view_size: 1,
        ..ObservationParameters::default()
    };

    let mut reconstructed = State::new();
    Observation::get(&state, 0, params).to_state(&mut reconstructed);

    let mut age: ItemAgeGrid = [[0; BOARD_SIZE]; BOARD_SIZE];
    let mut moves = [Move::Idle; AGENT_COUNT];

    // walk towards agent 1 on the top edge
    moves[0] = Move::Right;
    for _ in 0..BOARD_SIZE - 4 {
        state.step(&moves);
        let obs = Observation::get(&state, 0, params);
        obs.virtual_step(&mut reconstructed, true, true, Some(&mut age));
    }
    assert_agent(&state, 0, BOARD_SIZE as i32 - 3, 1);
    assert_agent(&state, 1, BOARD_SIZE as i32 - 2, 1);

    // plant right next to agent 1, then run away downwards
    let bomb_cell = Position::new(BOARD_SIZE as i32 - 3, 1);
    moves[0] = Move::Bomb;
    state.step(&moves);
    assert!(state.board.has_bomb(bomb_cell.x, bomb_cell.y));
    let obs = Observation::get(&state, 0, params);
    obs.virtual_step(&mut reconstructed, true, true, Some(&mut age));

    moves[0] = Move::Down;
    for i in 0..BOMB_LIFETIME as usize - 1 {
        state.step(&moves);
        let obs = Observation::get(&state, 0, params);
        if i >= 1 {
            // the bomb is out of view but survives in the reconstruction
            assert_eq!(obs.board.item_at(bomb_cell), types::FOG);
        }
        obs.virtual_step(&mut reconstructed, true, true, Some(&mut age));
        assert_eq!(reconstructed.board.item_at(bomb_cell), types::BOMB);
    }

    // the tracked bomb detonates on schedule, killing agent 1 in the
    // reconstruction just like in truth
    state.step(&moves);
    assert!(state.board.agents[1].dead);
    let obs = Observation::get(&state, 0, params);
    assert_eq!(obs.board.item_at(bomb_cell), types::FOG);
    obs.virtual_step(&mut reconstructed, true, true, Some(&mut age));

    assert!(types::is_flame(reconstructed.board.item_at(bomb_cell)));
    assert!(reconstructed.board.agents[1].dead);
    assert_eq!(
        age[bomb_cell.y as usize][bomb_cell.x as usize],
        BOMB_LIFETIME - 1
    );

    // the reconstructed flames vanish again
    for _ in 0..FLAME_LIFETIME {
        state.step(&moves);
        let obs = Observation::get(&state, 0, params);
        obs.virtual_step(&mut reconstructed, true, true, Some(&mut age));
    }
    assert_eq!(reconstructed.board.item_at(bomb_cell), types::PASSAGE);
}

#[test]
fn track_stats_infers_kicking_from_bomb_motion() {
    let mut state = State::new();
    state.board.put_agent(0, 1, 0);
    state.board.put_agent(5, 5, 1);
    state.board.agents[0].can_kick = true;
    state.board.put_bomb(1, 1, 0, 1, 9, true);
    state.board.time_step = 1;
    state.kill(2);
    state.kill(3);

    // the observer only sees its own stats
    let params = ObservationParameters {
        agent_info_visibility: AgentInfoVisibility::OnlySelf,
        ..ObservationParameters::default()
    };
    let before = Observation::get(&state, 1, params);
    assert!(!before.board.agents[0].stats_visible);
    assert!(!before.board.agents[0].can_kick);

    // agent 0 kicks the bomb
    let mut moves = [Move::Idle; AGENT_COUNT];
    moves[0] = Move::Right;
    state.step(&moves);
    assert_eq!(state.board.bombs[0].direction(), Direction::Right);

    let mut after = Observation::get(&state, 1, params);
    after.track_stats(&before.board);

    // the bomb changed direction without a known kick source: agent 0 must
    // be able to kick
    assert!(after.board.agents[0].stats_visible);
    assert!(after.board.agents[0].can_kick);
}

// ============================================================================
// Universal invariants
// ============================================================================

fn assert_invariants(state: &State) {
    // bomb counts match the queue
    let counted: i32 = state.board.agents.iter().map(|a| a.bomb_count).sum();
    assert_eq!(counted, state.board.bombs.len() as i32);

    // bomb timers stay in range, and the queue is sorted by expiry
    for i in 0..state.board.bombs.len() {
        let b = state.board.bombs[i];
        assert!(b.time_left() >= 0 && b.time_left() < BOMB_LIFETIME + 2);
        if i > 0 {
            assert!(state.board.bombs[i - 1].time_left() <= b.time_left());
        }
    }

    // flame differentials sum to the current flame time
    if state.board.current_flame_time != -1 {
        let sum: i32 = state.board.flames.iter().map(|f| f.time_left).sum();
        assert_eq!(sum, state.board.current_flame_time);
    }

    // no two alive agents share a cell
    for i in 0..AGENT_COUNT {
        if state.board.agents[i].dead {
            continue;
        }
        for j in i + 1..AGENT_COUNT {
            if state.board.agents[j].dead {
                continue;
            }
            assert_ne!(
                state.board.agents[i].position(),
                state.board.agents[j].position()
            );
        }
    }

    // alive count matches the records
    let alive = state.board.agents.iter().filter(|a| !a.dead).count() as i32;
    assert_eq!(alive, state.alive_agents);

    // alive agents stand on their own cells
    for i in 0..AGENT_COUNT {
        let agent = &state.board.agents[i];
        if agent.dead {
            continue;
        }
        assert_eq!(state.board.item_at(agent.position()), agent_cell(i));
    }
}

#[test]
fn random_rollouts_preserve_invariants() {
    for seed in [1u64, 17, 4711] {
        let mut state = State::new();
        state.init(GameMode::FreeForAll, seed as i64, seed as i64);

        let mut agents: Vec<RandomAgent> =
            (0..AGENT_COUNT as u64).map(|i| RandomAgent::new(seed * 31 + i)).collect();

        for _ in 0..150 {
            let dead_before: Vec<bool> =
                state.board.agents.iter().map(|a| a.dead).collect();

            let mut moves = [Move::Idle; AGENT_COUNT];
            for i in 0..AGENT_COUNT {
                let obs = Observation::get(&state, i, ObservationParameters::default());
                moves[i] = agents[i].act(&obs);
            }
            state.step(&moves);

            // dead agents stay dead
            for i in 0..AGENT_COUNT {
                assert!(!dead_before[i] || state.board.agents[i].dead);
            }
            assert_invariants(&state);

            if state.finished {
                let frozen = state.clone();
                state.step(&moves);
                assert_eq!(state, frozen);
                break;
            }
        }
    }
}

#[test]
fn state_serde_round_trip() {
    let mut state = State::new();
    state.init(GameMode::TwoTeams, 2024, 5);
    state.spawn_flames(5, 5, 2);
    state.try_put_bomb(0, false, true);

    let json = serde_json::to_string(&state).unwrap();
    let back: State = serde_json::from_str(&json).unwrap();
    assert_eq!(back, state);
}
