//! JSON bridge to the Python Pommerman environment.
//!
//! Maps the wire encoding (board codes, `(row, column)` coordinates,
//! blast strength = internal strength + 1) onto the internal model. All
//! input errors are reported with context instead of panicking.

use serde_json::Value;

use crate::agent::{Agent, TeamMessage};
use crate::board::Board;
use crate::bomb::{Bomb, Flame};
use crate::observation::Observation;
use crate::state::State;
use crate::types::{
    self, team_of, Cell, Direction, GameMode, Move, ObservationParameters, Position, AGENT_COUNT,
    BOARD_SIZE,
};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    Parse { reason: String },
    MissingField { field: String },
    WrongType { field: String },
    UnknownItem { code: i64 },
    UnknownDirection { code: i64 },
    UnknownGameMode { code: i64 },
    BoardSizeMismatch { expected: usize, got: i64 },
    ValueMismatch { field: String, expected: i64, got: i64 },
    AgentPlacement { agent_id: usize, x: i32, y: i32, found: Cell },
    FlamePlacement { x: i32, y: i32, found: Cell },
    PowerUpPlacement { x: i32, y: i32, found: Cell },
    AgentNotInitialized,
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::Parse { reason } => write!(f, "invalid json: {}", reason),
            BridgeError::MissingField { field } => write!(f, "missing field '{}'", field),
            BridgeError::WrongType { field } => write!(f, "unexpected type for '{}'", field),
            BridgeError::UnknownItem { code } => write!(f, "unknown board item {}", code),
            BridgeError::UnknownDirection { code } => write!(f, "unknown direction {}", code),
            BridgeError::UnknownGameMode { code } => write!(f, "unsupported game mode {}", code),
            BridgeError::BoardSizeMismatch { expected, got } => {
                write!(f, "board size mismatch: expected {}, got {}", expected, got)
            }
            BridgeError::ValueMismatch {
                field,
                expected,
                got,
            } => write!(
                f,
                "incorrect value for '{}': expected {}, got {}",
                field, expected, got
            ),
            BridgeError::AgentPlacement {
                agent_id,
                x,
                y,
                found,
            } => write!(
                f,
                "expected agent {} at ({}, {}), found cell {}",
                agent_id, x, y, found
            ),
            BridgeError::FlamePlacement { x, y, found } => {
                write!(f, "flame at ({}, {}) without flame cell (found {})", x, y, found)
            }
            BridgeError::PowerUpPlacement { x, y, found } => {
                write!(f, "power-up at ({}, {}) on cell {}", x, y, found)
            }
            BridgeError::AgentNotInitialized => {
                write!(f, "bridge agent has not been reset with an id")
            }
        }
    }
}

impl std::error::Error for BridgeError {}

// ============================================================================
// Wire code mappings
// ============================================================================

/// Maps a Python board code to an internal cell value.
pub fn item_from_code(code: i64) -> Result<Cell, BridgeError> {
    Ok(match code {
        0 => types::PASSAGE,
        1 => types::RIGID,
        2 => types::WOOD,
        3 => types::BOMB,
        4 => types::FLAME,
        5 => types::FOG,
        6 => types::EXTRA_BOMB,
        7 => types::INCR_RANGE,
        8 => types::KICK,
        9 => types::AGENT_DUMMY,
        10..=13 => types::agent_cell((code - 10) as usize),
        _ => return Err(BridgeError::UnknownItem { code }),
    })
}

/// Maps a Python direction code to an internal direction.
pub fn direction_from_code(code: i64) -> Result<Direction, BridgeError> {
    Direction::from_index(code as i32).ok_or(BridgeError::UnknownDirection { code })
}

/// Maps a Python game type to an internal game mode.
pub fn game_mode_from_code(code: i64) -> Result<GameMode, BridgeError> {
    Ok(match code {
        1 => GameMode::FreeForAll,
        2 => GameMode::TwoTeams,
        3 => GameMode::TeamRadio,
        _ => return Err(BridgeError::UnknownGameMode { code }),
    })
}

// ============================================================================
// Json helpers
// ============================================================================

fn field<'a>(value: &'a Value, name: &str) -> Result<&'a Value, BridgeError> {
    value.get(name).ok_or_else(|| BridgeError::MissingField {
        field: name.to_string(),
    })
}

fn as_i64(value: &Value, name: &str) -> Result<i64, BridgeError> {
    // python serializes some matrices as floats
    if let Some(v) = value.as_i64() {
        return Ok(v);
    }
    value
        .as_f64()
        .map(|v| v as i64)
        .ok_or_else(|| BridgeError::WrongType {
            field: name.to_string(),
        })
}

fn int_field(value: &Value, name: &str) -> Result<i64, BridgeError> {
    as_i64(field(value, name)?, name)
}

fn as_bool(value: &Value, name: &str) -> Result<bool, BridgeError> {
    value.as_bool().ok_or_else(|| BridgeError::WrongType {
        field: name.to_string(),
    })
}

fn matrix_entry<'a>(
    matrix: &'a Value,
    name: &str,
    x: usize,
    y: usize,
) -> Result<&'a Value, BridgeError> {
    matrix
        .get(y)
        .and_then(|row| row.get(x))
        .ok_or_else(|| BridgeError::WrongType {
            field: name.to_string(),
        })
}

/// Wire coordinates are `(row, column)`; internally `x` is the column.
fn position_from_pair(value: &Value, name: &str) -> Result<Position, BridgeError> {
    let row = as_i64(value.get(0).ok_or_else(|| BridgeError::WrongType {
        field: name.to_string(),
    })?, name)?;
    let column = as_i64(value.get(1).ok_or_else(|| BridgeError::WrongType {
        field: name.to_string(),
    })?, name)?;
    Ok(Position::new(column as i32, row as i32))
}

// ============================================================================
// State import
// ============================================================================

fn board_cells_from_json(py_board: &Value, board: &mut Board) -> Result<(), BridgeError> {
    for y in 0..BOARD_SIZE {
        for x in 0..BOARD_SIZE {
            let code = as_i64(matrix_entry(py_board, "board", x, y)?, "board")?;
            board.items[y][x] = item_from_code(code)?;
        }
    }
    Ok(())
}

fn bomb_from_json(py_bomb: &Value) -> Result<Bomb, BridgeError> {
    let mut bomb = Bomb(0);
    let owner = int_field(py_bomb, "bomber_id")?;
    bomb.set_owner(owner.clamp(0, AGENT_COUNT as i64) as usize);
    let position = position_from_pair(field(py_bomb, "position")?, "position")?;
    if types::is_out_of_bounds(position) {
        return Err(BridgeError::WrongType {
            field: "position".to_string(),
        });
    }
    bomb.set_position(position);
    // wire blast strength includes the bomb's own cell
    bomb.set_strength(int_field(py_bomb, "blast_strength")? as i32 - 1);

    let moving = field(py_bomb, "moving_direction")?;
    if moving.is_null() {
        bomb.set_direction(Direction::Idle);
    } else {
        bomb.set_direction(direction_from_code(as_i64(moving, "moving_direction")?)?);
    }

    bomb.set_flag(false);
    bomb.set_time_left(int_field(py_bomb, "life")? as i32);
    Ok(bomb)
}

fn push_bomb_sorted(board: &mut Board, bomb: Bomb) {
    let at = (0..board.bombs.len())
        .find(|&i| board.bombs[i].time_left() > bomb.time_left())
        .unwrap_or(board.bombs.len());
    board.bombs.insert_at(at, bomb);
}

/// Adds a flame, merging duplicate entries at the same position by taking
/// the maximum lifetime.
fn push_flame_merged(board: &mut Board, flame: Flame) {
    for i in 0..board.flames.len() {
        if board.flames[i].position == flame.position {
            if flame.time_left > board.flames[i].time_left {
                board.flames[i].time_left = flame.time_left;
            }
            return;
        }
    }
    board.flames.push(flame);
}

/// Decodes a full Python state into a [`State`].
pub fn state_from_json(json: &str, game_mode: GameMode) -> Result<State, BridgeError> {
    let py_state: Value = serde_json::from_str(json).map_err(|e| BridgeError::Parse {
        reason: e.to_string(),
    })?;

    let board_size = int_field(&py_state, "board_size")?;
    if board_size != BOARD_SIZE as i64 {
        return Err(BridgeError::BoardSizeMismatch {
            expected: BOARD_SIZE,
            got: board_size,
        });
    }

    let mut state = State::new();
    state.board.time_step = int_field(&py_state, "step_count")? as i32;

    board_cells_from_json(field(&py_state, "board")?, &mut state.board)?;

    // bombs first: agent records derive their active counts from them
    for agent in state.board.agents.iter_mut() {
        agent.bomb_count = 0;
    }
    let py_bombs = field(&py_state, "bombs")?
        .as_array()
        .ok_or_else(|| BridgeError::WrongType {
            field: "bombs".to_string(),
        })?;
    for py_bomb in py_bombs {
        let bomb = bomb_from_json(py_bomb)?;
        if bomb.owner() < AGENT_COUNT {
            state.board.agents[bomb.owner()].bomb_count += 1;
        }
        push_bomb_sorted(&mut state.board, bomb);
    }

    // agents
    let py_agents = field(&py_state, "agents")?
        .as_array()
        .ok_or_else(|| BridgeError::WrongType {
            field: "agents".to_string(),
        })?;
    let mut alive = 0;
    for i in 0..AGENT_COUNT {
        let py_info = py_agents.get(i).ok_or_else(|| BridgeError::WrongType {
            field: "agents".to_string(),
        })?;
        let wire_id = int_field(py_info, "agent_id")?;
        if wire_id != i as i64 {
            return Err(BridgeError::ValueMismatch {
                field: "agent_id".to_string(),
                expected: i as i64,
                got: wire_id,
            });
        }

        let active_bombs = state.board.agents[i].bomb_count;
        let pos = position_from_pair(field(py_info, "position")?, "position")?;
        let dead = !py_info
            .get("is_alive")
            .map(|v| as_bool(v, "is_alive"))
            .transpose()?
            .unwrap_or(true);

        let info = &mut state.board.agents[i];
        info.visible = true;
        info.x = pos.x;
        info.y = pos.y;
        info.dead = dead;
        info.stats_visible = true;
        info.can_kick = as_bool(field(py_info, "can_kick")?, "can_kick")?;
        info.bomb_count = active_bombs;
        // ammo counts the remaining bombs only
        info.max_bomb_count = active_bombs + int_field(py_info, "ammo")? as i32;
        info.bomb_strength = int_field(py_info, "blast_strength")? as i32 - 1;
        info.team = team_of(game_mode, i);

        if !dead {
            alive += 1;
            if types::is_out_of_bounds(pos) {
                return Err(BridgeError::WrongType {
                    field: "position".to_string(),
                });
            }
            let cell = state.board.item_at(pos);
            if !types::is_agent(cell) {
                return Err(BridgeError::AgentPlacement {
                    agent_id: i,
                    x: pos.x,
                    y: pos.y,
                    found: cell,
                });
            }
        }
    }
    state.alive_agents = alive;

    // flames
    state.board.current_flame_time = -1;
    let py_flames = field(&py_state, "flames")?
        .as_array()
        .ok_or_else(|| BridgeError::WrongType {
            field: "flames".to_string(),
        })?;
    for py_flame in py_flames {
        let position = position_from_pair(field(py_flame, "position")?, "position")?;
        if types::is_out_of_bounds(position) {
            return Err(BridgeError::WrongType {
                field: "position".to_string(),
            });
        }
        // python flames stay active for one extra step at life 0
        let time_left = int_field(py_flame, "life")? as i32 + 1;

        let cell = state.board.item_at(position);
        if !types::is_flame(cell) {
            return Err(BridgeError::FlamePlacement {
                x: position.x,
                y: position.y,
                found: cell,
            });
        }
        push_flame_merged(
            &mut state.board,
            Flame {
                position,
                time_left,
                destroyed_wood_at: -1,
            },
        );
    }

    // hidden power-ups
    let py_items = field(&py_state, "items")?
        .as_array()
        .ok_or_else(|| BridgeError::WrongType {
            field: "items".to_string(),
        })?;
    for py_item in py_items {
        let position = position_from_pair(
            py_item.get(0).ok_or_else(|| BridgeError::WrongType {
                field: "items".to_string(),
            })?,
            "items",
        )?;
        let power_up = item_from_code(as_i64(
            py_item.get(1).ok_or_else(|| BridgeError::WrongType {
                field: "items".to_string(),
            })?,
            "items",
        )?)?;

        if types::is_out_of_bounds(position) {
            return Err(BridgeError::WrongType {
                field: "items".to_string(),
            });
        }
        let cell = state.board.item_at(position);
        if cell == types::PASSAGE {
            state.board.set_item_at(position, power_up);
        } else if cell == types::WOOD || cell == types::FLAME {
            state
                .board
                .set_item_at(position, cell + Board::item_flag(power_up));
        } else {
            return Err(BridgeError::PowerUpPlacement {
                x: position.x,
                y: position.y,
                found: cell,
            });
        }
    }

    state.board.optimize_flame_queue();
    Ok(state)
}

// ============================================================================
// Observation import
// ============================================================================

/// Decodes a Python observation for the given agent.
pub fn observation_from_json(json: &str, agent_id: usize) -> Result<Observation, BridgeError> {
    let py_obs: Value = serde_json::from_str(json).map_err(|e| BridgeError::Parse {
        reason: e.to_string(),
    })?;

    let game_mode = game_mode_from_code(int_field(&py_obs, "game_type")?)?;

    let mut obs = Observation {
        board: Board::new(),
        agent_id,
        params: ObservationParameters::default(),
    };
    if let Some(step_count) = py_obs.get("step_count") {
        obs.board.time_step = as_i64(step_count, "step_count")? as i32;
    }

    // other agents start out dead and hidden; the board scan below reveals
    // the visible ones and the alive list fixes the life flags
    for i in 0..AGENT_COUNT {
        let info = &mut obs.board.agents[i];
        info.dead = true;
        info.team = team_of(game_mode, i);
        if i != agent_id {
            info.visible = false;
            info.x = -(i as i32);
            info.y = -1;
            info.stats_visible = false;
        }
    }

    let alive = field(&py_obs, "alive")?
        .as_array()
        .ok_or_else(|| BridgeError::WrongType {
            field: "alive".to_string(),
        })?;
    for entry in alive {
        let id = as_i64(entry, "alive")? - 10;
        if (0..AGENT_COUNT as i64).contains(&id) {
            obs.board.agents[id as usize].dead = false;
        }
    }

    // own record from the top-level fields
    {
        let pos = position_from_pair(field(&py_obs, "position")?, "position")?;
        let info = &mut obs.board.agents[agent_id];
        info.visible = true;
        info.x = pos.x;
        info.y = pos.y;
        info.stats_visible = true;
        info.can_kick = as_bool(field(&py_obs, "can_kick")?, "can_kick")?;
        // the own active bomb count is not part of the observation
        info.bomb_count = 0;
        info.max_bomb_count = int_field(&py_obs, "ammo")? as i32;
        info.bomb_strength = int_field(&py_obs, "blast_strength")? as i32 - 1;
    }

    let py_board = field(&py_obs, "board")?;
    let bomb_life = field(&py_obs, "bomb_life")?;
    let bomb_strength = field(&py_obs, "bomb_blast_strength")?;
    let bomb_direction = field(&py_obs, "bomb_moving_direction")?;
    let flame_life = field(&py_obs, "flame_life")?;

    obs.board.current_flame_time = -1;
    let mut saw_fog = false;

    for y in 0..BOARD_SIZE {
        for x in 0..BOARD_SIZE {
            let cell = item_from_code(as_i64(matrix_entry(py_board, "board", x, y)?, "board")?)?;
            obs.board.items[y][x] = cell;
            saw_fog |= cell == types::FOG;

            if cell == types::FLAME {
                let life = as_i64(matrix_entry(flame_life, "flame_life", x, y)?, "flame_life")?;
                push_flame_merged(
                    &mut obs.board,
                    Flame {
                        position: Position::new(x as i32, y as i32),
                        time_left: life as i32,
                        destroyed_wood_at: -1,
                    },
                );
            } else if types::is_agent(cell) {
                let id = types::cell_agent_id(cell);
                if id != agent_id && id < AGENT_COUNT {
                    let info = &mut obs.board.agents[id];
                    info.visible = true;
                    info.x = x as i32;
                    info.y = y as i32;
                }
            }

            let life = as_i64(matrix_entry(bomb_life, "bomb_life", x, y)?, "bomb_life")?;
            if life != 0 {
                let mut bomb = Bomb(0);
                bomb.set_position(Position::new(x as i32, y as i32));
                bomb.set_flag(false);
                // the owner is unknown from a single observation; the
                // sentinel is resolved by stats tracking
                bomb.set_owner(AGENT_COUNT);
                bomb.set_strength(
                    as_i64(
                        matrix_entry(bomb_strength, "bomb_blast_strength", x, y)?,
                        "bomb_blast_strength",
                    )? as i32
                        - 1,
                );
                bomb.set_direction(direction_from_code(as_i64(
                    matrix_entry(bomb_direction, "bomb_moving_direction", x, y)?,
                    "bomb_moving_direction",
                )?)?);
                bomb.set_time_left(life as i32);
                push_bomb_sorted(&mut obs.board, bomb);
            }
        }
    }

    // the python observation does not carry its view parameters; the
    // presence of fog implies a partial view with the standard range
    obs.params.agent_partial_map_view = saw_fog;

    obs.board.optimize_flame_queue();
    Ok(obs)
}

// ============================================================================
// Messages
// ============================================================================

/// Serializes a teammate message with its addressing.
pub fn message_to_json(sender: usize, receiver: usize, message: &TeamMessage) -> String {
    serde_json::json!({
        "sender": sender,
        "receiver": receiver,
        "content": message.words,
    })
    .to_string()
}

/// Parses a teammate message. Returns `(sender, receiver, message)`.
pub fn message_from_json(json: &str) -> Result<(usize, usize, TeamMessage), BridgeError> {
    let value: Value = serde_json::from_str(json).map_err(|e| BridgeError::Parse {
        reason: e.to_string(),
    })?;
    let sender = int_field(&value, "sender")? as usize;
    let receiver = int_field(&value, "receiver")? as usize;
    let content = field(&value, "content")?;
    let word0 = as_i64(content.get(0).ok_or_else(|| BridgeError::WrongType {
        field: "content".to_string(),
    })?, "content")?;
    let word1 = as_i64(content.get(1).ok_or_else(|| BridgeError::WrongType {
        field: "content".to_string(),
    })?, "content")?;
    Ok((sender, receiver, TeamMessage::new(word0 as i32, word1 as i32)))
}

// ============================================================================
// Session
// ============================================================================

/// A bridge session for driving one agent from an external runtime. Owns
/// the agent, its id and its observation buffer; there is no process-wide
/// state, so multiple sessions can coexist.
pub struct BridgeSession {
    agent: Box<dyn Agent>,
    agent_id: Option<usize>,
    observation: Observation,
}

impl BridgeSession {
    pub fn new(agent: Box<dyn Agent>) -> Self {
        Self {
            agent,
            agent_id: None,
            observation: Observation::default(),
        }
    }

    /// Resets the agent for a new episode under the given id.
    pub fn reset(&mut self, agent_id: usize) {
        self.agent_id = Some(agent_id);
        self.agent.reset();
        self.observation = Observation::default();
    }

    /// Decodes a full state, builds the agent's (fully observable)
    /// observation and asks it to act.
    pub fn act_on_state_json(
        &mut self,
        json: &str,
        game_mode: GameMode,
    ) -> Result<Move, BridgeError> {
        let agent_id = self.agent_id.ok_or(BridgeError::AgentNotInitialized)?;
        let state = state_from_json(json, game_mode)?;
        self.observation = Observation::get(&state, agent_id, ObservationParameters::default());
        self.deliver_wire_message(json)?;
        Ok(self.agent.act(&self.observation))
    }

    /// Decodes an observation and asks the agent to act on it.
    pub fn act_on_observation_json(&mut self, json: &str) -> Result<Move, BridgeError> {
        let agent_id = self.agent_id.ok_or(BridgeError::AgentNotInitialized)?;
        self.observation = observation_from_json(json, agent_id)?;
        self.deliver_wire_message(json)?;
        Ok(self.agent.act(&self.observation))
    }

    /// The outgoing message of the agent, validated. Invalid messages are
    /// dropped with a warning.
    pub fn outgoing_message(&mut self) -> Option<TeamMessage> {
        let message = self.agent.take_outgoing()?;
        if !message.is_valid() {
            log::warn!("bridge agent produced invalid message {}, dropped", message);
            return None;
        }
        Some(message)
    }

    /// The observation the agent last acted on.
    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    /// Optional teammate message embedded in the payload; only delivered
    /// while the teammate is alive.
    fn deliver_wire_message(&mut self, json: &str) -> Result<(), BridgeError> {
        let value: Value = serde_json::from_str(json).map_err(|e| BridgeError::Parse {
            reason: e.to_string(),
        })?;
        let Some(message) = value.get("message") else {
            return Ok(());
        };
        if message.is_null() {
            return Ok(());
        }
        let word0 = as_i64(message.get(0).ok_or_else(|| BridgeError::WrongType {
            field: "message".to_string(),
        })?, "message")?;
        let word1 = as_i64(message.get(1).ok_or_else(|| BridgeError::WrongType {
            field: "message".to_string(),
        })?, "message")?;

        if let Some(teammate) = value.get("teammate") {
            let id = as_i64(teammate, "teammate")? - 10;
            if (0..AGENT_COUNT as i64).contains(&id)
                && self.observation.board.agents[id as usize].dead
            {
                return Ok(());
            }
        }
        self.agent
            .deliver_incoming(TeamMessage::new(word0 as i32, word1 as i32));
        Ok(())
    }
}
