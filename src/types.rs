//! Core type definitions: constants, moves, cell encoding, parameters.

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Side length of the (square) board.
pub const BOARD_SIZE: usize = 11;

/// Number of agents in a game.
pub const AGENT_COUNT: usize = 4;

/// Ticks from planting a bomb until it detonates.
pub const BOMB_LIFETIME: i32 = 9;

/// Blast range of a freshly spawned agent.
pub const BOMB_DEFAULT_STRENGTH: i32 = 1;

/// Ticks a flame stays on the board.
pub const FLAME_LIFETIME: i32 = 3;

/// Per-agent cap on simultaneously active bombs.
pub const MAX_BOMBS_PER_AGENT: usize = 5;

/// Total bomb capacity of a board.
pub const MAX_BOMBS: usize = AGENT_COUNT * MAX_BOMBS_PER_AGENT;

/// Capacity of the flame queue (every cell can burn at once).
pub const FLAME_CAPACITY: usize = BOARD_SIZE * BOARD_SIZE;

// ============================================================================
// Moves and Directions
// ============================================================================

/// An atomic move an agent can submit for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Move {
    Idle = 0,
    Up,
    Down,
    Left,
    Right,
    Bomb,
}

impl Move {
    /// All moves in wire order.
    pub const ALL: [Move; 6] = [
        Move::Idle,
        Move::Up,
        Move::Down,
        Move::Left,
        Move::Right,
        Move::Bomb,
    ];

    pub fn from_index(index: i32) -> Option<Move> {
        if index < 0 {
            return None;
        }
        Move::ALL.get(index as usize).copied()
    }

    /// The movement direction of this move, if it is a movement.
    pub fn direction(self) -> Option<Direction> {
        match self {
            Move::Idle => Some(Direction::Idle),
            Move::Up => Some(Direction::Up),
            Move::Down => Some(Direction::Down),
            Move::Left => Some(Direction::Left),
            Move::Right => Some(Direction::Right),
            Move::Bomb => None,
        }
    }
}

/// A travel direction for bombs (and moving agents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Idle = 0,
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 5] = [
        Direction::Idle,
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub fn from_index(index: i32) -> Option<Direction> {
        if index < 0 {
            return None;
        }
        Direction::ALL.get(index as usize).copied()
    }

    pub fn as_move(self) -> Move {
        match self {
            Direction::Idle => Move::Idle,
            Direction::Up => Move::Up,
            Direction::Down => Move::Down,
            Direction::Left => Move::Left,
            Direction::Right => Move::Right,
        }
    }
}

// ============================================================================
// Positions
// ============================================================================

/// A cell position on the board. `x` is the column, `y` the row.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Position {
        Position { x, y }
    }
}

impl std::ops::Add for Position {
    type Output = Position;

    fn add(self, other: Position) -> Position {
        Position::new(self.x + other.x, self.y + other.y)
    }
}

impl std::ops::Sub for Position {
    type Output = Position;

    fn sub(self, other: Position) -> Position {
        Position::new(self.x - other.x, self.y - other.y)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

pub fn is_out_of_bounds(p: Position) -> bool {
    p.x < 0 || p.x >= BOARD_SIZE as i32 || p.y < 0 || p.y >= BOARD_SIZE as i32
}

/// The cell an entity at `pos` reaches by making `mv`.
/// Non-movement moves keep the entity put.
pub fn desired_position(pos: Position, mv: Move) -> Position {
    match mv {
        Move::Up => Position::new(pos.x, pos.y - 1),
        Move::Down => Position::new(pos.x, pos.y + 1),
        Move::Left => Position::new(pos.x - 1, pos.y),
        Move::Right => Position::new(pos.x + 1, pos.y),
        Move::Idle | Move::Bomb => pos,
    }
}

/// The cell an entity at `pos` came from, given that it made `mv`.
pub fn origin_position(pos: Position, mv: Move) -> Position {
    match mv {
        Move::Up => Position::new(pos.x, pos.y + 1),
        Move::Down => Position::new(pos.x, pos.y - 1),
        Move::Left => Position::new(pos.x + 1, pos.y),
        Move::Right => Position::new(pos.x - 1, pos.y),
        Move::Idle | Move::Bomb => pos,
    }
}

/// The direction of a single-cell displacement, if it is one.
pub fn direction_of_step(delta: Position) -> Option<Direction> {
    match (delta.x, delta.y) {
        (0, 0) => Some(Direction::Idle),
        (0, -1) => Some(Direction::Up),
        (0, 1) => Some(Direction::Down),
        (-1, 0) => Some(Direction::Left),
        (1, 0) => Some(Direction::Right),
        _ => None,
    }
}

/// Chebyshev (square) view-range check.
pub fn in_view_range(a: Position, b: Position, range: i32) -> bool {
    (a.x - b.x).abs() <= range && (a.y - b.y).abs() <= range
}

// ============================================================================
// Cell Encoding
// ============================================================================

/// A board cell value. Tagged integer: plain items are small integers, wood
/// carries a hidden power-up flag in its low 2 bits, flames carry their queue
/// index (bits 3..16) and a power-up flag (low 2 bits), agents occupy the
/// high range.
pub type Cell = i32;

pub const PASSAGE: Cell = 0;
pub const RIGID: Cell = 1;
pub const WOOD: Cell = 2 << 8;
pub const BOMB: Cell = 3;
pub const FLAME: Cell = 4 << 16;
pub const FOG: Cell = 5;
pub const EXTRA_BOMB: Cell = 6;
pub const INCR_RANGE: Cell = 7;
pub const KICK: Cell = 8;
pub const AGENT_DUMMY: Cell = 9;
pub const AGENT0: Cell = 1 << 24;

pub fn is_wood(cell: Cell) -> bool {
    cell >> 8 == 2
}

pub fn is_power_up(cell: Cell) -> bool {
    cell > FOG && cell < AGENT_DUMMY
}

pub fn is_walkable(cell: Cell) -> bool {
    cell == PASSAGE || is_power_up(cell)
}

pub fn is_flame(cell: Cell) -> bool {
    cell >> 16 == 4
}

pub fn is_agent(cell: Cell) -> bool {
    cell >= AGENT0
}

/// Bombs cannot move through walls, boxes and power-ups.
pub fn is_static_movement_block(cell: Cell) -> bool {
    cell == RIGID || is_wood(cell) || is_power_up(cell)
}

/// The cell value of agent `id`.
pub fn agent_cell(id: usize) -> Cell {
    AGENT0 + id as i32
}

/// The agent id encoded in an agent cell.
pub fn cell_agent_id(cell: Cell) -> usize {
    (cell - AGENT0) as usize
}

/// The flame-queue index stored in a flame cell.
pub fn flame_index(cell: Cell) -> usize {
    ((cell & 0xFFFF) >> 3) as usize
}

/// The hidden power-up flag in the low 2 bits of a flame or wood cell.
pub fn power_up_flag(cell: Cell) -> i32 {
    cell & 0b11
}

pub fn clear_power_up_flag(cell: Cell) -> Cell {
    cell & !0b11
}

// ============================================================================
// Game Modes and Teams
// ============================================================================

/// The rule set of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    FreeForAll,
    TwoTeams,
    /// Two teams, plus a one-word-pair message channel between teammates.
    TeamRadio,
}

/// The team of `agent_id` under `mode`. 0 means "no team".
pub fn team_of(mode: GameMode, agent_id: usize) -> i32 {
    match mode {
        GameMode::FreeForAll => 0,
        GameMode::TwoTeams | GameMode::TeamRadio => {
            if agent_id % 2 == 0 {
                1
            } else {
                2
            }
        }
    }
}

/// The teammate of `agent_id` in four-player team modes.
pub fn teammate_of(agent_id: usize) -> usize {
    (agent_id + 2) % AGENT_COUNT
}

// ============================================================================
// Observation Parameters
// ============================================================================

/// Which agent records an observation exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentInfoVisibility {
    /// Stats of every agent are visible.
    All,
    /// Stats of agents inside the view range are visible.
    InView,
    /// Only the observer's own stats are visible.
    OnlySelf,
}

/// How agents observe the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationParameters {
    /// Which meta information about other agents is included.
    pub agent_info_visibility: AgentInfoVisibility,
    /// Whether power-ups hidden inside wooden boxes are included.
    pub expose_power_ups: bool,
    /// Whether the map view is limited to `agent_view_size`.
    pub agent_partial_map_view: bool,
    /// How many cells the agents can see in each direction.
    pub agent_view_size: i32,
}

impl Default for ObservationParameters {
    fn default() -> Self {
        Self {
            agent_info_visibility: AgentInfoVisibility::All,
            expose_power_ups: true,
            agent_partial_map_view: false,
            agent_view_size: 4,
        }
    }
}
