//! The game board: cells, agent records, bomb and flame queues.

use serde::{Deserialize, Serialize};

use crate::bomb::{Bomb, Flame};
use crate::queue::FixedQueue;
use crate::types::{self, Cell, Position};
use crate::types::{
    AGENT_COUNT, BOARD_SIZE, BOMB_DEFAULT_STRENGTH, FLAME_CAPACITY, MAX_BOMBS,
};

// ============================================================================
// Agent Info
// ============================================================================

/// Everything known about a single agent.
///
/// Bundling all (possibly hidden) per-agent data here makes fogging simple:
/// if an agent is out of sight, its record is just not exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// The team of this agent. 0 means "no team".
    pub team: i32,
    pub dead: bool,
    /// If an agent is not visible, its position is unknown (sentinel values).
    pub visible: bool,
    pub x: i32,
    pub y: i32,
    /// Whether the private stats below are known.
    pub stats_visible: bool,
    /// Number of active bombs planted by this agent.
    pub bomb_count: i32,
    /// How many bombs this agent can have active at once.
    pub max_bomb_count: i32,
    /// Blast range of this agent's bombs, in cells.
    pub bomb_strength: i32,
    pub can_kick: bool,
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            team: 0,
            dead: false,
            visible: true,
            x: 0,
            y: 0,
            stats_visible: true,
            bomb_count: 0,
            max_bomb_count: 1,
            bomb_strength: BOMB_DEFAULT_STRENGTH,
            can_kick: false,
        }
    }
}

impl AgentInfo {
    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    pub fn set_position(&mut self, pos: Position) {
        self.x = pos.x;
        self.y = pos.y;
    }

    /// Whether `other` is an enemy of this agent.
    pub fn is_enemy(&self, other: &AgentInfo) -> bool {
        self.team == 0 || other.team != self.team
    }
}

// ============================================================================
// Board
// ============================================================================

/// The item grid plus agent records and the bomb and flame queues.
///
/// The bomb queue is ordered by non-decreasing time left (head expires
/// first). The flame queue, when optimized, is ordered by absolute expiry
/// and stores *differential* remaining times; `current_flame_time` is the
/// sum of the stored differences (-1 marks a not-yet-optimized queue).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub items: [[Cell; BOARD_SIZE]; BOARD_SIZE],
    pub agents: [AgentInfo; AGENT_COUNT],
    pub bombs: FixedQueue<Bomb, MAX_BOMBS>,
    pub flames: FixedQueue<Flame, FLAME_CAPACITY>,
    pub time_step: i32,
    pub current_flame_time: i32,
}

impl Default for Board {
    fn default() -> Self {
        Self {
            items: [[types::PASSAGE; BOARD_SIZE]; BOARD_SIZE],
            agents: [AgentInfo::default(); AGENT_COUNT],
            bombs: FixedQueue::new(),
            flames: FixedQueue::new(),
            time_step: 0,
            current_flame_time: 0,
        }
    }
}

impl Board {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item_at(&self, pos: Position) -> Cell {
        self.items[pos.y as usize][pos.x as usize]
    }

    pub fn set_item_at(&mut self, pos: Position, cell: Cell) {
        self.items[pos.y as usize][pos.x as usize] = cell;
    }

    /// Overwrites every cell with `cell`.
    pub fn clear(&mut self, cell: Cell) {
        self.items = [[cell; BOARD_SIZE]; BOARD_SIZE];
    }

    pub fn put_item(&mut self, x: i32, y: i32, cell: Cell) {
        self.items[y as usize][x as usize] = cell;
    }

    /// Places agent `id` at the given cell and updates its record.
    pub fn put_agent(&mut self, x: i32, y: i32, id: usize) {
        self.items[y as usize][x as usize] = types::agent_cell(id);
        self.agents[id].x = x;
        self.agents[id].y = y;
    }

    /// Places the given agent ids clockwise in the corners of the board,
    /// starting from the top left, with the given padding to the walls.
    pub fn put_agents_in_corners(&mut self, ids: [usize; AGENT_COUNT], padding: i32) {
        let far = BOARD_SIZE as i32 - 1 - padding;
        self.put_agent(padding, padding, ids[0]);
        self.put_agent(far, padding, ids[1]);
        self.put_agent(far, far, ids[2]);
        self.put_agent(padding, far, ids[3]);
    }

    /// Places a bomb and adds one to the owner's bomb count. The bomb is
    /// inserted into the queue in timer order.
    pub fn put_bomb(
        &mut self,
        x: i32,
        y: i32,
        owner: usize,
        strength: i32,
        time_left: i32,
        set_cell: bool,
    ) {
        let bomb = Bomb::new(x, y, owner, strength, time_left);
        let at = (0..self.bombs.len())
            .find(|&i| self.bombs[i].time_left() > time_left)
            .unwrap_or(self.bombs.len());
        self.bombs.insert_at(at, bomb);
        if owner < AGENT_COUNT {
            self.agents[owner].bomb_count += 1;
        }
        if set_cell {
            self.items[y as usize][x as usize] = types::BOMB;
        }
    }

    pub fn has_bomb(&self, x: i32, y: i32) -> bool {
        self.get_bomb_index(x, y).is_some()
    }

    /// The queue slot of the bomb at the given cell. Linear scan; the queue
    /// holds at most `MAX_BOMBS` entries.
    pub fn get_bomb_index(&self, x: i32, y: i32) -> Option<usize> {
        (0..self.bombs.len()).find(|&i| {
            let b = self.bombs[i];
            b.x() == x && b.y() == y
        })
    }

    /// The id of the alive agent occupying the given cell, if any.
    pub fn get_agent(&self, x: i32, y: i32) -> Option<usize> {
        (0..AGENT_COUNT)
            .find(|&i| !self.agents[i].dead && self.agents[i].x == x && self.agents[i].y == y)
    }

    /// Whether agents `a` and `b` are enemies.
    pub fn enemies(&self, a: usize, b: usize) -> bool {
        self.agents[a].is_enemy(&self.agents[b])
    }

    /// The power-up item encoded by a 2-bit flag.
    pub fn flag_item(pow_flag: i32) -> Cell {
        match pow_flag {
            1 => types::EXTRA_BOMB,
            2 => types::INCR_RANGE,
            3 => types::KICK,
            _ => types::PASSAGE,
        }
    }

    /// The 2-bit flag encoding a power-up item.
    pub fn item_flag(cell: Cell) -> i32 {
        match cell {
            types::EXTRA_BOMB => 1,
            types::INCR_RANGE => 2,
            types::KICK => 3,
            _ => 0,
        }
    }

    /// Copies a board, optionally keeping this board's agent records.
    pub fn copy_from(&mut self, other: &Board, copy_agents: bool) {
        self.items = other.items;
        self.bombs = other.bombs;
        self.flames = other.flames;
        self.time_step = other.time_step;
        self.current_flame_time = other.current_flame_time;
        if copy_agents {
            self.agents = other.agents;
        }
    }

    // ------------------------------------------------------------------
    // Flame queue maintenance
    // ------------------------------------------------------------------

    /// Rewrites differential flame times back to absolute remaining times.
    /// No-op when the queue is not optimized.
    pub fn convert_to_absolute_flame_times(&mut self) {
        if self.current_flame_time == -1 {
            return;
        }
        self.current_flame_time = -1;
        let mut cumulative = 0;
        for i in 0..self.flames.len() {
            cumulative += self.flames[i].time_left;
            self.flames[i].time_left = cumulative;
        }
    }

    /// Sorts the flame queue by expiry, re-encodes the times differentially,
    /// rewrites the flame indices stored in the cells and sets
    /// `current_flame_time`. Accepts both absolute (`current_flame_time ==
    /// -1`) and already-optimized queues. Returns the new
    /// `current_flame_time`.
    pub fn optimize_flame_queue(&mut self) -> i32 {
        self.convert_to_absolute_flame_times();

        let mut flames: Vec<Flame> = self.flames.iter().copied().collect();
        flames.sort_by_key(|f| f.time_left);

        self.flames.clear();
        let mut cumulative = 0;
        for (index, flame) in flames.iter().enumerate() {
            let mut f = *flame;
            let absolute = f.time_left;
            f.time_left = absolute - cumulative;
            cumulative = absolute;
            self.flames.push(f);

            let cell = self.item_at(f.position);
            let flag = if types::is_flame(cell) {
                types::power_up_flag(cell)
            } else {
                0
            };
            self.set_item_at(f.position, types::FLAME + ((index as i32) << 3) + flag);
        }

        self.current_flame_time = cumulative;
        cumulative
    }

    /// Ages the flames by one tick. Only the differential head is
    /// decremented; expired flames are popped.
    pub fn tick_flames(&mut self) {
        if self.flames.is_empty() {
            return;
        }
        assert!(
            self.current_flame_time != -1,
            "tick_flames requires an optimized flame queue"
        );
        self.flames[0].time_left -= 1;
        self.current_flame_time -= 1;
        if self.flames[0].time_left <= 0 {
            self.pop_flames();
        }
    }

    /// Removes all expired head flames, restoring either a passage or the
    /// power-up hidden in the flame cell's low bits. A cell that no longer
    /// shows a flame (merged observations may already hold the revealed
    /// item) is left untouched.
    pub fn pop_flames(&mut self) {
        while !self.flames.is_empty() && self.flames[0].time_left <= 0 {
            let flame = self.flames.pop().unwrap();
            let cell = self.item_at(flame.position);
            if types::is_flame(cell) {
                self.set_item_at(flame.position, Self::flag_item(types::power_up_flag(cell)));
            }
        }
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// A compact text rendering of the grid, one string per row.
    pub fn render_rows(&self) -> Vec<String> {
        self.items
            .iter()
            .map(|row| row.iter().map(|&cell| render_cell(cell)).collect())
            .collect()
    }

    /// Prints the board with per-agent stats and queue summaries.
    pub fn print(&self, clear_console: bool) {
        if clear_console {
            print!("\x1bc");
        }
        for (y, row) in self.render_rows().iter().enumerate() {
            print!("{}", row);
            match y {
                0 => print!("          Agents"),
                _ if y <= AGENT_COUNT => {
                    let id = y - 1;
                    let a = &self.agents[id];
                    print!(
                        "          {} {}  b:{} r:{} k:{}",
                        if a.dead { "x" } else { ">" },
                        id,
                        a.max_bomb_count,
                        a.bomb_strength,
                        a.can_kick as i32
                    );
                }
                _ if y == AGENT_COUNT + 2 => {
                    let owners: Vec<String> = self
                        .bombs
                        .iter()
                        .map(|b| b.owner().to_string())
                        .collect();
                    print!("          Bombs:  [{}]", owners.join(" "));
                }
                _ if y == AGENT_COUNT + 3 => {
                    let times: Vec<String> = self
                        .flames
                        .iter()
                        .map(|f| f.time_left.to_string())
                        .collect();
                    print!("          Flames: [{}]", times.join(" "));
                }
                _ => {}
            }
            println!();
        }
    }
}

fn render_cell(cell: Cell) -> String {
    if types::is_agent(cell) {
        return format!(" {} ", types::cell_agent_id(cell));
    }
    if types::is_wood(cell) {
        return "[#]".to_string();
    }
    if types::is_flame(cell) {
        return " * ".to_string();
    }
    match cell {
        types::PASSAGE => "   ",
        types::RIGID => "[X]",
        types::BOMB => " o ",
        types::FOG => " ? ",
        types::EXTRA_BOMB => " b ",
        types::INCR_RANGE => " r ",
        types::KICK => " k ",
        types::AGENT_DUMMY => " A ",
        _ => "[?]",
    }
    .to_string()
}
