//! Runs a rendered game between built-in agents.
//!
//! Usage: arena_game [steps] [board-seed] [mode]
//!   steps       number of steps to simulate, <= 0 runs to the end (default 0)
//!   board-seed  board generation seed (default 0x1337)
//!   mode        ffa | teams | radio (default ffa)

use bomb_arena::{Agent, Environment, GameMode, HarmlessAgent, RandomAgent};

fn parse_args() -> Result<(i32, i64, GameMode), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let steps = match args.first() {
        Some(v) => v.parse::<i32>().map_err(|_| format!("invalid steps '{}'", v))?,
        None => 0,
    };
    let board_seed = match args.get(1) {
        Some(v) => v.parse::<i64>().map_err(|_| format!("invalid seed '{}'", v))?,
        None => 0x1337,
    };
    let mode = match args.get(2).map(String::as_str) {
        None | Some("ffa") => GameMode::FreeForAll,
        Some("teams") => GameMode::TwoTeams,
        Some("radio") => GameMode::TeamRadio,
        Some(other) => return Err(format!("unknown mode '{}'", other)),
    };

    Ok((steps, board_seed, mode))
}

fn main() {
    let (steps, board_seed, mode) = match parse_args() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(1);
        }
    };

    let agents: [Box<dyn Agent>; 4] = [
        Box::new(RandomAgent::new(board_seed as u64)),
        Box::new(HarmlessAgent::new(board_seed as u64 + 1)),
        Box::new(RandomAgent::new(board_seed as u64 + 2)),
        Box::new(HarmlessAgent::new(board_seed as u64 + 3)),
    ];

    let mut env = Environment::new();
    env.make_game(agents, mode, board_seed, -1);
    env.run_game(steps, false, true, false, false, 80);

    println!("{}", env.game_result_summary());
}
