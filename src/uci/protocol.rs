use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Result;

use crate::board::position::{Color, Move, PieceType, Position};
use crate::eval::evaluate::evaluate;
use crate::eval::material;
use crate::movegen::moves::{generate_legal_moves, move_to_uci};
use crate::search::threads::{ThreadPool, MAX_THREADS};
use crate::search::time_management::TimeManager;

const ENGINE_NAME: &str = "Ferrum";
const ENGINE_AUTHOR: &str = "the Ferrum developers";
const ENGINE_VERSION: &str = "1.0";

const DEFAULT_TT_SIZE_MB: usize = 64;
const MIN_TT_SIZE_MB: usize = 1;
const MAX_TT_SIZE_MB: usize = 16384;
const DEFAULT_MULTI_PV: usize = 1;
const MAX_MULTI_PV: usize = 500;

pub struct UciEngine {
    position: Position,
    pool: Arc<ThreadPool>,

    debug_mode: bool,
    tt_size_mb: usize,
    thread_count: usize,
    min_split_depth: i32,
    max_threads_per_split_point: usize,
    idle_threads_sleep: bool,
    move_overhead: u64,
    ponder_enabled: bool,
    multi_pv: usize,
    chess960: bool,
}

impl UciEngine {
    pub fn new() -> Self {
        crate::init();

        let pool = ThreadPool::new(DEFAULT_TT_SIZE_MB);
        pool.read_uci_options(1, 0, 8, true);

        Self {
            position: Position::startpos(),
            pool,
            debug_mode: false,
            tt_size_mb: DEFAULT_TT_SIZE_MB,
            thread_count: 1,
            min_split_depth: 0,
            max_threads_per_split_point: 8,
            idle_threads_sleep: true,
            move_overhead: 50,
            ponder_enabled: true,
            multi_pv: DEFAULT_MULTI_PV,
            chess960: false,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let stdin = io::stdin();

        println!("{} {} by {}", ENGINE_NAME, ENGINE_VERSION, ENGINE_AUTHOR);
        io::stdout().flush()?;

        for line in stdin.lock().lines() {
            let command = line?;
            let trimmed = command.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !self.handle_command(trimmed) {
                break;
            }
            io::stdout().flush()?;
        }

        Ok(())
    }

    // Returns false when the engine should terminate.
    fn handle_command(&mut self, command: &str) -> bool {
        let parts: Vec<&str> = command.split_whitespace().collect();

        self.debug(&format!("<<< {}", command));

        match parts[0] {
            "uci" => self.uci_command(),
            "debug" => {
                if let Some(&mode) = parts.get(1) {
                    self.debug_mode = mode == "on";
                }
            }
            "isready" => {
                self.pool.wait_for_think_finished();
                println!("readyok");
            }
            "setoption" => self.setoption_command(&parts),
            "register" => {}
            "ucinewgame" => {
                self.pool.wait_for_think_finished();
                self.position = Position::startpos();
                self.pool.clear_hash();
            }
            "position" => self.position_command(&parts),
            "go" => self.go_command(&parts),
            "stop" => self.pool.request_stop(),
            "ponderhit" => self.debug("ponderhit - continuing search"),
            "quit" => {
                self.pool.request_stop();
                self.pool.exit();
                return false;
            }
            "d" | "display" => self.display_command(),
            "eval" => self.eval_command(),
            _ => self.debug(&format!("Unknown command: {}", parts[0])),
        }

        true
    }

    fn uci_command(&self) {
        println!("id name {} {}", ENGINE_NAME, ENGINE_VERSION);
        println!("id author {}", ENGINE_AUTHOR);

        println!(
            "option name Hash type spin default {} min {} max {}",
            DEFAULT_TT_SIZE_MB, MIN_TT_SIZE_MB, MAX_TT_SIZE_MB
        );
        println!("option name Clear Hash type button");
        println!(
            "option name Threads type spin default 1 min 1 max {}",
            MAX_THREADS
        );
        println!("option name Min Split Depth type spin default 0 min 0 max 12");
        println!("option name Max Threads per Split Point type spin default 8 min 4 max 8");
        println!("option name Idle Threads Sleep type check default true");
        println!("option name Ponder type check default true");
        println!(
            "option name MultiPV type spin default {} min 1 max {}",
            DEFAULT_MULTI_PV, MAX_MULTI_PV
        );
        println!("option name UCI_Chess960 type check default false");
        println!("option name Move Overhead type spin default 50 min 0 max 5000");

        println!("uciok");
    }

    fn setoption_command(&mut self, parts: &[&str]) {
        self.pool.wait_for_think_finished();

        let mut name_parts = Vec::new();
        let mut value_parts = Vec::new();
        let mut parsing_name = false;
        let mut parsing_value = false;

        for &part in &parts[1..] {
            match part {
                "name" => {
                    parsing_name = true;
                    parsing_value = false;
                }
                "value" => {
                    parsing_name = false;
                    parsing_value = true;
                }
                _ => {
                    if parsing_name {
                        name_parts.push(part);
                    } else if parsing_value {
                        value_parts.push(part);
                    }
                }
            }
        }

        let option_name = name_parts.join(" ");
        let option_value = value_parts.join(" ");

        match option_name.as_str() {
            "Hash" => {
                if let Ok(size) = option_value.parse::<usize>() {
                    self.tt_size_mb = size.clamp(MIN_TT_SIZE_MB, MAX_TT_SIZE_MB);
                    self.pool.resize_hash(self.tt_size_mb);
                    self.debug(&format!("Hash table size set to {} MB", self.tt_size_mb));
                }
            }
            "Clear Hash" => {
                self.pool.clear_hash();
                self.debug("Hash table cleared");
            }
            "Threads" => {
                if let Ok(threads) = option_value.parse::<usize>() {
                    self.thread_count = threads.clamp(1, MAX_THREADS);
                    self.apply_thread_options();
                }
            }
            "Min Split Depth" => {
                if let Ok(depth) = option_value.parse::<i32>() {
                    self.min_split_depth = depth.clamp(0, 12);
                    self.apply_thread_options();
                }
            }
            "Max Threads per Split Point" => {
                if let Ok(n) = option_value.parse::<usize>() {
                    self.max_threads_per_split_point = n.clamp(4, 8);
                    self.apply_thread_options();
                }
            }
            "Idle Threads Sleep" => {
                self.idle_threads_sleep = option_value.eq_ignore_ascii_case("true");
                self.apply_thread_options();
            }
            "Ponder" => {
                self.ponder_enabled = option_value.eq_ignore_ascii_case("true");
            }
            "MultiPV" => {
                if let Ok(mpv) = option_value.parse::<usize>() {
                    self.multi_pv = mpv.clamp(1, MAX_MULTI_PV);
                }
            }
            "UCI_Chess960" => {
                self.chess960 = option_value.eq_ignore_ascii_case("true");
            }
            "Move Overhead" => {
                if let Ok(overhead) = option_value.parse::<u64>() {
                    self.move_overhead = overhead.clamp(0, 5000);
                }
            }
            _ => self.debug(&format!("Unknown option: {}", option_name)),
        }
    }

    fn apply_thread_options(&self) {
        self.pool.read_uci_options(
            self.thread_count,
            self.min_split_depth,
            self.max_threads_per_split_point,
            self.idle_threads_sleep,
        );
        self.debug(&format!(
            "threads={} minSplitDepth={} maxPerSplit={} sleep={}",
            self.thread_count,
            self.pool.min_split_depth(),
            self.max_threads_per_split_point,
            self.idle_threads_sleep
        ));
    }

    fn position_command(&mut self, parts: &[&str]) {
        self.pool.wait_for_think_finished();

        if parts.len() < 2 {
            return;
        }

        let mut moves_idx = None;
        let mut pos = match parts[1] {
            "startpos" => Position::startpos(),
            "fen" => {
                let fen_parts: Vec<&str> = parts[2..]
                    .iter()
                    .take_while(|&&p| p != "moves")
                    .copied()
                    .collect();
                match Position::from_fen(&fen_parts.join(" ")) {
                    Some(p) => p,
                    None => {
                        self.debug("Invalid FEN");
                        return;
                    }
                }
            }
            _ => return,
        };

        for (i, &part) in parts.iter().enumerate() {
            if part == "moves" {
                moves_idx = Some(i + 1);
                break;
            }
        }

        if let Some(idx) = moves_idx {
            for &move_str in &parts[idx..] {
                match Self::parse_move(&pos, move_str) {
                    Some(mv) if pos.make_move(mv) => {}
                    _ => {
                        self.debug(&format!("Illegal move: {}", move_str));
                        break;
                    }
                }
            }
        }

        self.position = pos;
    }

    fn go_command(&mut self, parts: &[&str]) {
        self.pool.wait_for_think_finished();

        let mut wtime = None;
        let mut btime = None;
        let mut winc = None;
        let mut binc = None;
        let mut movestogo = None;
        let mut depth = crate::search::alphabeta::MAX_PLY - 4;
        let mut nodes = None;
        let mut movetime: Option<u32> = None;
        let mut infinite = false;

        let mut i = 1;
        while i < parts.len() {
            let value = parts.get(i + 1);
            match parts[i] {
                "wtime" => wtime = value.and_then(|v| v.parse().ok()),
                "btime" => btime = value.and_then(|v| v.parse().ok()),
                "winc" => winc = value.and_then(|v| v.parse().ok()),
                "binc" => binc = value.and_then(|v| v.parse().ok()),
                "movestogo" => movestogo = value.and_then(|v| v.parse().ok()),
                "depth" => {
                    if let Some(d) = value.and_then(|v| v.parse::<i32>().ok()) {
                        depth = d.clamp(1, crate::search::alphabeta::MAX_PLY - 4);
                    }
                }
                "nodes" => nodes = value.and_then(|v| v.parse().ok()),
                "movetime" => movetime = value.and_then(|v| v.parse().ok()),
                "infinite" => infinite = true,
                "ponder" => {}
                _ => {}
            }
            i += if matches!(parts[i], "infinite" | "ponder") { 1 } else { 2 };
        }

        let is_white = self.position.side_to_move == Color::White;
        let ply = (self.position.fullmove_number.saturating_sub(1) as u32) * 2
            + u32::from(!is_white);

        let movetime = movetime.map(|mt| mt.saturating_sub(self.move_overhead as u32).max(1));
        let time_manager = TimeManager::new(
            wtime, btime, movetime, winc, binc, movestogo, nodes, infinite, is_white, ply,
        );

        self.pool
            .start_thinking(self.position.clone(), depth, time_manager, self.multi_pv);
    }

    fn parse_move(pos: &Position, move_str: &str) -> Option<Move> {
        if move_str.len() < 4 {
            return None;
        }

        let from = crate::board::bitboard::algebraic_to_square(&move_str[0..2])?;
        let to = crate::board::bitboard::algebraic_to_square(&move_str[2..4])?;
        let promotion = move_str.chars().nth(4).map(|c| match c.to_ascii_lowercase() {
            'r' => PieceType::Rook,
            'b' => PieceType::Bishop,
            'n' => PieceType::Knight,
            _ => PieceType::Queen,
        });

        generate_legal_moves(pos).into_iter().find(|mv| {
            mv.from() == from
                && mv.to() == to
                && match promotion {
                    Some(promo) => mv.is_promotion() && mv.promotion() == promo,
                    None => !mv.is_promotion(),
                }
        })
    }

    fn display_command(&self) {
        self.position.print();
        println!("FEN: {}", self.position.to_fen());
        println!("Hash: {:016X}", self.position.hash);
        println!("Material key: {:016X}", self.position.material_key());
    }

    fn eval_command(&self) {
        let mut table = material::Table::new();
        let info = evaluate(&self.position, &mut table);
        let entry = *table.probe(&self.position);

        println!("Static evaluation: {} cp (side to move)", info.score);
        println!("Game phase: {}/128", entry.game_phase);
        println!("Material imbalance: {}", entry.value);
        if info.specialized_endgame {
            println!("Specialized endgame evaluation in use");
        }
        println!(
            "Legal moves: {}",
            generate_legal_moves(&self.position)
                .iter()
                .map(|&m| move_to_uci(m))
                .collect::<Vec<_>>()
                .join(" ")
        );
    }

    fn debug(&self, message: &str) {
        if self.debug_mode {
            println!("info string {}", message);
            let _ = io::stdout().flush();
        }
    }
}

impl Default for UciEngine {
    fn default() -> Self {
        Self::new()
    }
}

pub fn run_uci() -> Result<()> {
    let mut engine = UciEngine::new();
    engine.run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_move_formats() {
        crate::init_for_tests();
        let pos = Position::startpos();

        let mv = UciEngine::parse_move(&pos, "e2e4").unwrap();
        assert_eq!(mv.from(), 12);
        assert_eq!(mv.to(), 28);

        assert!(UciEngine::parse_move(&pos, "e2e5").is_none());
        assert!(UciEngine::parse_move(&pos, "xx").is_none());

        let promo_pos = Position::from_fen("8/4P3/8/8/8/8/k7/4K3 w - - 0 1").unwrap();
        let mv = UciEngine::parse_move(&promo_pos, "e7e8q").unwrap();
        assert!(mv.is_promotion());
        assert_eq!(mv.promotion(), PieceType::Queen);
    }

    #[test]
    fn test_position_command_applies_moves() {
        crate::init_for_tests();
        let mut engine = UciEngine::new();

        let parts: Vec<&str> = "position startpos moves e2e4 e7e5 g1f3"
            .split_whitespace()
            .collect();
        engine.position_command(&parts);

        assert_eq!(
            engine.position.to_fen(),
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2"
        );
        engine.pool.exit();
    }
}
