use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::board::bitboard::square_mask;
use crate::board::position::{Color, Move, PieceType, Position};
use crate::eval::evaluate::{evaluate, DRAW_VALUE, INFINITY, MATE_VALUE};
use crate::eval::material::{self, midgame_value_of_piece, PAWN_VALUE_MG};
use crate::movegen::moves::{generate_legal_moves, move_to_uci};
use crate::search::history::History;
use crate::search::movepick::MovePicker;
use crate::search::splitpoint::SplitPoint;
use crate::search::threads::{self, ThreadPool, Worker, MAX_SPLITPOINTS_PER_THREAD};
use crate::search::transposition::{
    score_from_tt, score_to_tt, TranspositionTable, TT_BOUND_EXACT, TT_BOUND_LOWER, TT_BOUND_UPPER,
};

pub const MAX_PLY: i32 = 128;
pub const ONE_PLY: i32 = 1;

const ASPIRATION_WINDOW: i32 = 40;
const NULL_MOVE_MIN_DEPTH: i32 = 2;
const LMR_MIN_DEPTH: i32 = 3;
const LMR_MIN_MOVES: i32 = 3;
const HISTORY_PRUNE_BONUS_LIMIT: i32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Root,
    Pv,
    NonPv,
}

// Per-ply search context. Shared with the move picker (killers, mate killer)
// and copied into split points for slaves.
#[derive(Debug, Clone, Copy)]
pub struct Stack {
    pub killers: [Move; 2],
    pub mate_killer: Move,
    pub current_move: Move,
    pub threat_move: Move,
    pub static_eval: i32,
}

impl Stack {
    pub fn new() -> Self {
        Self {
            killers: [Move::NULL; 2],
            mate_killer: Move::NULL,
            current_move: Move::NULL,
            threat_move: Move::NULL,
            static_eval: -INFINITY,
        }
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

static LMR_TABLE: Lazy<[[i32; 64]; 64]> = Lazy::new(|| {
    let mut table = [[0i32; 64]; 64];
    for (d, row) in table.iter_mut().enumerate().skip(1) {
        for (m, r) in row.iter_mut().enumerate().skip(1) {
            *r = ((d as f64).sqrt() + (m as f64).sqrt() - 1.5) as i32;
        }
    }
    table
});

// Static exchange evaluation: the material balance of the capture sequence on
// the destination square, best play by both sides, midgame piece values.
pub fn see(pos: &Position, mv: Move) -> i32 {
    let from = mv.from();
    let to = mv.to();
    let (moving_piece, moving_color) = pos.piece_at(from);

    let mut gain = [0i32; 32];
    let mut depth = 0usize;

    let mut occupied = pos.all_pieces() & !square_mask(from);
    gain[0] = if mv.is_en_passant() {
        let victim_sq = if moving_color == Color::White { to - 8 } else { to + 8 };
        occupied &= !square_mask(victim_sq);
        PAWN_VALUE_MG
    } else {
        midgame_value_of_piece(pos.type_of_piece_on(to))
    };

    // The piece currently standing on the target square, about to be
    // recaptured. A promotion parks the new piece there.
    let mut on_square = if mv.is_promotion() {
        gain[0] += midgame_value_of_piece(mv.promotion()) - PAWN_VALUE_MG;
        midgame_value_of_piece(mv.promotion())
    } else {
        midgame_value_of_piece(moving_piece)
    };

    let mut color = moving_color.opposite();

    loop {
        let attackers = pos.attackers_to(to, occupied) & occupied & pos.pieces(color);
        if attackers == 0 || depth + 1 >= gain.len() {
            break;
        }

        let (attacker_sq, attacker_value) = least_valuable_attacker(pos, attackers, color);

        depth += 1;
        gain[depth] = on_square - gain[depth - 1];
        on_square = attacker_value;
        occupied &= !square_mask(attacker_sq);
        color = color.opposite();

        // A king may only conclude the sequence.
        if attacker_value == 0 {
            break;
        }
    }

    while depth > 0 {
        depth -= 1;
        gain[depth] = -((-gain[depth]).max(gain[depth + 1]));
    }

    gain[0]
}

fn least_valuable_attacker(pos: &Position, attackers: u64, color: Color) -> (u8, i32) {
    for piece in [
        PieceType::Pawn, PieceType::Knight, PieceType::Bishop,
        PieceType::Rook, PieceType::Queen,
    ] {
        let subset = attackers & pos.pieces_colored(piece, color);
        if subset != 0 {
            return (subset.trailing_zeros() as u8, midgame_value_of_piece(piece));
        }
    }
    let kings = attackers & pos.pieces_colored(PieceType::King, color);
    (kings.trailing_zeros() as u8, 0)
}

pub struct Searcher {
    pool: Arc<ThreadPool>,
    pub worker: Arc<Worker>,
    tt: Arc<TranspositionTable>,
    history: Arc<History>,
    material: material::Table,
    stack: Box<[Stack]>,
    pub nodes: u64,
    pub root_move: Move,
    pub root_value: i32,
}

impl Searcher {
    pub fn new(pool: Arc<ThreadPool>, worker: Arc<Worker>) -> Self {
        let tt = pool.tt();
        let history = pool.history();
        Self {
            pool,
            worker,
            tt,
            history,
            material: material::Table::new(),
            stack: vec![Stack::new(); (MAX_PLY + 4) as usize].into_boxed_slice(),
            nodes: 0,
            root_move: Move::NULL,
            root_value: -INFINITY,
        }
    }

    #[inline(always)]
    fn abort(&self) -> bool {
        self.pool.stop() || self.worker.cutoff_occurred()
    }

    pub fn search(
        &mut self,
        pos: &mut Position,
        mut alpha: i32,
        mut beta: i32,
        depth: i32,
        ply: i32,
        node_type: NodeType,
        cut_node: bool,
    ) -> i32 {
        if depth <= 0 {
            return self.qsearch(pos, alpha, beta, ply, 0);
        }

        let root = node_type == NodeType::Root;
        let pv = node_type != NodeType::NonPv;
        let alpha_orig = alpha;

        self.nodes += 1;

        if ply >= MAX_PLY - 2 {
            return evaluate(pos, &mut self.material).score;
        }
        if self.abort() {
            return alpha;
        }

        if !root {
            if pos.halfmove_clock >= 100 || pos.is_repetition() {
                return DRAW_VALUE;
            }

            // Mate distance pruning.
            alpha = alpha.max(-MATE_VALUE + ply);
            beta = beta.min(MATE_VALUE - ply - 1);
            if alpha >= beta {
                return alpha;
            }
        }

        let in_check = pos.is_check();

        let mut tt_move = Move::NULL;
        if let Some(entry) = self.tt.probe(pos.hash) {
            tt_move = entry.best_move;
            let tt_score = score_from_tt(entry.score, ply);

            if !pv && entry.depth as i32 >= depth {
                let cutoff = match entry.bound {
                    TT_BOUND_EXACT => true,
                    TT_BOUND_LOWER => tt_score >= beta,
                    TT_BOUND_UPPER => tt_score <= alpha,
                    _ => false,
                };
                if cutoff {
                    return tt_score;
                }
            }
        }

        let static_eval = if in_check {
            -INFINITY
        } else {
            evaluate(pos, &mut self.material).score
        };
        self.stack[ply as usize].static_eval = static_eval;

        // Null-move pruning; a failed null search leaves behind the threat
        // move that refuted doing nothing.
        let mut threat_move = Move::NULL;
        if !pv
            && !in_check
            && depth >= NULL_MOVE_MIN_DEPTH
            && static_eval >= beta
            && beta.abs() < MATE_VALUE - MAX_PLY
            && pos.non_pawn_material(pos.side_to_move) > 0
        {
            let r = 3 + depth / 4;

            pos.make_null_move();
            let null_value =
                -self.search(pos, -beta, -beta + 1, depth - r, ply + 1, NodeType::NonPv, !cut_node);
            pos.unmake_null_move();

            if self.abort() {
                return alpha;
            }
            if null_value >= beta {
                return if null_value >= MATE_VALUE - MAX_PLY { beta } else { null_value };
            }
            threat_move = self.stack[(ply + 1) as usize].current_move;
        }
        self.stack[ply as usize].threat_move = threat_move;

        let mut mp = MovePicker::new(pos, pv, tt_move, &self.stack[ply as usize], depth, None)
            .with_history(&self.history);

        let mut best_value = -INFINITY;
        let mut best_move = Move::NULL;
        let mut move_count = 0i32;

        loop {
            let mv = mp.get_next_move();
            if mv == Move::NULL {
                break;
            }

            move_count += 1;
            self.stack[ply as usize].current_move = mv;

            let is_capture = pos.is_capture(mv);
            let gives_check = pos.gives_check(mv);

            if !pos.make_move(mv) {
                move_count -= 1;
                continue;
            }

            let new_depth = depth - ONE_PLY + i32::from(gives_check);

            let value = if move_count == 1 {
                let child = if root || pv { NodeType::Pv } else { NodeType::NonPv };
                -self.search(pos, -beta, -alpha, new_depth, ply + 1, child, false)
            } else {
                let mut r = 0;
                if !in_check
                    && !is_capture
                    && !gives_check
                    && depth >= LMR_MIN_DEPTH
                    && move_count > LMR_MIN_MOVES
                {
                    r = LMR_TABLE[depth.min(63) as usize][move_count.min(63) as usize];
                    if pv {
                        r = (r - 1).max(0);
                    }
                }

                let mut v =
                    -self.search(pos, -alpha - 1, -alpha, new_depth - r, ply + 1, NodeType::NonPv, true);
                if v > alpha && r > 0 {
                    v = -self.search(pos, -alpha - 1, -alpha, new_depth, ply + 1, NodeType::NonPv, !cut_node);
                }
                if v > alpha && pv {
                    v = -self.search(pos, -beta, -alpha, new_depth, ply + 1, NodeType::Pv, false);
                }
                v
            };

            pos.unmake_move(mv);

            if self.abort() {
                return best_value.max(alpha_orig);
            }

            if value > best_value {
                best_value = value;
                best_move = mv;

                if root {
                    self.root_move = mv;
                    self.root_value = value;
                }

                if value > alpha {
                    alpha = value;
                    if alpha >= beta {
                        break;
                    }
                }
            }

            // Young brothers wait: the first move was searched sequentially,
            // the remaining ones may be shared with idle helpers.
            if !root
                && depth >= self.pool.min_split_depth()
                && self.worker.splits_size() < MAX_SPLITPOINTS_PER_THREAD
                && self.pool.slave_available(&self.worker)
            {
                let pool = self.pool.clone();
                let worker = self.worker.clone();
                let ss = self.stack[ply as usize];

                threads::split::<false>(
                    &pool,
                    &worker,
                    pos,
                    &mut mp,
                    &ss,
                    ply,
                    alpha,
                    beta,
                    &mut best_value,
                    &mut best_move,
                    depth,
                    threat_move,
                    move_count,
                    node_type,
                    cut_node,
                    &mut self.nodes,
                );

                if best_value >= beta {
                    break;
                }
                // The slaves drained the shared picker, so the next pull
                // yields the null move; if none could be recruited after all,
                // this thread keeps searching the remainder itself.
                alpha = alpha.max(best_value);
            }
        }

        if move_count == 0 {
            return if in_check { -MATE_VALUE + ply } else { DRAW_VALUE };
        }
        if best_value == -INFINITY {
            return alpha_orig;
        }

        if best_value >= beta && !pos.is_capture(best_move) {
            self.update_quiet_stats(pos, ply, best_move, depth, best_value);
        }

        let bound = if best_value >= beta {
            TT_BOUND_LOWER
        } else if pv && best_value > alpha_orig {
            TT_BOUND_EXACT
        } else {
            TT_BOUND_UPPER
        };
        self.tt.store(
            pos.hash,
            best_move,
            score_to_tt(best_value, ply),
            static_eval,
            depth as u8,
            bound,
        );

        best_value
    }

    fn update_quiet_stats(&mut self, pos: &Position, ply: i32, mv: Move, depth: i32, value: i32) {
        let ss = &mut self.stack[ply as usize];
        if ss.killers[0] != mv {
            ss.killers[1] = ss.killers[0];
            ss.killers[0] = mv;
        }
        if value >= MATE_VALUE - MAX_PLY {
            ss.mate_killer = mv;
        }

        let bonus = (depth * depth).min(HISTORY_PRUNE_BONUS_LIMIT);
        let piece = pos.type_of_piece_on(mv.from());
        self.history.update(pos.side_to_move, piece, mv.to(), bonus);
    }

    pub fn qsearch(&mut self, pos: &mut Position, mut alpha: i32, beta: i32, ply: i32, qdepth: i32) -> i32 {
        self.nodes += 1;

        if ply >= MAX_PLY - 2 {
            return evaluate(pos, &mut self.material).score;
        }
        if pos.halfmove_clock >= 100 || pos.is_repetition() {
            return DRAW_VALUE;
        }
        if self.pool.stop() {
            return alpha;
        }

        let in_check = pos.is_check();
        let ei = evaluate(pos, &mut self.material);

        let mut best_value = -INFINITY;
        if !in_check {
            best_value = ei.score;
            if best_value >= beta {
                return best_value;
            }
            if best_value > alpha {
                alpha = best_value;
            }
        }

        let mut mp = MovePicker::new(pos, false, Move::NULL, &self.stack[ply as usize], qdepth, Some(&ei))
            .with_history(&self.history);

        let mut move_count = 0;
        loop {
            let mv = mp.get_next_move();
            if mv == Move::NULL {
                break;
            }
            move_count += 1;

            if !pos.make_move(mv) {
                move_count -= 1;
                continue;
            }
            let value = -self.qsearch(pos, -beta, -alpha, ply + 1, qdepth - 1);
            pos.unmake_move(mv);

            if value > best_value {
                best_value = value;
                if value > alpha {
                    alpha = value;
                    if alpha >= beta {
                        break;
                    }
                }
            }
        }

        if in_check && move_count == 0 {
            return -MATE_VALUE + ply;
        }

        best_value
    }
}

// The work loop a thread runs inside a split point, master and slaves alike:
// pull a move under the lock, search it, publish the result. Returns the
// nodes this thread spent below the split.
pub fn split_point_search(pool: &Arc<ThreadPool>, worker: &Arc<Worker>, sp: &SplitPoint) -> u64 {
    let mut searcher = Searcher::new(pool.clone(), worker.clone());
    let mut pos = unsafe { (*sp.pos).clone() };
    searcher.stack[sp.ply as usize] = sp.ss;

    loop {
        if pool.stop() || worker.cutoff_occurred() {
            break;
        }

        let (mv, alpha) = {
            let mut guard = sp.shared.lock().unwrap();
            let picker = unsafe { &mut *sp.picker };
            let mv = picker.get_next_move_locked(&guard);
            if mv != Move::NULL {
                guard.move_count += 1;
            }
            (mv, guard.alpha)
        };

        if mv == Move::NULL {
            break;
        }

        searcher.stack[sp.ply as usize].current_move = mv;
        if !pos.make_move(mv) {
            continue;
        }
        let value = -searcher.search(
            &mut pos,
            -sp.beta,
            -alpha,
            sp.depth - ONE_PLY,
            sp.ply + 1,
            NodeType::NonPv,
            !sp.cut_node,
        );
        pos.unmake_move(mv);

        let mut guard = sp.shared.lock().unwrap();
        if !sp.cutoff_raised() && value > guard.best_value {
            guard.best_value = value;
            guard.best_move = mv;

            if value >= sp.beta {
                sp.raise_cutoff();
            } else if value > guard.alpha {
                guard.alpha = value;
            }
        }
    }

    searcher.nodes
}

// Root driver, run by the main search thread: iterative deepening with
// aspiration windows around the previous score.
pub fn think(pool: &Arc<ThreadPool>) {
    let params = pool.search_params();
    let mut pos = params.position.clone();
    let tm = params.time;

    pool.tt().new_search();

    let legal = generate_legal_moves(&pos);
    if legal.is_empty() {
        println!("bestmove 0000");
        return;
    }

    let mut searcher = Searcher::new(pool.clone(), pool.main_worker());
    searcher.root_move = legal[0];

    let max_depth = params.max_depth.clamp(1, MAX_PLY - 4);
    let mut best_move = legal[0];
    let mut prev_value = 0;

    for depth in 1..=max_depth {
        if pool.stop() {
            break;
        }
        if depth > 1 && !tm.is_infinite() && !tm.should_start_iteration() {
            break;
        }

        let mut delta = ASPIRATION_WINDOW;
        let (mut alpha, mut beta) = if depth >= 5 {
            ((prev_value - delta).max(-INFINITY), (prev_value + delta).min(INFINITY))
        } else {
            (-INFINITY, INFINITY)
        };

        let value = loop {
            let v = searcher.search(&mut pos, alpha, beta, depth, 0, NodeType::Root, false);
            if pool.stop() {
                break v;
            }
            if v <= alpha {
                alpha = (v - delta).max(-INFINITY);
            } else if v >= beta {
                beta = (v + delta).min(INFINITY);
            } else {
                break v;
            }
            delta += delta / 2;
        };

        if !pool.stop() {
            best_move = searcher.root_move;
            prev_value = value;
            print_info(pool, &mut pos, depth, value, searcher.nodes, &tm);
        }

        if tm.past_node_limit(searcher.nodes) || tm.out_of_time() {
            pool.request_stop();
            break;
        }
        if value.abs() >= MATE_VALUE - MAX_PLY {
            break;
        }
    }

    let ponder = pv_from_tt(pool, &mut pos, 2).get(1).copied();
    match ponder {
        Some(p) => println!("bestmove {} ponder {}", move_to_uci(best_move), move_to_uci(p)),
        None => println!("bestmove {}", move_to_uci(best_move)),
    }
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

fn print_info(pool: &Arc<ThreadPool>, pos: &mut Position, depth: i32, value: i32, nodes: u64, tm: &crate::search::time_management::TimeManager) {
    let elapsed = tm.elapsed().as_millis() as u64;
    let nps = if elapsed > 0 { nodes * 1000 / elapsed } else { 0 };

    let score_str = if value.abs() >= MATE_VALUE - MAX_PLY {
        let mate_in = (MATE_VALUE - value.abs() + 1) / 2;
        format!("mate {}", if value > 0 { mate_in } else { -mate_in })
    } else {
        format!("cp {}", value)
    };

    let pv = pv_from_tt(pool, pos, depth);
    let pv_str = pv.iter().map(|&m| move_to_uci(m)).collect::<Vec<_>>().join(" ");

    println!(
        "info depth {} score {} nodes {} nps {} time {} hashfull {} pv {}",
        depth,
        score_str,
        nodes,
        nps,
        elapsed,
        pool.tt().hashfull(),
        pv_str
    );
    use std::io::Write;
    let _ = std::io::stdout().flush();
}

// Recover the principal variation by walking transposition-table moves.
fn pv_from_tt(pool: &Arc<ThreadPool>, pos: &mut Position, max_len: i32) -> Vec<Move> {
    let tt = pool.tt();
    let mut pv = Vec::new();

    for _ in 0..max_len.max(1) {
        let entry = match tt.probe(pos.hash) {
            Some(e) => e,
            None => break,
        };
        let mv = entry.best_move;
        if mv == Move::NULL || !generate_legal_moves(pos).contains(&mv) {
            break;
        }
        if !pos.make_move(mv) {
            break;
        }
        pv.push(mv);
    }

    for &mv in pv.iter().rev() {
        pos.unmake_move(mv);
    }

    pv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_for_tests;

    #[test]
    fn test_see_simple_winning_capture() {
        init_for_tests();
        // Pawn takes undefended pawn.
        let pos = Position::from_fen("4k3/8/8/3p4/4P3/8/8/4K3 w - - 0 1").unwrap();
        let mv = Move::new(28, 35, crate::board::position::MoveType::Normal, PieceType::None);
        assert_eq!(see(&pos, mv), PAWN_VALUE_MG);
    }

    #[test]
    fn test_see_defended_piece() {
        init_for_tests();
        // Queen takes a knight defended by a pawn: loses queen for knight.
        let pos = Position::from_fen("4k3/5p2/4n3/8/8/8/4Q3/4K3 w - - 0 1").unwrap();
        let mv = Move::new(12, 44, crate::board::position::MoveType::Normal, PieceType::None);
        let expected = material::KNIGHT_VALUE_MG - material::QUEEN_VALUE_MG;
        assert_eq!(see(&pos, mv), expected);
    }

    #[test]
    fn test_see_equal_exchange() {
        init_for_tests();
        // Rook takes rook, recaptured by rook: net zero.
        let pos = Position::from_fen("3rk3/8/8/8/8/8/8/3RK2R w - - 0 1").unwrap();
        let mv = Move::new(3, 59, crate::board::position::MoveType::Normal, PieceType::None);
        assert_eq!(see(&pos, mv), 0);
    }

    #[test]
    fn test_see_xray_recapture() {
        init_for_tests();
        // Rook takes a pawn defended by a rook battery on the file.
        let pos = Position::from_fen("3rk3/3r4/8/8/8/8/3p4/3R1K2 w - - 0 1").unwrap();
        let mv = Move::new(3, 11, crate::board::position::MoveType::Normal, PieceType::None);
        assert_eq!(see(&pos, mv), PAWN_VALUE_MG - material::ROOK_VALUE_MG);
    }
}
