use crate::board::bitboard::{popcount, Bitboard};
use crate::board::position::{Color, PieceType, Position};
use crate::eval::material::{self, PIECE_VALUES, PHASE_MIDGAME};
use crate::eval::endgame::SCALE_FACTOR_NORMAL;
use crate::eval::pst;
use crate::movegen::magic::all_attacks;

pub const MATE_VALUE: i32 = 31000;
pub const DRAW_VALUE: i32 = 0;
pub const INFINITY: i32 = 32000;

const TEMPO_BONUS: i32 = 10;

// Files c..f on the own half, the area the space term counts.
const SPACE_MASK: [Bitboard; 2] = [0x0000_0000_3C3C_3C00, 0x003C_3C3C_0000_0000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    pub mg: i32,
    pub eg: i32,
}

impl Score {
    #[inline(always)]
    pub const fn new(mg: i32, eg: i32) -> Self {
        Self { mg, eg }
    }

    #[inline(always)]
    pub const fn zero() -> Self {
        Self { mg: 0, eg: 0 }
    }

    #[inline(always)]
    pub const fn add(self, other: Self) -> Self {
        Self {
            mg: self.mg + other.mg,
            eg: self.eg + other.eg,
        }
    }

    #[inline(always)]
    pub const fn sub(self, other: Self) -> Self {
        Self {
            mg: self.mg - other.mg,
            eg: self.eg - other.eg,
        }
    }

    #[inline(always)]
    pub const fn neg(self) -> Self {
        Self {
            mg: -self.mg,
            eg: -self.eg,
        }
    }
}

impl std::ops::Add for Score {
    type Output = Score;
    fn add(self, other: Score) -> Score {
        Score::add(self, other)
    }
}

impl std::ops::Sub for Score {
    type Output = Score;
    fn sub(self, other: Score) -> Score {
        Score::sub(self, other)
    }
}

impl std::ops::Neg for Score {
    type Output = Score;
    fn neg(self) -> Score {
        Score::neg(self)
    }
}

// Evaluation result plus the cheap byproducts the move picker wants as hints.
pub struct EvalInfo {
    pub score: i32,
    pub attacked_by: [Bitboard; 2],
    pub specialized_endgame: bool,
}

fn material_score(pos: &Position, color: Color) -> Score {
    let mut score = Score::zero();
    for piece in [
        PieceType::Pawn, PieceType::Knight, PieceType::Bishop,
        PieceType::Rook, PieceType::Queen,
    ] {
        let count = pos.piece_count(color, piece) as i32;
        let v = PIECE_VALUES[piece as usize];
        score = score.add(Score::new(count * v.mg, count * v.eg));
    }
    score
}

// Full evaluation, side-to-move point of view.
pub fn evaluate(pos: &Position, table: &mut material::Table) -> EvalInfo {
    let entry = *table.probe(pos);

    let attacked_by = [
        all_attacks(pos, Color::White),
        all_attacks(pos, Color::Black),
    ];

    if entry.specialized_eval_exists() {
        return EvalInfo {
            score: entry.evaluate(pos),
            attacked_by,
            specialized_endgame: true,
        };
    }

    let mut score = material_score(pos, Color::White).sub(material_score(pos, Color::Black));
    score = score.add(Score::new(entry.value as i32, entry.value as i32));
    score = score.add(pst::psq_score(pos));

    if entry.space_weight.mg != 0 {
        let white_space =
            popcount(attacked_by[0] & SPACE_MASK[0] & !attacked_by[1]) as i32;
        let black_space =
            popcount(attacked_by[1] & SPACE_MASK[1] & !attacked_by[0]) as i32;
        let weighted = entry.space_weight.mg * (white_space - black_space) / 16;
        score = score.add(Score::new(weighted, 0));
    }

    // The winning side's endgame score is scaled towards the draw value.
    let strong = if score.eg > 0 { Color::White } else { Color::Black };
    let sf = entry.scale_factor(pos, strong) as i32;
    let eg = score.eg * sf / SCALE_FACTOR_NORMAL as i32;

    let phase = entry.game_phase as i32;
    let v = (score.mg * phase + eg * (PHASE_MIDGAME as i32 - phase)) / PHASE_MIDGAME as i32;

    let score = if pos.side_to_move == Color::White { v } else { -v } + TEMPO_BONUS;

    EvalInfo {
        score,
        attacked_by,
        specialized_endgame: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_for_tests;

    #[test]
    fn test_score_operators() {
        let s1 = Score::new(100, 200);
        let s2 = Score::new(50, 75);

        assert_eq!(s1 + s2, Score::new(150, 275));
        assert_eq!(s1 - s2, Score::new(50, 125));
        assert_eq!(-s1, Score::new(-100, -200));
    }

    #[test]
    fn test_startpos_near_balanced() {
        init_for_tests();
        let pos = Position::startpos();
        let mut table = material::Table::new();
        let info = evaluate(&pos, &mut table);
        assert!(info.score.abs() <= 50);
        assert!(!info.specialized_endgame);
    }

    #[test]
    fn test_extra_queen_wins_eval() {
        init_for_tests();
        let pos =
            Position::from_fen("rnb1kbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").unwrap();
        let mut table = material::Table::new();
        let info = evaluate(&pos, &mut table);
        assert!(info.score > material::QUEEN_VALUE_MG / 2);
    }

    #[test]
    fn test_specialized_dispatch() {
        init_for_tests();
        let pos = Position::from_fen("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1").unwrap();
        let mut table = material::Table::new();
        let info = evaluate(&pos, &mut table);
        assert!(info.specialized_endgame);
        assert!(info.score > 0);
    }

    #[test]
    fn test_eval_flips_with_side_to_move() {
        init_for_tests();
        let white =
            Position::from_fen("rnb1kbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1").unwrap();
        let black =
            Position::from_fen("rnb1kbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR b KQkq - 0 1").unwrap();
        let mut table = material::Table::new();
        let w = evaluate(&white, &mut table).score;
        let b = evaluate(&black, &mut table).score;
        assert!(w > 0 && b < 0);
    }
}
