use crate::board::bitboard::iter_bits;
use crate::board::position::{Color, Move, PieceType, Position};
use crate::eval::evaluate::Score;

// Tables are written with rank 8 on the first row, so white squares are
// mirrored with `sq ^ 56` and black squares index directly.

const PAWN_MG: [i32; 64] = [
      0,   0,   0,   0,   0,   0,   0,   0,
     50,  50,  50,  50,  50,  50,  50,  50,
     10,  10,  20,  30,  30,  20,  10,  10,
      5,   5,  10,  25,  25,  10,   5,   5,
      0,   0,   0,  20,  20,   0,   0,   0,
      5,  -5, -10,   0,   0, -10,  -5,   5,
      5,  10,  10, -20, -20,  10,  10,   5,
      0,   0,   0,   0,   0,   0,   0,   0,
];

const PAWN_EG: [i32; 64] = [
      0,   0,   0,   0,   0,   0,   0,   0,
     80,  80,  80,  80,  80,  80,  80,  80,
     50,  50,  50,  50,  50,  50,  50,  50,
     30,  30,  30,  30,  30,  30,  30,  30,
     20,  20,  20,  20,  20,  20,  20,  20,
     10,  10,  10,  10,  10,  10,  10,  10,
     10,  10,  10,  10,  10,  10,  10,  10,
      0,   0,   0,   0,   0,   0,   0,   0,
];

const KNIGHT_MG: [i32; 64] = [
    -50, -40, -30, -30, -30, -30, -40, -50,
    -40, -20,   0,   0,   0,   0, -20, -40,
    -30,   0,  10,  15,  15,  10,   0, -30,
    -30,   5,  15,  20,  20,  15,   5, -30,
    -30,   0,  15,  20,  20,  15,   0, -30,
    -30,   5,  10,  15,  15,  10,   5, -30,
    -40, -20,   0,   5,   5,   0, -20, -40,
    -50, -40, -30, -30, -30, -30, -40, -50,
];

const KNIGHT_EG: [i32; 64] = [
    -50, -40, -30, -30, -30, -30, -40, -50,
    -40, -20,   0,   0,   0,   0, -20, -40,
    -30,   0,  10,  15,  15,  10,   0, -30,
    -30,   5,  15,  20,  20,  15,   5, -30,
    -30,   0,  15,  20,  20,  15,   0, -30,
    -30,   5,  10,  15,  15,  10,   5, -30,
    -40, -20,   0,   5,   5,   0, -20, -40,
    -50, -40, -20, -30, -30, -20, -40, -50,
];

const BISHOP_MG: [i32; 64] = [
    -20, -10, -10, -10, -10, -10, -10, -20,
    -10,   0,   0,   0,   0,   0,   0, -10,
    -10,   0,   5,  10,  10,   5,   0, -10,
    -10,   5,   5,  10,  10,   5,   5, -10,
    -10,   0,  10,  10,  10,  10,   0, -10,
    -10,  10,  10,  10,  10,  10,  10, -10,
    -10,   5,   0,   0,   0,   0,   5, -10,
    -20, -10, -10, -10, -10, -10, -10, -20,
];

const BISHOP_EG: [i32; 64] = BISHOP_MG;

const ROOK_MG: [i32; 64] = [
      0,   0,   0,   0,   0,   0,   0,   0,
      5,  10,  10,  10,  10,  10,  10,   5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
     -5,   0,   0,   0,   0,   0,   0,  -5,
      0,   0,   0,   5,   5,   0,   0,   0,
];

const ROOK_EG: [i32; 64] = ROOK_MG;

const QUEEN_MG: [i32; 64] = [
    -20, -10, -10,  -5,  -5, -10, -10, -20,
    -10,   0,   0,   0,   0,   0,   0, -10,
    -10,   0,   5,   5,   5,   5,   0, -10,
     -5,   0,   5,   5,   5,   5,   0,  -5,
      0,   0,   5,   5,   5,   5,   0,  -5,
    -10,   5,   5,   5,   5,   5,   0, -10,
    -10,   0,   5,   0,   0,   0,   0, -10,
    -20, -10, -10,  -5,  -5, -10, -10, -20,
];

const QUEEN_EG: [i32; 64] = QUEEN_MG;

const KING_MG: [i32; 64] = [
    -30, -40, -40, -50, -50, -40, -40, -30,
    -30, -40, -40, -50, -50, -40, -40, -30,
    -30, -40, -40, -50, -50, -40, -40, -30,
    -30, -40, -40, -50, -50, -40, -40, -30,
    -20, -30, -30, -40, -40, -30, -30, -20,
    -10, -20, -20, -20, -20, -20, -20, -10,
     20,  20,   0,   0,   0,   0,  20,  20,
     20,  30,  10,   0,   0,  10,  30,  20,
];

const KING_EG: [i32; 64] = [
    -50, -40, -30, -20, -20, -30, -40, -50,
    -30, -20, -10,   0,   0, -10, -20, -30,
    -30, -10,  20,  30,  30,  20, -10, -30,
    -30, -10,  30,  40,  40,  30, -10, -30,
    -30, -10,  30,  40,  40,  30, -10, -30,
    -30, -10,  20,  30,  30,  20, -10, -30,
    -30, -30,   0,   0,   0,   0, -30, -30,
    -50, -30, -30, -30, -30, -30, -30, -50,
];

#[inline(always)]
fn tables(piece: PieceType) -> (&'static [i32; 64], &'static [i32; 64]) {
    match piece {
        PieceType::Pawn => (&PAWN_MG, &PAWN_EG),
        PieceType::Knight => (&KNIGHT_MG, &KNIGHT_EG),
        PieceType::Bishop => (&BISHOP_MG, &BISHOP_EG),
        PieceType::Rook => (&ROOK_MG, &ROOK_EG),
        PieceType::Queen => (&QUEEN_MG, &QUEEN_EG),
        _ => (&KING_MG, &KING_EG),
    }
}

#[inline(always)]
pub fn psq(piece: PieceType, color: Color, square: u8) -> Score {
    let idx = match color {
        Color::White => (square ^ 56) as usize,
        Color::Black => square as usize,
    };
    let (mg, eg) = tables(piece);
    Score::new(mg[idx], eg[idx])
}

// Midgame piece-square delta of a move, from the mover's point of view.
#[inline(always)]
pub fn mg_pst_delta(pos: &Position, mv: Move) -> i32 {
    let (piece, color) = pos.piece_at(mv.from());
    psq(piece, color, mv.to()).mg - psq(piece, color, mv.from()).mg
}

// Full piece-square score, white point of view.
pub fn psq_score(pos: &Position) -> Score {
    let mut score = Score::zero();

    for piece in [
        PieceType::Pawn, PieceType::Knight, PieceType::Bishop,
        PieceType::Rook, PieceType::Queen, PieceType::King,
    ] {
        for sq in iter_bits(pos.pieces_colored(piece, Color::White)) {
            score = score.add(psq(piece, Color::White, sq));
        }
        for sq in iter_bits(pos.pieces_colored(piece, Color::Black)) {
            score = score.sub(psq(piece, Color::Black, sq));
        }
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_for_tests;

    #[test]
    fn test_symmetric_startpos() {
        init_for_tests();
        let pos = Position::startpos();
        let score = psq_score(&pos);
        assert_eq!(score.mg, 0);
        assert_eq!(score.eg, 0);
    }

    #[test]
    fn test_pst_delta_prefers_center() {
        init_for_tests();
        let pos = Position::startpos();
        // e2e4 gains midgame pst, Nb1a3 loses it relative to Nb1c3.
        let e2e4 = Move::new(12, 28, crate::board::position::MoveType::Normal, PieceType::None);
        assert!(mg_pst_delta(&pos, e2e4) > 0);

        let nb1c3 = Move::new(1, 18, crate::board::position::MoveType::Normal, PieceType::None);
        let nb1a3 = Move::new(1, 16, crate::board::position::MoveType::Normal, PieceType::None);
        assert!(mg_pst_delta(&pos, nb1c3) > mg_pst_delta(&pos, nb1a3));
    }
}
