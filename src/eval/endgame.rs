use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::board::bitboard::{get_file, get_rank, has_bit, square_distance, FILE_A, FILE_H};
use crate::board::position::{Color, PieceType, Position};
use crate::eval::material::{PAWN_VALUE_EG, QUEEN_VALUE_EG, ROOK_VALUE_EG};
use crate::movegen::moves::generate_legal_moves;

pub type EndgameValue = fn(&Position, Color) -> i32;
pub type EndgameScale = fn(&Position, Color) -> u8;

pub const SCALE_FACTOR_DRAW: u8 = 0;
pub const SCALE_FACTOR_NORMAL: u8 = 64;
pub const SCALE_FACTOR_NONE: u8 = 255;

pub const VALUE_KNOWN_WIN: i32 = 10000;
pub const VALUE_DRAW: i32 = 0;

const DARK_SQUARES: u64 = 0xAA55_AA55_AA55_AA55;

// Drive the losing king towards the board edge.
const PUSH_TO_EDGES: [i32; 64] = [
    100, 90, 80, 70, 70, 80, 90, 100,
     90, 70, 60, 50, 50, 60, 70,  90,
     80, 60, 40, 30, 30, 40, 60,  80,
     70, 50, 30, 20, 20, 30, 50,  70,
     70, 50, 30, 20, 20, 30, 50,  70,
     80, 60, 40, 30, 30, 40, 60,  80,
     90, 70, 60, 50, 50, 60, 70,  90,
    100, 90, 80, 70, 70, 80, 90, 100,
];

// Drive the losing king towards the a1/h8 corners (KBN mates).
const PUSH_TO_CORNERS: [i32; 64] = [
    200, 190, 180, 170, 160, 150, 140, 130,
    190, 180, 170, 160, 150, 140, 130, 140,
    180, 170, 155, 140, 140, 125, 140, 150,
    170, 160, 140, 120, 110, 140, 150, 160,
    160, 150, 140, 110, 120, 140, 160, 170,
    150, 140, 125, 140, 140, 155, 170, 180,
    140, 130, 140, 150, 160, 170, 180, 190,
    130, 140, 150, 160, 170, 180, 190, 200,
];

const PUSH_CLOSE: [i32; 8] = [0, 0, 100, 80, 60, 40, 20, 10];
const PUSH_AWAY: [i32; 8] = [0, 5, 20, 40, 60, 80, 90, 100];

#[inline(always)]
fn relative_rank(color: Color, square: u8) -> u8 {
    match color {
        Color::White => get_rank(square),
        Color::Black => 7 - get_rank(square),
    }
}

#[inline(always)]
fn signed(value: i32, strong: Color, pos: &Position) -> i32 {
    if pos.side_to_move == strong {
        value
    } else {
        -value
    }
}

// Generic "king and enough material versus bare king".
pub fn evaluate_kxk(pos: &Position, strong: Color) -> i32 {
    let weak = strong.opposite();

    // Stalemate trap: the bare king may have no moves at all.
    if pos.side_to_move == weak && generate_legal_moves(pos).is_empty() && !pos.is_check() {
        return VALUE_DRAW;
    }

    let strong_ksq = pos.king_square(strong);
    let weak_ksq = pos.king_square(weak);

    let mut value = pos.non_pawn_material(strong)
        + pos.piece_count(strong, PieceType::Pawn) as i32 * PAWN_VALUE_EG
        + PUSH_TO_EDGES[weak_ksq as usize]
        + PUSH_CLOSE[square_distance(strong_ksq, weak_ksq) as usize];

    let mating_material = pos.piece_count(strong, PieceType::Queen) > 0
        || pos.piece_count(strong, PieceType::Rook) > 0
        || pos.piece_count(strong, PieceType::Bishop) >= 2
        || (pos.piece_count(strong, PieceType::Bishop) >= 1
            && pos.piece_count(strong, PieceType::Knight) >= 1);
    if mating_material {
        value += VALUE_KNOWN_WIN;
    }

    signed(value, strong, pos)
}

// King and pawn versus king, without a bitbase: king activity heuristic.
pub fn evaluate_kpk(pos: &Position, strong: Color) -> i32 {
    let weak = strong.opposite();
    let pawn = pos.pieces_colored(PieceType::Pawn, strong).trailing_zeros() as u8;
    let strong_ksq = pos.king_square(strong);
    let weak_ksq = pos.king_square(weak);

    let rank = relative_rank(strong, pawn) as i32;
    let value = PAWN_VALUE_EG
        + 24 * rank
        + 8 * (square_distance(weak_ksq, pawn) as i32 - square_distance(strong_ksq, pawn) as i32);

    signed(value.max(8), strong, pos)
}

// Bishop and knight mate: push the king to the bishop's corner.
pub fn evaluate_kbnk(pos: &Position, strong: Color) -> i32 {
    let weak = strong.opposite();
    let strong_ksq = pos.king_square(strong);
    let mut weak_ksq = pos.king_square(weak);

    // The table drives towards a1/h8; mirror when the bishop is light-squared.
    let bishop = pos.pieces_colored(PieceType::Bishop, strong).trailing_zeros() as u8;
    if !has_bit(DARK_SQUARES, bishop) {
        weak_ksq ^= 7;
    }

    let value = VALUE_KNOWN_WIN
        + PUSH_CLOSE[square_distance(strong_ksq, weak_ksq) as usize]
        + PUSH_TO_CORNERS[weak_ksq as usize];

    signed(value, strong, pos)
}

// Rook versus pawn: winning unless the pawn is far advanced and supported.
pub fn evaluate_krkp(pos: &Position, strong: Color) -> i32 {
    let weak = strong.opposite();
    let strong_ksq = pos.king_square(strong);
    let weak_ksq = pos.king_square(weak);
    let pawn = pos.pieces_colored(PieceType::Pawn, weak).trailing_zeros() as u8;

    let pawn_rank = relative_rank(weak, pawn) as i32;
    let value = if square_distance(strong_ksq, pawn) <= 1 && pawn_rank < 5 {
        ROOK_VALUE_EG - PAWN_VALUE_EG
    } else {
        let support = square_distance(weak_ksq, pawn) as i32;
        ROOK_VALUE_EG - PAWN_VALUE_EG - 12 * pawn_rank + 8 * support
    };

    signed(value.max(40), strong, pos)
}

// Rook versus bishop: a fortress draw apart from edge accidents.
pub fn evaluate_krkb(pos: &Position, strong: Color) -> i32 {
    let weak_ksq = pos.king_square(strong.opposite());
    signed(PUSH_TO_EDGES[weak_ksq as usize], strong, pos)
}

// Rook versus knight: drawish unless the knight strays from its king.
pub fn evaluate_krkn(pos: &Position, strong: Color) -> i32 {
    let weak = strong.opposite();
    let weak_ksq = pos.king_square(weak);
    let knight = pos.pieces_colored(PieceType::Knight, weak).trailing_zeros() as u8;

    let value = PUSH_TO_EDGES[weak_ksq as usize]
        + PUSH_AWAY[square_distance(weak_ksq, knight) as usize];

    signed(value, strong, pos)
}

// Queen versus pawn: won unless the pawn is on the seventh on a drawing file.
pub fn evaluate_kqkp(pos: &Position, strong: Color) -> i32 {
    let weak = strong.opposite();
    let strong_ksq = pos.king_square(strong);
    let weak_ksq = pos.king_square(weak);
    let pawn = pos.pieces_colored(PieceType::Pawn, weak).trailing_zeros() as u8;

    let mut value = PUSH_CLOSE[square_distance(strong_ksq, weak_ksq) as usize];

    let drawing_file = {
        let f = get_file(pawn);
        f == 0 || f == 2 || f == 5 || f == 7
    };
    if relative_rank(weak, pawn) != 6
        || square_distance(weak_ksq, pawn) != 1
        || !drawing_file
    {
        value += QUEEN_VALUE_EG - PAWN_VALUE_EG;
    }

    signed(value, strong, pos)
}

// Queen versus rook: a known win, helped along by king activity.
pub fn evaluate_kqkr(pos: &Position, strong: Color) -> i32 {
    let weak = strong.opposite();
    let strong_ksq = pos.king_square(strong);
    let weak_ksq = pos.king_square(weak);

    let value = QUEEN_VALUE_EG - ROOK_VALUE_EG
        + PUSH_TO_EDGES[weak_ksq as usize]
        + PUSH_CLOSE[square_distance(strong_ksq, weak_ksq) as usize];

    signed(value, strong, pos)
}

// Minor pieces only on both sides: dead draw.
pub fn evaluate_kmm_km(_pos: &Position, _strong: Color) -> i32 {
    VALUE_DRAW
}

// Bishop with rook-file pawns and the wrong bishop color cannot win.
pub fn scale_kbps_k(pos: &Position, strong: Color) -> u8 {
    let pawns = pos.pieces_colored(PieceType::Pawn, strong);
    let weak_ksq = pos.king_square(strong.opposite());
    let bishop = pos.pieces_colored(PieceType::Bishop, strong).trailing_zeros() as u8;

    for (file, corner_dark) in [(FILE_A, strong == Color::Black), (FILE_H, strong == Color::White)]
    {
        if pawns & !file != 0 {
            continue;
        }
        let corner: u8 = match (file == FILE_A, strong) {
            (true, Color::White) => 56,
            (true, Color::Black) => 0,
            (false, Color::White) => 63,
            (false, Color::Black) => 7,
        };
        let wrong_bishop = has_bit(DARK_SQUARES, bishop) != corner_dark;
        if wrong_bishop && square_distance(weak_ksq, corner) <= 1 {
            return SCALE_FACTOR_DRAW;
        }
    }

    SCALE_FACTOR_NONE
}

// Queen against rook and pawns: a pawn-anchored rook can be a fortress.
pub fn scale_kqkrps(pos: &Position, strong: Color) -> u8 {
    let weak = strong.opposite();
    let weak_ksq = pos.king_square(weak);
    let rook = pos.pieces_colored(PieceType::Rook, weak).trailing_zeros() as u8;

    let rook_defended =
        crate::movegen::magic::get_pawn_attacks(rook, strong) & pos.pieces_colored(PieceType::Pawn, weak) != 0;
    if rook_defended
        && relative_rank(weak, rook) <= 2
        && relative_rank(weak, weak_ksq) <= 1
        && square_distance(weak_ksq, rook) <= 3
    {
        return SCALE_FACTOR_DRAW;
    }

    SCALE_FACTOR_NONE
}

// King and pawns versus bare king: rook-file pawns with the defending king in
// the corner cannot be converted.
pub fn scale_kps_k(pos: &Position, strong: Color) -> u8 {
    let pawns = pos.pieces_colored(PieceType::Pawn, strong);
    let weak_ksq = pos.king_square(strong.opposite());

    for file in [FILE_A, FILE_H] {
        if pawns & !file != 0 {
            continue;
        }
        let corner: u8 = match (file == FILE_A, strong) {
            (true, Color::White) => 56,
            (true, Color::Black) => 0,
            (false, Color::White) => 63,
            (false, Color::Black) => 7,
        };
        if square_distance(weak_ksq, corner) <= 1 {
            return SCALE_FACTOR_DRAW;
        }
    }

    SCALE_FACTOR_NONE
}

// Single pawn each: drawn when the defender blockades the passer.
pub fn scale_kpkp(pos: &Position, strong: Color) -> u8 {
    let weak = strong.opposite();
    let pawn = pos.pieces_colored(PieceType::Pawn, strong).trailing_zeros() as u8;
    let weak_ksq = pos.king_square(weak);

    let in_front = match strong {
        Color::White => weak_ksq > pawn && get_file(weak_ksq) == get_file(pawn),
        Color::Black => weak_ksq < pawn && get_file(weak_ksq) == get_file(pawn),
    };
    if in_front && square_distance(weak_ksq, pawn) <= 2 {
        return SCALE_FACTOR_DRAW;
    }

    SCALE_FACTOR_NONE
}

// Rook and pawn versus rook: the third-rank defense holds when the defending
// king reaches the promotion path.
pub fn scale_krpkr(pos: &Position, strong: Color) -> u8 {
    let weak = strong.opposite();
    let pawn = pos.pieces_colored(PieceType::Pawn, strong).trailing_zeros() as u8;
    let weak_ksq = pos.king_square(weak);

    if get_file(weak_ksq) == get_file(pawn) && relative_rank(strong, weak_ksq) > relative_rank(strong, pawn)
    {
        return SCALE_FACTOR_DRAW + 16;
    }

    SCALE_FACTOR_NONE
}

// Knight and rook-file pawn on the seventh: cornered defender draws.
pub fn scale_knpk(pos: &Position, strong: Color) -> u8 {
    let pawn = pos.pieces_colored(PieceType::Pawn, strong).trailing_zeros() as u8;
    let weak_ksq = pos.king_square(strong.opposite());

    if relative_rank(strong, pawn) == 6 && (get_file(pawn) == 0 || get_file(pawn) == 7) {
        let promo = match strong {
            Color::White => pawn + 8,
            Color::Black => pawn - 8,
        };
        if square_distance(weak_ksq, promo) <= 1 {
            return SCALE_FACTOR_DRAW;
        }
    }

    SCALE_FACTOR_NONE
}

struct Registry {
    values: HashMap<u64, (EndgameValue, Color)>,
    scales: HashMap<u64, (EndgameScale, Color)>,
}

impl Registry {
    fn add_value(&mut self, code: &str, f: EndgameValue) {
        for strong in [Color::White, Color::Black] {
            self.values.insert(material_key_for(code, strong), (f, strong));
        }
    }

    fn add_scale(&mut self, code: &str, f: EndgameScale) {
        for strong in [Color::White, Color::Black] {
            self.scales.insert(material_key_for(code, strong), (f, strong));
        }
    }
}

// Material key of an endgame code such as "KRKP": the first group belongs to
// the strong side. Only piece counts matter, so any placement works.
fn material_key_for(code: &str, strong: Color) -> u64 {
    let split = code[1..].find('K').expect("endgame code needs two kings") + 1;
    let (strong_str, weak_str) = code.split_at(split);

    let row = |pieces: &str, white: bool| -> String {
        let mut s: String = pieces
            .chars()
            .map(|c| if white { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() })
            .collect();
        if pieces.len() < 8 {
            s.push((b'0' + (8 - pieces.len()) as u8) as char);
        }
        s
    };

    let (white_str, black_str) = match strong {
        Color::White => (strong_str, weak_str),
        Color::Black => (weak_str, strong_str),
    };

    let fen = format!("{}/8/8/8/8/8/8/{} w - - 0 1", row(black_str, false), row(white_str, true));
    Position::from_fen(&fen).expect("endgame code FEN").material_key()
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut r = Registry {
        values: HashMap::new(),
        scales: HashMap::new(),
    };

    r.add_value("KPK", evaluate_kpk);
    r.add_value("KNNK", evaluate_kmm_km);
    r.add_value("KBNK", evaluate_kbnk);
    r.add_value("KRKP", evaluate_krkp);
    r.add_value("KRKB", evaluate_krkb);
    r.add_value("KRKN", evaluate_krkn);
    r.add_value("KQKP", evaluate_kqkp);
    r.add_value("KQKR", evaluate_kqkr);

    r.add_scale("KRPKR", scale_krpkr);
    r.add_scale("KNPK", scale_knpk);
    r.add_scale("KBPKB", scale_kbps_k);

    r
});

// Build the registry eagerly so every later lookup is read-only.
pub fn init() {
    Lazy::force(&REGISTRY);
}

pub fn probe_value(key: u64) -> Option<(EndgameValue, Color)> {
    REGISTRY.values.get(&key).copied()
}

pub fn probe_scale(key: u64) -> Option<(EndgameScale, Color)> {
    REGISTRY.scales.get(&key).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init_for_tests;

    #[test]
    fn test_registry_has_both_colors() {
        init_for_tests();
        let white_kpk = Position::from_fen("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1").unwrap();
        let black_kpk = Position::from_fen("4k3/4p3/8/8/8/8/8/4K3 w - - 0 1").unwrap();

        let (_, strong_w) = probe_value(white_kpk.material_key()).unwrap();
        let (_, strong_b) = probe_value(black_kpk.material_key()).unwrap();
        assert_eq!(strong_w, Color::White);
        assert_eq!(strong_b, Color::Black);
    }

    #[test]
    fn test_kxk_prefers_cornered_king() {
        init_for_tests();
        let cornered = Position::from_fen("k7/8/1Q6/8/8/8/8/4K3 w - - 0 1").unwrap();
        let centered = Position::from_fen("8/8/8/3k4/8/8/1Q6/4K3 w - - 0 1").unwrap();

        let v_corner = evaluate_kxk(&cornered, Color::White);
        let v_center = evaluate_kxk(&centered, Color::White);
        assert!(v_corner > v_center);
        assert!(v_center > VALUE_KNOWN_WIN);
    }

    #[test]
    fn test_kxk_stalemate_is_draw() {
        init_for_tests();
        // Black to move, not in check, no legal moves.
        let pos = Position::from_fen("k7/8/1QK5/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(evaluate_kxk(&pos, Color::White), VALUE_DRAW);
    }

    #[test]
    fn test_value_sign_follows_side_to_move() {
        init_for_tests();
        let white_to_move = Position::from_fen("4k3/8/8/8/8/8/8/Q3K3 w - - 0 1").unwrap();
        let black_to_move = Position::from_fen("4k3/8/8/8/8/8/8/Q3K3 b - - 0 1").unwrap();

        assert!(evaluate_kxk(&white_to_move, Color::White) > 0);
        assert!(evaluate_kxk(&black_to_move, Color::White) < 0);
    }

    #[test]
    fn test_kqkr_is_winning() {
        init_for_tests();
        let pos = Position::from_fen("3rk3/8/8/8/8/8/8/3QK3 w - - 0 1").unwrap();
        let (f, strong) = probe_value(pos.material_key()).unwrap();
        assert_eq!(strong, Color::White);
        assert!(f(&pos, strong) > QUEEN_VALUE_EG - ROOK_VALUE_EG);
    }

    #[test]
    fn test_wrong_bishop_corner_draw() {
        init_for_tests();
        // White h-pawn, light-squared bishop, black king on h8: the bishop
        // never controls the promotion corner.
        let pos = Position::from_fen("7k/8/8/8/8/7P/8/1B2K3 w - - 0 1").unwrap();
        assert_eq!(scale_kbps_k(&pos, Color::White), SCALE_FACTOR_DRAW);

        // Dark-squared bishop covers h8 and keeps full scale.
        let pos = Position::from_fen("7k/8/8/8/8/7P/8/B3K3 w - - 0 1").unwrap();
        assert_eq!(scale_kbps_k(&pos, Color::White), SCALE_FACTOR_NONE);
    }
}
