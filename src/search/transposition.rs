use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::board::position::{Move, MoveType, PieceType};
use crate::eval::evaluate::MATE_VALUE;

const MAX_PLY: i32 = 128;

pub const TT_BOUND_NONE: u8 = 0;
pub const TT_BOUND_EXACT: u8 = 1;
pub const TT_BOUND_LOWER: u8 = 2;
pub const TT_BOUND_UPPER: u8 = 3;

// Lockless entry: key is stored xored with the data word, so a torn write is
// detected as a probe miss instead of corrupting the search.
#[repr(align(16))]
pub struct TTEntry {
    key_xor: AtomicU64,
    data: AtomicU64,
}

impl TTEntry {
    const fn new() -> Self {
        Self {
            key_xor: AtomicU64::new(0),
            data: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TTData {
    pub best_move: Move,
    pub score: i32,
    pub static_eval: i32,
    pub depth: u8,
    pub bound: u8,
    pub age: u8,
}

// One data word: the low half carries move, depth, bound and age; the high
// half carries score and static eval as two's-complement i16 lanes. Every
// engine score fits an i16 (mate scores stay below 32000 even after ply
// adjustment), so no offset bias is needed.
//
//   bits  0..16  best move        bits 32..48  score (i16)
//   bits 16..24  depth            bits 48..64  static eval (i16)
//   bits 24..26  bound
//   bits 26..32  age (6 bits)
impl TTData {
    fn pack(&self) -> u64 {
        let score_lane = self.score.clamp(-32767, 32767) as i16 as u16;
        let eval_lane = self.static_eval.clamp(-32767, 32767) as i16 as u16;

        (self.best_move.as_u16() as u64)
            | ((self.depth as u64) << 16)
            | (((self.bound & 0x3) as u64) << 24)
            | (((self.age & 0x3F) as u64) << 26)
            | ((score_lane as u64) << 32)
            | ((eval_lane as u64) << 48)
    }

    fn unpack(packed: u64) -> Self {
        Self {
            best_move: Move::from_u16(packed as u16),
            depth: (packed >> 16) as u8,
            bound: ((packed >> 24) & 0x3) as u8,
            age: ((packed >> 26) & 0x3F) as u8,
            score: ((packed >> 32) as u16 as i16) as i32,
            static_eval: ((packed >> 48) as u16 as i16) as i32,
        }
    }
}

pub struct TranspositionTable {
    table: Box<[TTEntry]>,
    size_mask: usize,
    age: AtomicU64,
}

impl TranspositionTable {
    pub fn new(size_mb: usize) -> Self {
        let size_bytes = size_mb.max(1) * 1024 * 1024;
        let num_entries = size_bytes / mem::size_of::<TTEntry>();
        let size = num_entries.next_power_of_two() / 2;

        let mut table = Vec::with_capacity(size);
        for _ in 0..size {
            table.push(TTEntry::new());
        }

        Self {
            table: table.into_boxed_slice(),
            size_mask: size - 1,
            age: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn probe(&self, hash: u64) -> Option<TTData> {
        let entry = &self.table[(hash as usize) & self.size_mask];

        let key_xor = entry.key_xor.load(Ordering::Relaxed);
        let data = entry.data.load(Ordering::Relaxed);

        if key_xor ^ data == hash {
            Some(TTData::unpack(data))
        } else {
            None
        }
    }

    pub fn store(&self, hash: u64, best_move: Move, score: i32, static_eval: i32, depth: u8, bound: u8) {
        let entry = &self.table[(hash as usize) & self.size_mask];
        let current_age = self.age() as u8;

        // Keep deeper entries of the current generation.
        let key_xor = entry.key_xor.load(Ordering::Relaxed);
        let data = entry.data.load(Ordering::Relaxed);
        if key_xor ^ data == hash {
            let existing = TTData::unpack(data);
            if existing.age == current_age
                && existing.depth as i32 > depth as i32 + 2
                && bound != TT_BOUND_EXACT
            {
                return;
            }
        }

        let packed = TTData {
            best_move,
            score,
            static_eval,
            depth,
            bound,
            age: current_age,
        }
        .pack();

        entry.data.store(packed, Ordering::Relaxed);
        entry.key_xor.store(hash ^ packed, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        for entry in self.table.iter() {
            entry.key_xor.store(0, Ordering::Relaxed);
            entry.data.store(0, Ordering::Relaxed);
        }
    }

    pub fn new_search(&self) {
        self.age.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    fn age(&self) -> u64 {
        self.age.load(Ordering::Relaxed) & 0x3F
    }

    pub fn hashfull(&self) -> u32 {
        let sample = 1000.min(self.table.len());
        let current_age = self.age() as u8;
        let mut filled = 0;

        for entry in self.table.iter().take(sample) {
            let key_xor = entry.key_xor.load(Ordering::Relaxed);
            if key_xor != 0 {
                let data = entry.data.load(Ordering::Relaxed);
                if TTData::unpack(data).age == current_age {
                    filled += 1;
                }
            }
        }

        (filled * 1000 / sample) as u32
    }
}

// Mate scores are stored relative to the current node, not the root.
#[inline(always)]
pub fn score_to_tt(score: i32, ply: i32) -> i32 {
    if score >= MATE_VALUE - MAX_PLY {
        score + ply
    } else if score <= -MATE_VALUE + MAX_PLY {
        score - ply
    } else {
        score
    }
}

#[inline(always)]
pub fn score_from_tt(score: i32, ply: i32) -> i32 {
    if score >= MATE_VALUE - MAX_PLY {
        score - ply
    } else if score <= -MATE_VALUE + MAX_PLY {
        score + ply
    } else {
        score
    }
}

impl Move {
    #[inline(always)]
    pub fn as_u16(self) -> u16 {
        let from = self.from() as u16;
        let to = self.to() as u16;
        let move_type = self.move_type() as u16;
        let promo = match self.promotion() {
            PieceType::Knight => 1u16,
            PieceType::Bishop => 2,
            PieceType::Rook => 3,
            PieceType::Queen => 4,
            _ => 0,
        };

        from | (to << 6) | (move_type << 12) | (promo << 14)
    }

    #[inline(always)]
    pub fn from_u16(bits: u16) -> Self {
        let from = (bits & 0x3F) as u8;
        let to = ((bits >> 6) & 0x3F) as u8;
        let move_type = match (bits >> 12) & 0x3 {
            1 => MoveType::EnPassant,
            2 => MoveType::Castle,
            3 => MoveType::Promotion,
            _ => MoveType::Normal,
        };
        let promotion = match (bits >> 14) & 0x3 {
            _ if move_type != MoveType::Promotion => PieceType::None,
            1 => PieceType::Knight,
            2 => PieceType::Bishop,
            3 => PieceType::Rook,
            _ => PieceType::Queen,
        };

        Move::new(from, to, move_type, promotion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let original = TTData {
            best_move: Move::new(12, 28, MoveType::Normal, PieceType::None),
            score: 150,
            static_eval: 100,
            depth: 10,
            bound: TT_BOUND_EXACT,
            age: 5,
        };

        let unpacked = TTData::unpack(original.pack());
        assert_eq!(unpacked.best_move, original.best_move);
        assert_eq!(unpacked.score, original.score);
        assert_eq!(unpacked.static_eval, original.static_eval);
        assert_eq!(unpacked.depth, original.depth);
        assert_eq!(unpacked.bound, original.bound);
        assert_eq!(unpacked.age, original.age);

        // Negative values survive the i16 lanes unchanged.
        let losing = TTData {
            score: -(MATE_VALUE - 10),
            static_eval: -250,
            ..original
        };
        let unpacked = TTData::unpack(losing.pack());
        assert_eq!(unpacked.score, losing.score);
        assert_eq!(unpacked.static_eval, losing.static_eval);
    }

    #[test]
    fn test_move_u16_roundtrip_with_promotion() {
        let mv = Move::new(52, 60, MoveType::Promotion, PieceType::Rook);
        assert_eq!(Move::from_u16(mv.as_u16()), mv);
    }

    #[test]
    fn test_store_probe() {
        let tt = TranspositionTable::new(1);
        let hash = 0x123456789ABCDEF0;
        let mv = Move::new(12, 28, MoveType::Normal, PieceType::None);

        tt.store(hash, mv, 100, 90, 8, TT_BOUND_EXACT);
        let data = tt.probe(hash).unwrap();
        assert_eq!(data.score, 100);
        assert_eq!(data.depth, 8);
        assert_eq!(data.best_move, mv);

        assert!(tt.probe(hash ^ 1).is_none());
    }

    #[test]
    fn test_mate_score_ply_adjustment() {
        let at_ply = MATE_VALUE - 4;
        let stored = score_to_tt(at_ply, 2);
        assert_eq!(score_from_tt(stored, 2), at_ply);
    }
}
