pub mod board {
    pub mod position;
    pub mod bitboard;
    pub mod zobrist;
}

pub mod eval {
    pub mod material;
    pub mod endgame;
    pub mod pst;
    pub mod evaluate;
}

pub mod movegen {
    pub mod magic;
    pub mod moves;
}

pub mod search {
    pub mod movepick;
    pub mod history;
    pub mod splitpoint;
    pub mod threads;
    pub mod alphabeta;
    pub mod transposition;
    pub mod time_management;
}

pub mod uci {
    pub mod protocol;
}

static INIT: std::sync::Once = std::sync::Once::new();

// One-time process initialization: zobrist keys, attack tables, endgame
// registry. Safe to call from any number of threads.
pub fn init() {
    INIT.call_once(|| {
        board::zobrist::init_zobrist();
        movegen::magic::init_magics();
        eval::endgame::init();
    });
}

#[cfg(test)]
pub(crate) fn init_for_tests() {
    init();
}
