use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ferrum::board::position::{Move, Position};
use ferrum::eval::material;
use ferrum::search::alphabeta::Stack;
use ferrum::search::movepick::MovePicker;

fn picker_drain_benchmark(c: &mut Criterion) {
    ferrum::init();

    let midgame = Position::from_fen(
        "r1bq1rk1/pp2bppp/2n1pn2/2pp4/3P1B2/2NBPN2/PPP2PPP/R2Q1RK1 w - - 0 8",
    )
    .unwrap();
    let ss = Stack::new();

    c.bench_function("movepick_drain_midgame", |b| {
        b.iter(|| {
            let mut picker = MovePicker::new(black_box(&midgame), true, Move::NULL, &ss, 6, None);
            let mut count = 0;
            while picker.get_next_move() != Move::NULL {
                count += 1;
            }
            black_box(count)
        })
    });
}

fn material_probe_benchmark(c: &mut Criterion) {
    ferrum::init();

    let positions: Vec<Position> = [
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1",
        "3rk3/8/8/8/8/8/8/3QK3 w - - 0 1",
        "r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1",
    ]
    .iter()
    .map(|fen| Position::from_fen(fen).unwrap())
    .collect();

    c.bench_function("material_probe_mixed", |b| {
        let mut table = material::Table::new();
        b.iter(|| {
            let mut phase_sum = 0u32;
            for pos in &positions {
                phase_sum += table.probe(black_box(pos)).game_phase as u32;
            }
            black_box(phase_sum)
        })
    });
}

criterion_group!(benches, picker_drain_benchmark, material_probe_benchmark);
criterion_main!(benches);
