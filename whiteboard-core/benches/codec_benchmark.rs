use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use whiteboard_core::{
    Board, BoardId, BoardState, Color, OpKind, Operation, OperationMessage, Path, PeerAddr, Point,
};

fn board_id() -> BoardId {
    BoardId::new(PeerAddr::new("192.168.1.20", 8111), "board1700000000000")
}

/// A freehand stroke of `n` points.
fn stroke(n: i32) -> Path {
    let points = (0..n).map(|i| Point::new(i * 3, (i * 7) % 480)).collect();
    Path::new(Color::RED, 2, points)
}

fn bench_path_encode(c: &mut Criterion) {
    let path = stroke(64);

    c.bench_function("path_encode_64pt", |b| {
        b.iter(|| {
            black_box(black_box(&path).encode());
        })
    });
}

fn bench_path_decode(c: &mut Criterion) {
    let encoded = stroke(64).encode();

    c.bench_function("path_decode_64pt", |b| {
        b.iter(|| {
            black_box(Path::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_add_message_roundtrip(c: &mut Criterion) {
    let id = board_id();
    let path = stroke(64);

    c.bench_function("add_message_roundtrip_64pt", |b| {
        b.iter(|| {
            let msg = OperationMessage::new(id.clone(), 42, Operation::AddPath(path.clone()));
            let encoded = msg.encode();
            black_box(OperationMessage::decode(OpKind::AddPath, &encoded).unwrap());
        })
    });
}

fn bench_board_state_encode_100_paths(c: &mut Criterion) {
    let mut board = Board::new_local(board_id());
    for v in 0..100 {
        board.add_path(stroke(32), v);
    }

    c.bench_function("board_state_encode_100x32pt", |b| {
        b.iter(|| {
            black_box(black_box(&board).serialize());
        })
    });
}

fn bench_board_state_decode_100_paths(c: &mut Criterion) {
    let mut board = Board::new_local(board_id());
    for v in 0..100 {
        board.add_path(stroke(32), v);
    }
    let encoded = board.serialize();

    c.bench_function("board_state_decode_100x32pt", |b| {
        b.iter(|| {
            black_box(BoardState::decode(black_box(&encoded)).unwrap());
        })
    });
}

fn bench_version_gate_1000_ops(c: &mut Criterion) {
    let path = stroke(8);

    c.bench_function("version_gate_1000_ops", |b| {
        b.iter(|| {
            let mut board = Board::new_local(board_id());
            for v in 0..1000u64 {
                // Half of the proposals are stale.
                let base = if v % 2 == 0 { board.version() } else { 0 };
                black_box(board.add_path(path.clone(), base));
            }
            black_box(board.version());
        })
    });
}

criterion_group!(
    benches,
    bench_path_encode,
    bench_path_decode,
    bench_add_message_roundtrip,
    bench_board_state_encode_100_paths,
    bench_board_state_decode_100_paths,
    bench_version_gate_1000_ops,
);
criterion_main!(benches);
