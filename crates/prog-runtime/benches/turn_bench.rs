use criterion::{criterion_group, criterion_main, Criterion};
use prog_core::SessionConfig;
use prog_runtime::{Session, TurnYields};

fn bench_turns(c: &mut Criterion) {
    let pack = content::builtin().expect("builtin pack");
    let yields = TurnYields {
        science: 25,
        culture: 15,
    };
    c.bench_function("autopilot_40_turns", |b| {
        b.iter(|| {
            let mut session = Session::new(
                &pack,
                SessionConfig {
                    boost_chance_per_turn: 0.25,
                    ..SessionConfig::default()
                },
            )
            .expect("session");
            for _ in 0..40 {
                let _ = session.autopilot_turn(yields);
            }
        })
    });
}

criterion_group!(benches, bench_turns);
criterion_main!(benches);
