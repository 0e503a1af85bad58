use std::{
    thread,
    time::{Duration, Instant},
};

use criterion::Criterion;
use polyprep::{
    channel::LocalChannel, config::Config, generator::NPartyTripleGenerator, player::Player,
    ring::Gfp127, sacrifice::sacrifice_triples,
};

pub fn triples_benchmark(c: &mut Criterion) {
    let n = 2048;
    let mut g = c.benchmark_group("triples");
    g.throughput(criterion::Throughput::Elements(n as u64 / 2));
    g.bench_function(format!("{n} MASCOT candidates, 2 parties"), |b| {
        b.iter_custom(|iters| {
            let mut elapsed = Duration::default();
            for _ in 0..iters {
                let now = Instant::now();
                let handles: Vec<_> = LocalChannel::mesh(2)
                    .into_iter()
                    .enumerate()
                    .map(|(me, links)| {
                        thread::spawn(move || {
                            let player = Player::new(me, links).expect("links");
                            let config = Config::new(2, me);
                            let mut generator =
                                NPartyTripleGenerator::<_, Gfp127>::new(player, &config)
                                    .expect("setup");
                            let candidates = generator.generate_triples(n).expect("triples");
                            let key = generator.mac_key().expect("MACs");
                            let mut player = generator.into_player().expect("links");
                            sacrifice_triples(&mut player, key, &config, candidates)
                                .expect("sacrifice")
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().expect("party panicked");
                }
                elapsed += now.elapsed();
            }
            elapsed
        })
    });
    g.finish();
}
