use std::{
    path::{Path, PathBuf},
    thread,
};

use polyprep::{
    Error,
    channel::LocalChannel,
    config::Config,
    generator::NPartyTripleGenerator,
    player::Player,
    prep_files::{DataKind, PrepReader, prep_path},
    ring::{Gfp127, RingElement, Z64},
    sacrifice::sacrifice_triples,
    share::{PlainTriple, Share, Triple},
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn simulate<T, F>(n: usize, f: F) -> Vec<Result<T, Error>>
where
    T: Send + 'static,
    F: Fn(Player<LocalChannel>) -> Result<T, Error> + Send + Sync + Clone + 'static,
{
    init_tracing();
    let parties: Vec<_> = LocalChannel::mesh(n)
        .into_iter()
        .enumerate()
        .map(|(me, links)| {
            let f = f.clone();
            thread::spawn(move || f(Player::new(me, links)?))
        })
        .collect();
    parties
        .into_iter()
        .map(|p| p.join().expect("party panicked"))
        .collect()
}

fn sum<T: RingElement>(values: impl IntoIterator<Item = T>) -> T {
    values.into_iter().fold(T::ZERO, |acc, v| acc + v)
}

fn open(shares: &[Share<Gfp127>], key: Gfp127) -> Gfp127 {
    let value = sum(shares.iter().map(|s| s.value));
    let mac = sum(shares.iter().map(|s| s.mac));
    assert_eq!(key * value, mac, "MAC does not match the opened value");
    value
}

/// Generates and sacrifices MASCOT triples, returning each party's key share and
/// checked triples. `corrupt` flips the `c` share of one candidate at party 0.
fn mascot(
    n: usize,
    candidates: usize,
    amortize: usize,
    corrupt: Option<usize>,
    prep_dir: Option<PathBuf>,
) -> Vec<Result<(Gfp127, Vec<Triple<Gfp127>>), Error>> {
    simulate(n, move |player| {
        let me = player.my_num();
        let config = Config {
            batch_size: 32,
            amortize,
            prep_dir: prep_dir.clone(),
            ..Config::new(n, me)
        };
        let mut generator = NPartyTripleGenerator::<_, Gfp127>::new(player, &config)?;
        let mut triples = generator.generate_triples(candidates)?;
        let key = generator.mac_key().ok_or(Error::Config("no MAC key".to_string()))?;
        let mut player = generator.into_player()?;
        if let (Some(i), 0) = (corrupt, me) {
            triples[i].c.value += Gfp127::ONE;
        }
        let checked = sacrifice_triples(&mut player, key, &config, triples)?;
        Ok((key, checked))
    })
}

#[test]
fn checked_triples_two_parties() -> Result<(), Error> {
    let results = mascot(2, 64, 32, None, None)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    let key = sum(results.iter().map(|(k, _)| *k));
    assert_eq!(32, results[0].1.len());
    for i in 0..32 {
        let share = |pick: fn(&Triple<Gfp127>) -> Share<Gfp127>| -> Vec<_> {
            results.iter().map(|(_, t)| pick(&t[i])).collect()
        };
        let a = open(&share(|t| t.a), key);
        let b = open(&share(|t| t.b), key);
        let c = open(&share(|t| t.c), key);
        assert_eq!(a * b, c);
    }
    Ok(())
}

#[test]
fn checked_triples_three_parties() -> Result<(), Error> {
    let results = mascot(3, 32, 16, None, None)
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    let key = sum(results.iter().map(|(k, _)| *k));
    for i in 0..16 {
        let a = open(&results.iter().map(|(_, t)| t[i].a).collect::<Vec<_>>(), key);
        let b = open(&results.iter().map(|(_, t)| t[i].b).collect::<Vec<_>>(), key);
        let c = open(&results.iter().map(|(_, t)| t[i].c).collect::<Vec<_>>(), key);
        assert_eq!(a * b, c);
    }
    Ok(())
}

#[test]
fn corrupted_triple_is_caught() {
    for result in mascot(2, 64, 32, Some(40), None) {
        assert!(matches!(result, Err(Error::OfflineCheck { batch: 0, index: 8 })));
    }
}

#[test]
fn semi_honest_triples_without_threads() -> Result<(), Error> {
    let results = simulate(2, |player| {
        let config = Config {
            multi_threaded: false,
            batch_size: 16,
            ..Config::semi_honest(2, player.my_num())
        };
        let mut generator = NPartyTripleGenerator::<_, Z64>::new(player, &config)?;
        generator.generate_plain_triples(40)
    })
    .into_iter()
    .collect::<Result<Vec<Vec<PlainTriple<Z64>>>, _>>()?;
    for (t0, t1) in results[0].iter().zip(&results[1]) {
        assert_eq!((t0.a + t1.a) * (t0.b + t1.b), t0.c + t1.c);
    }
    Ok(())
}

#[test]
fn plain_triples_three_parties() -> Result<(), Error> {
    let results = simulate(3, |player| {
        let config = Config {
            batch_size: 8,
            ..Config::semi_honest(3, player.my_num())
        };
        let mut generator = NPartyTripleGenerator::<_, Gfp127>::new(player, &config)?;
        generator.generate_plain_triples(20)
    })
    .into_iter()
    .collect::<Result<Vec<Vec<PlainTriple<Gfp127>>>, _>>()?;
    assert!(results.iter().all(|t| t.len() == 20));
    for i in 0..20 {
        let a = sum(results.iter().map(|t| t[i].a));
        let b = sum(results.iter().map(|t| t[i].b));
        let c = sum(results.iter().map(|t| t[i].c));
        assert_eq!(a * b, c);
    }
    Ok(())
}

fn stored_path(dir: &Path, me: usize) -> PathBuf {
    prep_path::<Gfp127>(dir, 2, DataKind::Triples, me)
}

#[test]
fn checked_triples_survive_storage() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let results = mascot(2, 32, 16, None, Some(dir.path().to_path_buf()))
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    for (me, (_, triples)) in results.iter().enumerate() {
        let path = stored_path(dir.path(), me);
        let mut reader = PrepReader::<Triple<Gfp127>>::open(&path)?;
        assert_eq!(*triples, reader.read(triples.len())?);
        assert!(matches!(reader.read(1), Err(Error::InsufficientPreprocessing(_))));
        let wrong_ring = PrepReader::<Triple<Z64>>::open(&path);
        assert!(matches!(wrong_ring, Err(Error::SignatureMismatch { .. })));
    }
    Ok(())
}
