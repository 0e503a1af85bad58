//! Checking raw preprocessing data by sacrificing part of it.
//!
//! Candidates are checked in batches of `amortize` pairs. For triples the first half
//! of a batch is kept and each kept triple `(a1, b1, c1)` is checked against one
//! sacrificed triple `(a2, b2, c2)`: with a coin-tossed `t` the parties open
//! `ρ = t * a1 - a2` and `σ = b1 - b2` and compute shares of
//!
//! `τ_j = t * c1 - c2 - σ * a2 - ρ * b1`,
//!
//! which is zero for correct triples. Instead of opening every `τ_j`, the parties
//! open a random combination `Σ r_j τ_j` and only open the individual values to
//! locate the culprit if the combination is not zero. All opened values are MAC
//! checked before a batch is accepted.
//!
//! Squares, bits and inverses follow the same template. Sacrificing is defined for
//! fields with MACs in the same field; bits additionally need square roots.
use rand_chacha::ChaCha20Rng;
use tracing::{Level, debug, error, instrument, warn};

use crate::{
    channel::Channel,
    commit::shared_rng,
    config::Config,
    error::{Cheat, Error},
    mac_check::MacCheck,
    player::Player,
    prep_files::{self, DataKind},
    ring::{Field, PrimeField},
    share::{Share, Triple},
};

/// Checks candidates in batches together with all other parties.
#[derive(Debug)]
pub struct Sacrifice<'a, C: Channel, F: Field> {
    player: &'a mut Player<C>,
    mac_check: &'a mut MacCheck<F>,
    amortize: usize,
    batch: usize,
}

impl<'a, C: Channel, F: Field> Sacrifice<'a, C, F> {
    /// Checks with `amortize` pairs per batch.
    pub fn new(
        player: &'a mut Player<C>,
        mac_check: &'a mut MacCheck<F>,
        amortize: usize,
    ) -> Result<Self, Error> {
        if amortize == 0 {
            return Err(Error::Config("amortize must be positive".into()));
        }
        Ok(Self {
            player,
            mac_check,
            amortize,
            batch: 0,
        })
    }

    /// The number of batches checked so far.
    pub fn batches(&self) -> usize {
        self.batch
    }

    fn me(&self) -> usize {
        self.player.my_num()
    }

    /// Opens `shares` at most one batch per message.
    fn open(&mut self, phase: &str, shares: &[Share<F>]) -> Result<Vec<F>, Error> {
        let mut opened = Vec::with_capacity(shares.len());
        for chunk in shares.chunks(self.amortize.saturating_mul(2)) {
            opened.extend(self.mac_check.open(self.player, phase, chunk)?);
        }
        Ok(opened)
    }

    /// Opens `Σ r_j τ_j` and, if it is zero, MAC checks everything opened so far.
    ///
    /// Returns the first `j` with `τ_j != 0` otherwise.
    fn check_zero(
        &mut self,
        taus: &[Share<F>],
        rng: &mut ChaCha20Rng,
    ) -> Result<Option<usize>, Error> {
        let combined = taus
            .iter()
            .fold(Share::default(), |acc, tau| acc + tau.mul_public(F::random(rng)));
        let opened = self.open("sacrifice check", &[combined])?;
        if opened[0].is_zero() {
            self.mac_check.check(self.player)?;
            return Ok(None);
        }
        self.diagnose(taus).map(Some)
    }

    /// Opens every `τ_j` after a nonzero combination and returns the first nonzero one.
    ///
    /// If all of them are zero, the combination itself was opened wrongly and the MAC
    /// check of the openings fails.
    fn diagnose(&mut self, taus: &[Share<F>]) -> Result<usize, Error> {
        let all = self.open("sacrifice diagnosis", taus)?;
        if let Some(j) = all.iter().position(|tau| !tau.is_zero()) {
            return Ok(j);
        }
        warn!(batch = self.batch, "nonzero combination of zero check values");
        self.mac_check.check(self.player)?;
        Err(Cheat::MacCheck.into())
    }

    /// A fresh coin-tossed RNG for the next batch.
    fn batch_rng(&mut self) -> Result<ChaCha20Rng, Error> {
        shared_rng(self.player)
    }

    fn fail(&mut self, index: usize, suspects: &[Share<F>]) -> Error {
        match self.open("sacrifice suspects", suspects) {
            Ok(values) => error!(batch = self.batch, index, ?values, "sacrifice failed"),
            Err(e) => error!(batch = self.batch, index, "sacrifice failed, suspects lost: {e}"),
        }
        Error::OfflineCheck {
            batch: self.batch,
            index,
        }
    }

    /// Splits candidates into batches of `2 * amortize` (the last one may be
    /// smaller) and drops a trailing odd candidate.
    fn batches_of<T>(&self, mut candidates: Vec<T>) -> Vec<Vec<T>> {
        if candidates.len() % 2 == 1 {
            warn!("dropping an odd candidate");
            candidates.pop();
        }
        let mut batches = vec![];
        while !candidates.is_empty() {
            let end = candidates.len().min(self.amortize.saturating_mul(2));
            let rest = candidates.split_off(end);
            batches.push(std::mem::replace(&mut candidates, rest));
        }
        batches
    }

    /// Checks triples, returning the kept half.
    #[instrument(level = Level::DEBUG, skip_all, fields(me = self.me(), n = candidates.len()), err)]
    pub fn triples(&mut self, candidates: Vec<Triple<F>>) -> Result<Vec<Triple<F>>, Error> {
        let mut checked = Vec::with_capacity(candidates.len() / 2);
        for batch in self.batches_of(candidates) {
            let mut rng = self.batch_rng()?;
            let t = F::random(&mut rng);
            let (keep, sacrificed) = batch.split_at(batch.len() / 2);
            let mut masked: Vec<Share<F>> = keep
                .iter()
                .zip(sacrificed)
                .map(|(k, s)| k.a.mul_public(t) - s.a)
                .collect();
            masked.extend(keep.iter().zip(sacrificed).map(|(k, s)| k.b - s.b));
            let opened = self.open("sacrifice rho sigma", &masked)?;
            let (rho, sigma) = opened.split_at(keep.len());
            let taus: Vec<Share<F>> = (0..keep.len())
                .map(|j| {
                    let (k, s) = (&keep[j], &sacrificed[j]);
                    k.c.mul_public(t) - s.c - s.a.mul_public(sigma[j]) - k.b.mul_public(rho[j])
                })
                .collect();
            if let Some(j) = self.check_zero(&taus, &mut rng)? {
                let (k, s) = (&keep[j], &sacrificed[j]);
                return Err(self.fail(checked.len() + j, &[k.a, k.b, k.c, s.a, s.b, s.c]));
            }
            checked.extend_from_slice(keep);
            self.batch += 1;
        }
        debug!(n = checked.len(), "triples sacrificed");
        Ok(checked)
    }

    /// Checks pairs `(a, a^2)`, returning the kept half.
    #[instrument(
        level = Level::DEBUG,
        skip_all,
        fields(me = self.me(), n = candidates.len()),
        err,
    )]
    pub fn squares(
        &mut self,
        candidates: Vec<(Share<F>, Share<F>)>,
    ) -> Result<Vec<(Share<F>, Share<F>)>, Error> {
        let mut checked = Vec::with_capacity(candidates.len() / 2);
        for batch in self.batches_of(candidates) {
            let mut rng = self.batch_rng()?;
            let t = F::random(&mut rng);
            let (keep, sacrificed) = batch.split_at(batch.len() / 2);
            let masked: Vec<Share<F>> = keep
                .iter()
                .zip(sacrificed)
                .map(|(k, s)| k.0.mul_public(t) - s.0)
                .collect();
            let rho = self.open("sacrifice rho", &masked)?;
            let taus: Vec<Share<F>> = (0..keep.len())
                .map(|j| {
                    let (k, s) = (&keep[j], &sacrificed[j]);
                    k.1.mul_public(t * t) - s.1 - (k.0.mul_public(t) + s.0).mul_public(rho[j])
                })
                .collect();
            if let Some(j) = self.check_zero(&taus, &mut rng)? {
                let (k, s) = (&keep[j], &sacrificed[j]);
                return Err(self.fail(checked.len() + j, &[k.0, k.1, s.0, s.1]));
            }
            checked.extend_from_slice(keep);
            self.batch += 1;
        }
        debug!(n = checked.len(), "squares sacrificed");
        Ok(checked)
    }

    /// Checks `x * y - target(j) = 0` for shared products using one checked triple
    /// per product.
    fn check_products(
        &mut self,
        factors: &[(Share<F>, Share<F>)],
        triples: &[Triple<F>],
        target: impl Fn(usize) -> Share<F>,
    ) -> Result<(), Error> {
        if triples.len() < factors.len() {
            return Err(Error::InvalidLength {
                expected: factors.len(),
                actual: triples.len(),
            });
        }
        let key = self.mac_check.key();
        let me = self.me();
        for start in (0..factors.len()).step_by(self.amortize) {
            let end = factors.len().min(start + self.amortize);
            let (factors, triples) = (&factors[start..end], &triples[start..end]);
            let mut rng = self.batch_rng()?;
            let mut masked: Vec<Share<F>> = factors
                .iter()
                .zip(triples)
                .map(|((x, _), t)| *x - t.a)
                .collect();
            masked.extend(factors.iter().zip(triples).map(|((_, y), t)| *y - t.b));
            let opened = self.open("product check", &masked)?;
            let (eps, delta) = opened.split_at(factors.len());
            let taus: Vec<Share<F>> = triples
                .iter()
                .enumerate()
                .map(|(j, t)| {
                    let product = t.c + t.b.mul_public(eps[j]) + t.a.mul_public(delta[j]);
                    product.add_public(eps[j] * delta[j], key, me) - target(start + j)
                })
                .collect();
            if let Some(j) = self.check_zero(&taus, &mut rng)? {
                let (x, y) = factors[j];
                return Err(self.fail(start + j, &[x, y]));
            }
            self.batch += 1;
        }
        Ok(())
    }

    /// Checks `b^2 = b` for every bit, consuming one checked triple per bit.
    #[instrument(level = Level::DEBUG, skip_all, fields(me = self.me(), n = bits.len()), err)]
    pub fn bits(
        &mut self,
        bits: Vec<Share<F>>,
        triples: &[Triple<F>],
    ) -> Result<Vec<Share<F>>, Error> {
        let factors: Vec<_> = bits.iter().map(|b| (*b, *b)).collect();
        self.check_products(&factors, triples, |j| bits[j])?;
        debug!("bits checked");
        Ok(bits)
    }

    /// Checks `a * a^-1 = 1` for every pair, consuming one checked triple per pair.
    #[instrument(level = Level::DEBUG, skip_all, fields(me = self.me(), n = pairs.len()), err)]
    pub fn inverses(
        &mut self,
        pairs: Vec<(Share<F>, Share<F>)>,
        triples: &[Triple<F>],
    ) -> Result<Vec<(Share<F>, Share<F>)>, Error> {
        let (key, me) = (self.mac_check.key(), self.me());
        let one = Share::default().add_public(F::ONE, key, me);
        self.check_products(&pairs, triples, |_| one)?;
        debug!("inverses checked");
        Ok(pairs)
    }

    /// Turns checked triples `(a, b, ab)` into pairs `(a, a^-1)` by opening `ab`.
    ///
    /// Triples with `ab = 0` are skipped.
    #[instrument(
        level = Level::DEBUG,
        skip_all,
        fields(me = self.me(), n = triples.len()),
        err,
    )]
    pub fn inverses_from_triples(
        &mut self,
        triples: &[Triple<F>],
    ) -> Result<Vec<(Share<F>, Share<F>)>, Error> {
        let products: Vec<Share<F>> = triples.iter().map(|t| t.c).collect();
        let opened = self.open("inverse products", &products)?;
        self.mac_check.check(self.player)?;
        Ok(triples
            .iter()
            .zip(opened)
            .filter_map(|(t, c)| c.inverse().map(|c_inv| (t.a, t.b.mul_public(c_inv))))
            .collect())
    }
}

impl<C: Channel, F: PrimeField> Sacrifice<'_, C, F> {
    /// Turns checked squares `(a, a^2)` into random bits by opening `a^2`:
    /// `b = (a / sqrt(a^2) + 1) / 2`.
    ///
    /// Squares of zero are skipped.
    #[instrument(
        level = Level::DEBUG,
        skip_all,
        fields(me = self.me(), n = squares.len()),
        err,
    )]
    pub fn bits_from_squares(
        &mut self,
        squares: &[(Share<F>, Share<F>)],
    ) -> Result<Vec<Share<F>>, Error> {
        let (key, me) = (self.mac_check.key(), self.me());
        let half = (F::ONE + F::ONE).inverse().ok_or(Error::Bug("2 is not invertible"))?;
        let s: Vec<Share<F>> = squares.iter().map(|(_, s)| *s).collect();
        let opened = self.open("opened squares", &s)?;
        self.mac_check.check(self.player)?;
        let mut bits = Vec::with_capacity(squares.len());
        for (j, ((a, _), s)) in squares.iter().zip(opened).enumerate() {
            if s.is_zero() {
                continue;
            }
            let root_inv = s
                .sqrt()
                .and_then(|root| root.inverse())
                .ok_or(Error::OfflineCheck {
                    batch: self.batch,
                    index: j,
                })?;
            bits.push(a.mul_public(root_inv).add_public(F::ONE, key, me).mul_public(half));
        }
        Ok(bits)
    }
}

/// Sacrifices `candidates` with the MAC key share `key` in batches of
/// [`Config::amortize`] and stores the checked triples below [`Config::prep_dir`],
/// if one is set.
pub fn sacrifice_triples<C: Channel, F: Field>(
    player: &mut Player<C>,
    key: F,
    config: &Config,
    candidates: Vec<Triple<F>>,
) -> Result<Vec<Triple<F>>, Error> {
    let mut mac_check = MacCheck::new(key);
    let checked = Sacrifice::new(player, &mut mac_check, config.amortize)?.triples(candidates)?;
    prep_files::store::<F, _>(config, DataKind::Triples, &checked)?;
    Ok(checked)
}
