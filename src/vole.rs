//! Vector oblivious linear evaluation from OTs, used to generate MACs.
//!
//! The key holder has a MAC key share `α` and took part in `M::BITS` random OTs
//! with the bits of `α` as choice bits; the input holder knows both outputs of each
//! OT. Every OT output seeds a PRNG that is expanded into one [`Row`] per call of
//! `evaluate`. For inputs `x` the input holder sends `u_j = t0_j - t1_j + x`,
//! after which
//!
//! * the key holder computes `w_j = t^{α_j}_j + α_j * u_j = t0_j + α_j * x` and
//!   outputs `Σ_j basis(j) * w_j`,
//! * the input holder outputs `-Σ_j basis(j) * t0_j`,
//!
//! which sum to `α * x`. A malicious input holder could use a different `x` for
//! different `j`; the consistency check catches this by comparing hashes of pairs
//! of columns.
use rand::{Rng, SeedableRng};
use subtle::Choice;
use tracing::{Level, debug, instrument};

use crate::{
    block::Block,
    channel::{Channel, recv_vec_from, send_to},
    commit::shared_rng_pairwise,
    crypto::AesRng,
    error::{Cheat, Error, check_len},
    matrix::Row,
    ring::RingElement,
};

type Hash = [u8; 32];

/// The hash of one combination of two columns.
fn column_hash(pair: usize, a: bool, b: bool, fill: impl FnOnce(&mut blake3::Hasher)) -> Hash {
    let mut hasher = blake3::Hasher::new_derive_key("polyprep 2025-06 VOLE consistency check");
    hasher.update(&(pair as u64).to_le_bytes());
    hasher.update(&[u8::from(a), u8::from(b)]);
    fill(&mut hasher);
    hasher.finalize().into()
}

/// The hashes of all four combinations of OT outputs for the columns `alpha` and
/// `beta`, indexed by the two choice bits.
fn pair_hashes<M: RingElement>(
    i: usize,
    alpha: usize,
    beta: usize,
    t: [&[Row<M>]; 2],
) -> [[Hash; 2]; 2] {
    let h = |a: usize, b: usize| {
        let (ta, tb) = (&t[a][alpha], &t[b][beta]);
        column_hash(i, a == 1, b == 1, |hasher| {
            if a == b {
                (ta - tb).hash_into(hasher)
            } else {
                (ta + tb).hash_into(hasher)
            }
        })
    };
    [[h(0, 0), h(0, 1)], [h(1, 0), h(1, 1)]]
}

/// Coin-tossed pairs of distinct columns.
fn challenge_pairs<C: Channel + ?Sized>(
    channel: &mut C,
    me: usize,
    peer: usize,
    columns: usize,
) -> Result<Vec<(usize, usize)>, Error> {
    if columns < 2 {
        return Err(Error::Config(format!(
            "the VOLE check needs at least 2 columns, got {columns}"
        )));
    }
    let mut rng = shared_rng_pairwise(channel, me, peer)?;
    Ok((0..columns)
        .map(|_| {
            let alpha = rng.random_range(0..columns);
            let beta = (alpha + rng.random_range(1..columns)) % columns;
            (alpha, beta)
        })
        .collect())
}

/// The number of column pairs compared by the consistency check.
pub fn n_challenges<M: RingElement>() -> usize {
    M::BITS
}

/// The party that holds the inputs of the VOLE.
#[derive(Debug)]
pub struct VoleInputHolder<M: RingElement> {
    me: usize,
    peer: usize,
    rngs: Vec<(AesRng, AesRng)>,
    passive: bool,
    _ring: std::marker::PhantomData<M>,
}

impl<M: RingElement> VoleInputHolder<M> {
    /// Creates the input side from both outputs of `M::BITS` random OTs.
    pub fn new(
        me: usize,
        peer: usize,
        seeds: &[(Block, Block)],
        passive: bool,
    ) -> Result<Self, Error> {
        check_len(M::BITS, seeds.len())?;
        Ok(Self {
            me,
            peer,
            rngs: seeds
                .iter()
                .map(|(k0, k1)| (AesRng::from_seed(*k0), AesRng::from_seed(*k1)))
                .collect(),
            passive,
            _ring: std::marker::PhantomData,
        })
    }

    /// Returns this party's additive share of `α * x_i` for every input.
    #[instrument(
        level = Level::DEBUG,
        skip_all,
        fields(me = self.me, peer = self.peer, n = inputs.len()),
        err,
    )]
    pub fn evaluate<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        inputs: &[M],
    ) -> Result<Vec<M>, Error> {
        let n = inputs.len();
        let x = Row::from(inputs.to_vec());
        let mut t0 = Vec::with_capacity(M::BITS);
        let mut t1 = Vec::with_capacity(M::BITS);
        for (rng0, rng1) in &mut self.rngs {
            t0.push(Row::<M>::random(n, rng0));
            t1.push(Row::<M>::random(n, rng1));
        }
        let u: Vec<Row<M>> = t0
            .iter()
            .zip(&t1)
            .map(|(t0, t1)| {
                let mut u = (t0 - t1).eval();
                u += &x;
                u
            })
            .collect();
        send_to(channel, "VOLE_u", &u)?;

        let mut share = Row::new(n);
        for (j, t0) in t0.iter().enumerate() {
            share.add_multiple(-M::basis(j), t0);
        }

        if !self.passive {
            let pairs = challenge_pairs(channel, self.me, self.peer, M::BITS)?;
            let t = [t0.as_slice(), t1.as_slice()];
            let hashes: Vec<[[Hash; 2]; 2]> = pairs
                .iter()
                .enumerate()
                .map(|(i, (alpha, beta))| pair_hashes(i, *alpha, *beta, t))
                .collect();
            send_to(channel, "VOLE_check", &hashes)?;
        }
        debug!("VOLE inputs authenticated");
        Ok(share.into_vec())
    }
}

/// The party that holds the MAC key share of the VOLE.
#[derive(Debug)]
pub struct VoleKeyHolder<M: RingElement> {
    me: usize,
    peer: usize,
    key: M,
    rngs: Vec<AesRng>,
    passive: bool,
}

impl<M: RingElement> VoleKeyHolder<M> {
    /// Creates the key side from the chosen outputs of `M::BITS` random OTs whose
    /// choice bits were the bits of `key`.
    pub fn new(
        me: usize,
        peer: usize,
        key: M,
        seeds: &[Block],
        passive: bool,
    ) -> Result<Self, Error> {
        check_len(M::BITS, seeds.len())?;
        Ok(Self {
            me,
            peer,
            key,
            rngs: seeds.iter().map(|k| AesRng::from_seed(*k)).collect(),
            passive,
        })
    }

    /// The MAC key share.
    pub fn key(&self) -> M {
        self.key
    }

    /// Returns this party's additive share of `α * x_i` for the peer's `n` inputs.
    #[instrument(
        level = Level::DEBUG,
        skip_all,
        fields(me = self.me, peer = self.peer, n = n),
        err,
    )]
    pub fn evaluate<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        n: usize,
    ) -> Result<Vec<M>, Error> {
        let t: Vec<Row<M>> = self.rngs.iter_mut().map(|rng| Row::random(n, rng)).collect();
        let u: Vec<Row<M>> = recv_vec_from(channel, "VOLE_u", M::BITS)?;
        for row in &u {
            check_len(n, row.len())?;
        }

        let mut share = Row::new(n);
        for (j, (t_j, u_j)) in t.iter().zip(&u).enumerate() {
            let mut w = t_j.clone();
            w.conditional_add(Choice::from(u8::from(self.key.bit(j))), u_j);
            share.add_multiple(M::basis(j), &w);
        }

        if !self.passive {
            let pairs = challenge_pairs(channel, self.me, self.peer, M::BITS)?;
            let hashes: Vec<[[Hash; 2]; 2]> = recv_vec_from(channel, "VOLE_check", pairs.len())?;
            for (i, ((alpha, beta), h)) in pairs.into_iter().zip(hashes).enumerate() {
                self.verify_pair(i, alpha, beta, &t, &u, &h)?;
            }
        }
        debug!("VOLE MACs computed");
        Ok(share.into_vec())
    }

    /// Checks the two hashes of pair `i` that this party can recompute.
    fn verify_pair(
        &self,
        i: usize,
        alpha: usize,
        beta: usize,
        t: &[Row<M>],
        u: &[Row<M>],
        h: &[[Hash; 2]; 2],
    ) -> Result<(), Error> {
        let all = [h[0][0], h[0][1], h[1][0], h[1][1]];
        for (k, a) in all.iter().enumerate() {
            if all[k + 1..].contains(a) {
                return Err(Cheat::VoleConsistency.into());
            }
        }
        let (c, d) = (self.key.bit(alpha), self.key.bit(beta));
        let (ta, tb) = (&t[alpha], &t[beta]);
        let known = if c == d { (ta - tb).eval() } else { (ta + tb).eval() };
        // the combination for the other two OT outputs differs by ±(u_β - u_α)
        let mut other = known.clone();
        if c {
            other -= &u[beta];
            other += &u[alpha];
        } else {
            other += &u[beta];
            other -= &u[alpha];
        }
        let known_hash = column_hash(i, c, d, |hasher| known.hash_into(hasher));
        let other_hash = column_hash(i, !c, !d, |hasher| other.hash_into(hasher));
        if known_hash != h[usize::from(c)][usize::from(d)]
            || other_hash != h[usize::from(!c)][usize::from(!d)]
        {
            return Err(Cheat::VoleConsistency.into());
        }
        Ok(())
    }
}
