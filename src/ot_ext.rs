//! Implementation of the Keller-Orsini-Scholl oblivious transfer extension
//! protocol (cf. <https://eprint.iacr.org/2015/546>).
//!
//! 128 base OTs (with the roles of sender and receiver swapped) are extended to any
//! number of random OTs. Every batch runs through the phases
//!
//! `expand -> correlate -> transpose -> check -> hash`
//!
//! in this order; calling a phase out of order is an [`Error::Bug`]. The correlation
//! check is skipped for passive security. Each batch is padded to a multiple of 128
//! plus 256 extra OTs that are consumed by the check and then discarded.
use rand::{Rng, SeedableRng};
use subtle::Choice;
use tracing::{Level, debug, instrument};

use crate::{
    bit_vector::BitVector,
    block::Block,
    channel::{Channel, recv_from, send_to},
    commit::shared_rng_pairwise,
    crypto::{AesRng, FIXED_KEY_HASH},
    error::{Cheat, Error, check_len},
    matrix::BitMatrix,
};

/// The number of extra OTs per batch that pad the correlation check.
pub const CHECK_PADDING: usize = 256;

/// The number of OTs actually extended for a batch of `n` OTs.
pub fn extended_len(n: usize) -> usize {
    n.next_multiple_of(128) + CHECK_PADDING
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Expand,
    Correlate,
    Transpose,
    Check,
    Hash,
}

/// Random challenges of the correlation check, identical for both parties.
fn challenges<C: Channel + ?Sized>(
    channel: &mut C,
    me: usize,
    peer: usize,
) -> Result<AesRng, Error> {
    let mut coin = shared_rng_pairwise(channel, me, peer)?;
    Ok(AesRng::from_seed(coin.random()))
}

fn xor_wide(acc: &mut (Block, Block), x: (Block, Block)) {
    acc.0 ^= x.0;
    acc.1 ^= x.1;
}

/// The receiver of extended OTs, holding both seeds of every base OT.
#[derive(Debug)]
pub struct OtExtReceiver {
    me: usize,
    peer: usize,
    rngs0: Vec<AesRng>,
    rngs1: Vec<AesRng>,
    passive: bool,
    phase: Phase,
    counter: u128,
    n: usize,
    choices: BitVector,
    t: BitMatrix,
    t1: BitMatrix,
}

impl OtExtReceiver {
    /// Creates a receiver from the 128 PRNG pairs of the base OTs in which it was
    /// the sender.
    pub fn new(
        me: usize,
        peer: usize,
        seeds: Vec<(AesRng, AesRng)>,
        passive: bool,
    ) -> Result<Self, Error> {
        check_len(128, seeds.len())?;
        let (rngs0, rngs1) = seeds.into_iter().unzip();
        Ok(Self {
            me,
            peer,
            rngs0,
            rngs1,
            passive,
            phase: Phase::Expand,
            counter: 0,
            n: 0,
            choices: BitVector::default(),
            t: BitMatrix::default(),
            t1: BitMatrix::default(),
        })
    }

    fn advance(&mut self, from: Phase, to: Phase) -> Result<(), Error> {
        if self.phase != from {
            return Err(Error::Bug("OT extension receiver called out of order"));
        }
        self.phase = to;
        Ok(())
    }

    /// Expands the base OT seeds to a batch of `n` OTs.
    pub fn expand(&mut self, n: usize) -> Result<(), Error> {
        self.advance(Phase::Expand, Phase::Correlate)?;
        let n_ext = extended_len(n);
        self.n = n;
        self.t = BitMatrix::new(n_ext);
        self.t.expand(&mut self.rngs0)?;
        self.t1 = BitMatrix::new(n_ext);
        self.t1.expand(&mut self.rngs1)?;
        Ok(())
    }

    /// Computes the correction `u_j = t0_j ^ t1_j ^ r` for the (padded) choice bits.
    pub(crate) fn correlation_message(&mut self, choices: &BitVector) -> Result<BitMatrix, Error> {
        check_len(self.n, choices.len())?;
        self.advance(Phase::Correlate, Phase::Transpose)?;
        let mut r = choices.clone();
        r.extend(&BitVector::random(self.t.n_rows() - self.n, &mut rand::rng()));
        let mut u = std::mem::take(&mut self.t1);
        u.xor_assign(&self.t)?;
        u.xor_choice_bits(&r)?;
        self.choices = r;
        Ok(u)
    }

    /// Sends the correction for the choice bits to the sender.
    pub fn correlate<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        choices: &BitVector,
    ) -> Result<(), Error> {
        let u = self.correlation_message(choices)?;
        send_to(channel, "KOS_u", &u)?;
        Ok(())
    }

    /// Like [`OtExtReceiver::correlate`], but lets `tamper` modify the correction
    /// before it is sent.
    #[cfg(test)]
    pub(crate) fn correlate_tampered<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        choices: &BitVector,
        tamper: impl FnOnce(&mut BitMatrix),
    ) -> Result<(), Error> {
        let mut u = self.correlation_message(choices)?;
        tamper(&mut u);
        send_to(channel, "KOS_u", &u)?;
        Ok(())
    }

    /// Transposes `t` so that row `l` belongs to OT `l`.
    pub fn transpose(&mut self) -> Result<(), Error> {
        self.advance(Phase::Transpose, Phase::Check)?;
        self.t.transpose();
        Ok(())
    }

    /// Proves that the same choice bits were used for all 128 columns.
    pub fn check<C: Channel + ?Sized>(&mut self, channel: &mut C) -> Result<(), Error> {
        self.advance(Phase::Check, Phase::Hash)?;
        if self.passive {
            return Ok(());
        }
        let mut chi = challenges(channel, self.me, self.peer)?;
        let mut x = Block::ZERO;
        let mut t = (Block::ZERO, Block::ZERO);
        for (l, t_l) in self.t.rows().iter().enumerate() {
            let chi_l: Block = chi.random();
            x ^= chi_l.const_mul(Choice::from(u8::from(self.choices.get(l))));
            xor_wide(&mut t, t_l.clmul(&chi_l));
        }
        send_to(channel, "KOS_check", &(x, t.0, t.1))?;
        Ok(())
    }

    /// Hashes the rows into the random OT outputs `k_{r_l}`.
    pub fn hash(&mut self) -> Result<Vec<Block>, Error> {
        self.advance(Phase::Hash, Phase::Expand)?;
        let mut out = self.t.rows()[..self.n].to_vec();
        let counter = self.counter;
        FIXED_KEY_HASH.tccr_hash_slice_mut(&mut out, |l| Block::from(counter + l as u128));
        self.counter += self.t.n_rows() as u128;
        self.t = BitMatrix::default();
        Ok(out)
    }

    /// Runs all phases for one batch, returning one output per choice bit.
    #[instrument(
        level = Level::DEBUG,
        skip_all,
        fields(me = self.me, peer = self.peer, n = choices.len()),
        err,
    )]
    pub fn receive<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        choices: &BitVector,
    ) -> Result<Vec<Block>, Error> {
        self.expand(choices.len())?;
        self.correlate(channel, choices)?;
        self.transpose()?;
        self.check(channel)?;
        let out = self.hash()?;
        debug!("received extended OTs");
        Ok(out)
    }
}

/// The sender of extended OTs, holding one seed per base OT and the correlation Δ.
#[derive(Debug)]
pub struct OtExtSender {
    me: usize,
    peer: usize,
    delta: Block,
    rngs: Vec<AesRng>,
    passive: bool,
    phase: Phase,
    counter: u128,
    n: usize,
    q: BitMatrix,
}

impl OtExtSender {
    /// Creates a sender from the base OTs in which it was the receiver: the choice
    /// bits become Δ, the chosen seeds the PRNGs.
    pub fn new(
        me: usize,
        peer: usize,
        delta: &BitVector,
        seeds: Vec<AesRng>,
        passive: bool,
    ) -> Result<Self, Error> {
        check_len(128, delta.len())?;
        check_len(128, seeds.len())?;
        Ok(Self {
            me,
            peer,
            delta: delta.get_block(0),
            rngs: seeds,
            passive,
            phase: Phase::Expand,
            counter: 0,
            n: 0,
            q: BitMatrix::default(),
        })
    }

    /// The correlation `Δ`, `k1_l = k0_l ^ Δ` before hashing.
    pub fn delta(&self) -> Block {
        self.delta
    }

    fn advance(&mut self, from: Phase, to: Phase) -> Result<(), Error> {
        if self.phase != from {
            return Err(Error::Bug("OT extension sender called out of order"));
        }
        self.phase = to;
        Ok(())
    }

    /// Expands the base OT seeds to a batch of `n` OTs.
    pub fn expand(&mut self, n: usize) -> Result<(), Error> {
        self.advance(Phase::Expand, Phase::Correlate)?;
        self.n = n;
        self.q = BitMatrix::new(extended_len(n));
        self.q.expand(&mut self.rngs)?;
        Ok(())
    }

    /// Receives the correction and computes `q_j = t_{Δ_j, j} ^ Δ_j * u_j`.
    pub fn correlate<C: Channel + ?Sized>(&mut self, channel: &mut C) -> Result<(), Error> {
        self.advance(Phase::Correlate, Phase::Transpose)?;
        let u: BitMatrix = recv_from(channel, "KOS_u")?;
        check_len(self.q.n_rows(), u.n_rows())?;
        self.q.conditional_add(self.delta, &u)
    }

    /// Transposes `q` so that row `l` belongs to OT `l`: `q_l = t_l ^ r_l * Δ`.
    pub fn transpose(&mut self) -> Result<(), Error> {
        self.advance(Phase::Transpose, Phase::Check)?;
        self.q.transpose();
        Ok(())
    }

    /// Verifies `⊕ q_l χ_l = t ^ x Δ` for the receiver's `(x, t)`.
    pub fn check<C: Channel + ?Sized>(&mut self, channel: &mut C) -> Result<(), Error> {
        self.advance(Phase::Check, Phase::Hash)?;
        if self.passive {
            return Ok(());
        }
        let mut chi = challenges(channel, self.me, self.peer)?;
        let mut q = (Block::ZERO, Block::ZERO);
        for q_l in self.q.rows() {
            let chi_l: Block = chi.random();
            xor_wide(&mut q, q_l.clmul(&chi_l));
        }
        let (x, t0, t1): (Block, Block, Block) = recv_from(channel, "KOS_check")?;
        xor_wide(&mut q, x.clmul(&self.delta));
        if q != (t0, t1) {
            return Err(Cheat::OtCorrelationCheck.into());
        }
        Ok(())
    }

    /// Hashes the rows into the random OT outputs `(k0_l, k1_l)`.
    pub fn hash(&mut self) -> Result<Vec<(Block, Block)>, Error> {
        self.advance(Phase::Hash, Phase::Expand)?;
        let mut k0 = self.q.rows()[..self.n].to_vec();
        let mut k1: Vec<Block> = k0.iter().map(|q| *q ^ self.delta).collect();
        let counter = self.counter;
        FIXED_KEY_HASH.tccr_hash_slice_mut(&mut k0, |l| Block::from(counter + l as u128));
        FIXED_KEY_HASH.tccr_hash_slice_mut(&mut k1, |l| Block::from(counter + l as u128));
        self.counter += self.q.n_rows() as u128;
        self.q = BitMatrix::default();
        Ok(k0.into_iter().zip(k1).collect())
    }

    /// Runs all phases for one batch of `n` OTs.
    #[instrument(
        level = Level::DEBUG,
        skip_all,
        fields(me = self.me, peer = self.peer, n = n),
        err,
    )]
    pub fn send<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        n: usize,
    ) -> Result<Vec<(Block, Block)>, Error> {
        self.expand(n)?;
        self.correlate(channel)?;
        self.transpose()?;
        self.check(channel)?;
        let out = self.hash()?;
        debug!("sent extended OTs");
        Ok(out)
    }
}
