//! Opening authenticated shares with a deferred, batched MAC check.
//!
//! Values are opened by broadcasting value shares; their MAC shares are kept until
//! [`MacCheck::check`], which verifies a random linear combination of everything
//! opened since the last check: every party commits to
//! `σ_i = Σ_j χ_j m_ij - α_i * Σ_j χ_j v_j` and the `σ_i` must sum to zero.
use tracing::{Level, debug, instrument, warn};

use crate::{
    channel::Channel,
    commit::{commit_and_open, shared_rng},
    error::{Cheat, Error},
    player::Player,
    ring::RingElement,
    share::Share,
};

/// Opened values that have not been checked yet.
#[derive(Debug)]
pub struct MacCheck<M: RingElement> {
    key: M,
    pending: Vec<(M, M)>,
}

impl<M: RingElement> MacCheck<M> {
    /// Creates a checker for the MAC key share `key`.
    pub fn new(key: M) -> Self {
        Self { key, pending: vec![] }
    }

    /// The MAC key share.
    pub fn key(&self) -> M {
        self.key
    }

    /// The number of opened values waiting for [`MacCheck::check`].
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Opens `shares` to all parties, deferring the MAC check.
    ///
    /// Values are returned in `T`; the MAC check uses the sum of the value shares
    /// lifted to `M`, which for `Z_2^k` values is the lift the MACs were made for.
    pub fn open<T, C>(
        &mut self,
        player: &mut Player<C>,
        phase: &str,
        shares: &[Share<T, M>],
    ) -> Result<Vec<T>, Error>
    where
        T: RingElement,
        M: From<T>,
        C: Channel,
    {
        let mine: Vec<T> = shares.iter().map(|s| s.value).collect();
        let all = player.unverified_broadcast(phase, &mine)?;
        for theirs in &all {
            crate::error::check_len(shares.len(), theirs.len())?;
        }
        let mut opened = Vec::with_capacity(shares.len());
        for (j, share) in shares.iter().enumerate() {
            let value: T = all.iter().map(|v| v[j]).fold(T::ZERO, |acc, x| acc + x);
            let lifted: M = all.iter().map(|v| M::from(v[j])).fold(M::ZERO, |acc, x| acc + x);
            self.pending.push((lifted, share.mac));
            opened.push(value);
        }
        Ok(opened)
    }

    /// Verifies the MACs of all values opened since the last check.
    #[instrument(
        level = Level::DEBUG,
        skip_all,
        fields(me = player.my_num(), n = self.pending.len()),
        err,
    )]
    pub fn check<C: Channel>(&mut self, player: &mut Player<C>) -> Result<(), Error> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }
        let mut rng = shared_rng(player)?;
        let (mut value, mut mac) = (M::ZERO, M::ZERO);
        for (v, m) in pending {
            let chi = M::random(&mut rng);
            value += chi * v;
            mac += chi * m;
        }
        let sigma = mac - self.key * value;
        let sigmas = commit_and_open(player, "MAC check", &sigma)?;
        let sum = sigmas.into_iter().fold(M::ZERO, |acc, s| acc + s);
        if !sum.is_zero() {
            warn!("MAC check failed");
            return Err(Cheat::MacCheck.into());
        }
        debug!("MAC check passed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{player::tests::run_parties, ring::Gfp61};

    /// Shares of `values` under the key `Σ keys` for three parties, with party 0
    /// adding `offset` to its MAC shares.
    fn shares(values: &[u64], keys: [u64; 3], offset: u64) -> Vec<Vec<Share<Gfp61>>> {
        let key = Gfp61::new(keys.iter().sum());
        let mut out = vec![vec![]; 3];
        for (j, v) in values.iter().enumerate() {
            let v = Gfp61::new(*v);
            let parts = [Gfp61::new(j as u64 + 1), Gfp61::new(7)];
            let macs = [Gfp61::new(11 * j as u64), Gfp61::new(5)];
            out[0].push(Share::new(parts[0], macs[0] + Gfp61::new(offset)));
            out[1].push(Share::new(parts[1], macs[1]));
            out[2].push(Share::new(v - parts[0] - parts[1], key * v - macs[0] - macs[1]));
        }
        out
    }

    fn open_and_check(offset: u64) -> Vec<Result<Vec<Gfp61>, Error>> {
        let keys = [3, 5, 9];
        let all = shares(&[4, 40, 400], keys, offset);
        run_parties(3, move |mut p| {
            let me = p.my_num();
            let mut check = MacCheck::new(Gfp61::new(keys[me]));
            let opened = check.open(&mut p, "values", &all[me])?;
            assert_eq!(3, check.pending());
            check.check(&mut p)?;
            Ok(opened)
        })
    }

    #[test]
    fn honest_openings_pass() {
        for res in open_and_check(0) {
            assert_eq!(
                vec![Gfp61::new(4), Gfp61::new(40), Gfp61::new(400)],
                res.expect("MACs are valid")
            );
        }
    }

    #[test]
    fn wrong_mac_is_detected() {
        for res in open_and_check(1) {
            assert!(matches!(res, Err(Error::MaliciousBehavior(Cheat::MacCheck))));
        }
    }
}
