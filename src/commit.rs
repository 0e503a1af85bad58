//! Hash-based commitments and commit-then-open coin tossing.
use rand::{SeedableRng, random};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    channel::{self, Channel},
    error::{Cheat, Error},
    player::{Player, exchange},
};

/// A commitment to a value with high entropy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Commitment(pub(crate) [u8; 32]);

/// Commits to `value`.
///
/// This is not a general-purpose commitment scheme, the input value is assumed to
/// have high entropy.
pub(crate) fn commit(value: &[u8]) -> Commitment {
    Commitment(blake3::hash(value).into())
}

/// Verifies if a given value matches a previously generated commitment.
pub(crate) fn open_commitment(commitment: &Commitment, value: &[u8]) -> bool {
    blake3::hash(value).as_bytes() == &commitment.0
}

/// The bytes a party commits to: the value, a random salt and the party id.
fn committed_bytes(value: &[u8], salt: &[u8; 32], party: usize) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(value.len() + 34);
    bytes.extend_from_slice(value);
    bytes.extend_from_slice(salt);
    bytes.extend((party as u16).to_be_bytes());
    bytes
}

/// Every party commits to its `value`, then all values are opened.
///
/// The commitments are sent with broadcast with abort. Returns the values of all
/// parties, indexed by party.
pub(crate) fn commit_and_open<T, C>(
    player: &mut Player<C>,
    phase: &str,
    value: &T,
) -> Result<Vec<T>, Error>
where
    T: Serialize + DeserializeOwned + Clone,
    C: Channel,
{
    let me = player.my_num();
    let bytes = serialize(phase, value)?;
    let salt: [u8; 32] = random();
    let commitment = commit(&committed_bytes(&bytes, &salt, me));

    let commitments = player.broadcast(&format!("{phase} commitment"), &commitment)?;
    let openings =
        player.unverified_broadcast(&format!("{phase} opening"), &(value.clone(), salt))?;

    let mut values = Vec::with_capacity(openings.len());
    for (k, (v, salt)) in openings.into_iter().enumerate() {
        let opened = committed_bytes(&serialize(phase, &v)?, &salt, k);
        if k != me && !open_commitment(&commitments[k], &opened) {
            return Err(Cheat::Commitment.into());
        }
        values.push(v);
    }
    Ok(values)
}

/// Multi-party coin tossing.
///
/// Every party contributes a random seed through [`commit_and_open`], the XOR of all
/// seeds seeds a [`ChaCha20Rng`]. All parties end up with the same RNG and no party
/// can bias it without breaking a commitment.
pub(crate) fn shared_rng<C: Channel>(player: &mut Player<C>) -> Result<ChaCha20Rng, Error> {
    let seed: [u8; 32] = random();
    let seeds = commit_and_open(player, "coin toss", &seed)?;
    let mut joint = [0; 32];
    for s in seeds {
        joint.iter_mut().zip(s).for_each(|(j, s)| *j ^= s);
    }
    Ok(ChaCha20Rng::from_seed(joint))
}

/// Two-party coin tossing over a single link.
pub(crate) fn shared_rng_pairwise<C: Channel + ?Sized>(
    channel: &mut C,
    me: usize,
    peer: usize,
) -> Result<ChaCha20Rng, Error> {
    let seed: [u8; 32] = random();
    let salt: [u8; 32] = random();
    let commitment = commit(&committed_bytes(&seed, &salt, me));
    let theirs: Commitment =
        exchange(channel, me, peer, "pairwise coin toss commitment", &commitment)?;
    let (their_seed, their_salt): ([u8; 32], [u8; 32]) =
        exchange(channel, me, peer, "pairwise coin toss opening", &(seed, salt))?;
    if !open_commitment(&theirs, &committed_bytes(&their_seed, &their_salt, peer)) {
        return Err(Cheat::Commitment.into());
    }
    let mut joint = seed;
    joint.iter_mut().zip(their_seed).for_each(|(j, s)| *j ^= s);
    Ok(ChaCha20Rng::from_seed(joint))
}

fn serialize(phase: &str, value: &impl Serialize) -> Result<Vec<u8>, channel::Error> {
    bincode::serialize(value).map_err(|e| channel::Error {
        phase: format!("committing to {phase}"),
        reason: channel::ErrorKind::SerdeError(format!("{e:?}")),
    })
}

#[cfg(test)]
mod tests {
    use rand::RngCore;

    use super::*;
    use crate::{channel::LocalChannel, player::tests::run_parties};

    #[test]
    fn commitments_bind() {
        let c = commit(b"some value with enough entropy");
        assert!(open_commitment(&c, b"some value with enough entropy"));
        assert!(!open_commitment(&c, b"some other value"));
    }

    #[test]
    fn all_parties_get_the_same_rng() {
        let outputs = run_parties(3, |mut p| shared_rng(&mut p).map(|mut rng| rng.next_u64()));
        let first = outputs[0].as_ref().expect("coin toss succeeds");
        for out in &outputs {
            assert_eq!(first, out.as_ref().expect("coin toss succeeds"));
        }
    }

    #[test]
    fn pairwise_rng() {
        let (mut a, mut b) = LocalChannel::pair();
        let handle = std::thread::spawn(move || {
            shared_rng_pairwise(&mut b, 1, 0).map(|mut r| r.next_u64())
        });
        let mine = shared_rng_pairwise(&mut a, 0, 1).map(|mut r| r.next_u64()).unwrap();
        assert_eq!(mine, handle.join().unwrap().unwrap());
    }

    #[test]
    fn commit_and_open_returns_everyones_value() {
        let outputs = run_parties(3, |mut p| {
            let me = p.my_num() as u64;
            commit_and_open(&mut p, "values", &(me + 5))
        });
        for out in outputs {
            assert_eq!(vec![5, 6, 7], out.expect("honest parties"));
        }
    }
}
