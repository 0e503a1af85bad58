//! Random 1-out-of-2 OT following Chou-Orlandi (cf.
//! <https://eprint.iacr.org/2015/267>) over the Ristretto group.
//!
//! Both outputs of the sender are hashes of group elements, so no ciphertexts are
//! sent: the sender publishes `S = yG`, the receiver answers with
//! `R_i = c_i S + x_i G` and gets `H(i, x_i S)`, the sender derives
//! `H(i, y R_i)` and `H(i, y (R_i - S))`. Every hash also binds the two party
//! indices, so outputs of different pairs are independent even if a party reuses
//! its scalars.
use curve25519_dalek::{
    constants::RISTRETTO_BASEPOINT_TABLE,
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
};
use rand::CryptoRng;
use subtle::{Choice, ConditionallySelectable};

use crate::{
    bit_vector::BitVector,
    block::Block,
    channel::{Channel, recv_from, recv_vec_from, send_to},
    error::Error,
    utils::DalekRng,
};

/// Hashes a group element into a block, keyed by the session (sender and receiver
/// index) and the OT index.
fn hash_pt(sender: usize, receiver: usize, index: usize, pt: &RistrettoPoint) -> Block {
    let mut hasher = blake3::Hasher::new_derive_key("polyprep 2025-06 Chou-Orlandi base OT");
    hasher.update(&(sender as u64).to_le_bytes());
    hasher.update(&(receiver as u64).to_le_bytes());
    hasher.update(&(index as u64).to_le_bytes());
    hasher.update(pt.compress().as_bytes());
    let mut out = [0; 16];
    out.copy_from_slice(&hasher.finalize().as_bytes()[..16]);
    Block::new(out)
}

fn decompress(bytes: [u8; 32]) -> Result<RistrettoPoint, Error> {
    CompressedRistretto(bytes)
        .decompress()
        .ok_or(Error::InvalidOtData)
}

/// Runs `n` random OTs as the sender, returns the pairs `(k0, k1)`.
pub(super) fn send<C, R>(
    channel: &mut C,
    rng: &mut R,
    me: usize,
    peer: usize,
    n: usize,
) -> Result<Vec<(Block, Block)>, Error>
where
    C: Channel + ?Sized,
    R: CryptoRng,
{
    let y = Scalar::random(&mut DalekRng(rng));
    let s = &y * RISTRETTO_BASEPOINT_TABLE;
    send_to(channel, "CO_OT_s", s.compress().as_bytes())?;
    let ys = y * s;

    let rs: Vec<[u8; 32]> = recv_vec_from(channel, "CO_OT_r", n)?;
    let mut keys = Vec::with_capacity(n);
    for (i, r) in rs.into_iter().enumerate() {
        let yr = y * decompress(r)?;
        keys.push((
            hash_pt(me, peer, i, &yr),
            hash_pt(me, peer, i, &(yr - ys)),
        ));
    }
    Ok(keys)
}

/// Runs random OTs as the receiver with the given choice bits.
pub(super) fn receive<C, R>(
    channel: &mut C,
    rng: &mut R,
    me: usize,
    peer: usize,
    choices: &BitVector,
) -> Result<Vec<Block>, Error>
where
    C: Channel + ?Sized,
    R: CryptoRng,
{
    let s_bytes: [u8; 32] = recv_from(channel, "CO_OT_s")?;
    let s = decompress(s_bytes)?;

    let mut rng = DalekRng(rng);
    let mut rs = Vec::with_capacity(choices.len());
    let mut keys = Vec::with_capacity(choices.len());
    for (i, c) in choices.iter().enumerate() {
        let x = Scalar::random(&mut rng);
        let r = &x * RISTRETTO_BASEPOINT_TABLE;
        // R = c S + x G, selected without branching on c
        let r = RistrettoPoint::conditional_select(&r, &(r + s), Choice::from(u8::from(c)));
        rs.push(r.compress().to_bytes());
        keys.push(hash_pt(peer, me, i, &(x * s)));
    }
    send_to(channel, "CO_OT_r", &rs)?;
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::channel::LocalChannel;

    #[test]
    fn receiver_gets_chosen_key() -> Result<(), Error> {
        let (mut a, mut b) = LocalChannel::pair();
        let choices = BitVector::random(64, &mut rand::rng());
        let expected = choices.clone();
        let receiver = thread::spawn(move || receive(&mut b, &mut rand::rng(), 1, 0, &choices));
        let keys = send(&mut a, &mut rand::rng(), 0, 1, 64)?;
        let received = receiver.join().expect("receiver panicked")?;
        for (i, ((k0, k1), k)) in keys.iter().zip(&received).enumerate() {
            assert_ne!(k0, k1);
            assert_eq!(if expected.get(i) { k1 } else { k0 }, k);
        }
        Ok(())
    }

    #[test]
    fn invalid_points_are_rejected() {
        let (mut a, mut b) = LocalChannel::pair();
        // not the encoding of a Ristretto point
        send_to(&mut a, "CO_OT_s", &[0xff_u8; 32]).unwrap();
        let res = receive(&mut b, &mut rand::rng(), 1, 0, &BitVector::new(8));
        assert!(matches!(res, Err(Error::InvalidOtData)));
    }
}
