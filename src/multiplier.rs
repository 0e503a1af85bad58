//! Pairwise multiplication and authentication over OT extension.
//!
//! An [`OtMultiplier`] owns the link to one peer together with the OT extension
//! instances in both directions and, if MACs are generated, the VOLE instances in
//! both directions. The [`crate::generator::NPartyTripleGenerator`] either calls
//! [`OtMultiplier::process`] directly or runs [`OtMultiplier::run`] on a worker
//! thread that is fed over bounded channels.
//!
//! Whenever both parties of a pair have to act in both directions, the party with
//! the lower index is the OT receiver (or the VOLE input holder) first.
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{Level, debug, instrument, warn};

use crate::{
    base_ot::BaseOtSeeds,
    bit_vector::BitVector,
    channel::{Channel, recv_vec_from, send_to},
    error::{Error, check_len},
    matrix::Rectangle,
    ot_ext::{OtExtReceiver, OtExtSender},
    ring::{Gf2, Gf2n128, RingElement, Z64, Z128},
    vole::{VoleInputHolder, VoleKeyHolder},
};

/// A unit of work for the multiplier of one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultJob<T: RingElement> {
    /// Shares of the cross terms `a_i * b_k + a_k * b_i` for local shares `a`, `b`.
    Triple {
        /// Local shares of the first factors.
        a: Vec<T>,
        /// Local shares of the second factors.
        b: Vec<T>,
    },
    /// Shares of the cross terms of `a * a`, the candidates for bits and squares.
    Bit {
        /// Local shares of the values to square.
        a: Vec<T>,
    },
    /// MACs on the private inputs of `player`. Only the owner knows `values`, all
    /// other parties pass `n` zeros.
    Input {
        /// The owner of the inputs.
        player: usize,
        /// The inputs of the owner, zeros elsewhere.
        values: Vec<T>,
    },
    /// Shares of the cross terms `α_i * x_k + α_k * x_i` of the MACs of shared values.
    Authenticate {
        /// Local shares of the values.
        values: Vec<T>,
    },
}

impl<T: RingElement> MultJob<T> {
    /// The number of values the job produces.
    pub fn len(&self) -> usize {
        match self {
            MultJob::Triple { a, .. } | MultJob::Bit { a } => a.len(),
            MultJob::Input { values, .. } | MultJob::Authenticate { values } => values.len(),
        }
    }

    /// `true` if the job does not contain any values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The pairwise share computed for a [`MultJob`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultOutput<T: RingElement, M: RingElement> {
    /// Shares of products, for [`MultJob::Triple`] and [`MultJob::Bit`].
    Products(Vec<T>),
    /// Shares of MACs, for [`MultJob::Input`] and [`MultJob::Authenticate`].
    Macs(Vec<M>),
}

fn macs_disabled() -> Error {
    Error::Config("MACs are disabled for this multiplier".into())
}

/// The VOLE instances with one peer.
#[derive(Debug)]
struct Authenticator<M: RingElement> {
    input: VoleInputHolder<M>,
    key: VoleKeyHolder<M>,
}

/// Multiplies and authenticates shares together with a single peer.
///
/// Values live in `T`, MACs in `M`. Use the aliases [`MascotMultiplier`],
/// [`TinierMultiplier`], [`Spdz2kMultiplier`] and [`SemiMultiplier`] for the
/// supported combinations.
#[derive(Debug)]
pub struct OtMultiplier<C: Channel, T: RingElement, M: RingElement = T> {
    channel: C,
    me: usize,
    peer: usize,
    receiver: OtExtReceiver,
    sender: OtExtSender,
    auth: Option<Authenticator<M>>,
    _values: std::marker::PhantomData<T>,
}

/// Field triples with MACs in the same field.
pub type MascotMultiplier<C, F> = OtMultiplier<C, F, F>;

/// Bit triples with MACs in GF(2^128).
pub type TinierMultiplier<C> = OtMultiplier<C, Gf2, Gf2n128>;

/// Triples over `Z_2^64` with MACs over `Z_2^128`.
pub type Spdz2kMultiplier<C> = OtMultiplier<C, Z64, Z128>;

/// Passively secure triples without MACs, used with [`crate::config::Config::semi_honest`].
pub type SemiMultiplier<C, T> = OtMultiplier<C, T, T>;

impl<C: Channel, T: RingElement, M: RingElement + From<T>> OtMultiplier<C, T, M> {
    /// Sets up the OT extension with `peer` from the executed base OTs and, given a
    /// MAC key share, derives the VOLE seeds from extended OTs.
    #[instrument(level = Level::DEBUG, skip_all, fields(me = me, peer = peer), err)]
    pub fn setup(
        mut channel: C,
        me: usize,
        peer: usize,
        seeds: BaseOtSeeds,
        mac_key: Option<M>,
        passive: bool,
    ) -> Result<Self, Error> {
        let mut receiver = OtExtReceiver::new(me, peer, seeds.sender, passive)?;
        let mut sender = OtExtSender::new(me, peer, &seeds.choices, seeds.receiver, passive)?;
        let auth = match mac_key {
            Some(key) => {
                let key_bits: BitVector = (0..M::BITS).map(|j| key.bit(j)).collect();
                let (chosen, pairs) = if me < peer {
                    let chosen = receiver.receive(&mut channel, &key_bits)?;
                    (chosen, sender.send(&mut channel, M::BITS)?)
                } else {
                    let pairs = sender.send(&mut channel, M::BITS)?;
                    (receiver.receive(&mut channel, &key_bits)?, pairs)
                };
                Some(Authenticator {
                    input: VoleInputHolder::new(me, peer, &pairs, passive)?,
                    key: VoleKeyHolder::new(me, peer, key, &chosen, passive)?,
                })
            }
            None => None,
        };
        debug!(macs = auth.is_some(), "multiplier ready");
        Ok(Self {
            channel,
            me,
            peer,
            receiver,
            sender,
            auth,
            _values: std::marker::PhantomData,
        })
    }

    /// The peer this multiplier works with.
    pub fn peer(&self) -> usize {
        self.peer
    }

    /// Gives up the link to the peer.
    pub fn into_channel(self) -> C {
        self.channel
    }

    /// Gilboa multiplication as OT receiver: returns shares of `a_peer * b` where the
    /// bits of `b` are the choice bits.
    fn gilboa_receive(&mut self, b: &[T]) -> Result<Vec<T>, Error> {
        let choices: BitVector = b.iter().flat_map(|b| (0..T::BITS).map(|j| b.bit(j))).collect();
        let ots = self.receiver.receive(&mut self.channel, &choices)?;
        let corrections: Vec<Rectangle<T, T>> =
            recv_vec_from(&mut self.channel, "Gilboa_u", b.len())?;
        ots.chunks_exact(T::BITS)
            .zip(corrections)
            .zip(b)
            .map(|((chosen, u), b)| {
                let mut rect = Rectangle::<T, T>::from_blocks(chosen)?;
                rect.conditional_add(*b, &u);
                Ok(rect.compose())
            })
            .collect()
    }

    /// Gilboa multiplication as OT sender: returns shares of `a * b_peer`.
    fn gilboa_send(&mut self, a: &[T]) -> Result<Vec<T>, Error> {
        let ots = self.sender.send(&mut self.channel, a.len() * T::BITS)?;
        let mut corrections = Vec::with_capacity(a.len());
        let mut shares = Vec::with_capacity(a.len());
        for (pairs, a) in ots.chunks_exact(T::BITS).zip(a) {
            let (k0, k1): (Vec<_>, Vec<_>) = pairs.iter().copied().unzip();
            let m0 = Rectangle::<T, T>::from_blocks(&k0)?;
            let mut u = m0.clone();
            u -= &Rectangle::from_blocks(&k1)?;
            u += &Rectangle::from_rows(vec![*a; T::BITS])?;
            corrections.push(u);
            shares.push(-m0.compose());
        }
        send_to(&mut self.channel, "Gilboa_u", &corrections)?;
        Ok(shares)
    }

    /// Shares of `a_me * b_peer + a_peer * b_me`.
    fn cross_products(&mut self, a: &[T], b: &[T]) -> Result<Vec<T>, Error> {
        check_len(a.len(), b.len())?;
        let (received, sent) = if self.me < self.peer {
            let received = self.gilboa_receive(b)?;
            (received, self.gilboa_send(a)?)
        } else {
            let sent = self.gilboa_send(a)?;
            (self.gilboa_receive(b)?, sent)
        };
        Ok(received.into_iter().zip(sent).map(|(x, y)| x + y).collect())
    }

    /// Shares of `α_peer * x_me + α_me * x_peer`.
    fn authenticate(&mut self, values: &[T]) -> Result<Vec<M>, Error> {
        let inputs: Vec<M> = values.iter().map(|x| M::from(*x)).collect();
        let channel = &mut self.channel;
        let auth = self.auth.as_mut().ok_or_else(macs_disabled)?;
        let (mine, theirs) = if self.me < self.peer {
            let mine = auth.input.evaluate(channel, &inputs)?;
            (mine, auth.key.evaluate(channel, inputs.len())?)
        } else {
            let theirs = auth.key.evaluate(channel, inputs.len())?;
            (auth.input.evaluate(channel, &inputs)?, theirs)
        };
        Ok(mine.into_iter().zip(theirs).map(|(x, y)| x + y).collect())
    }

    /// MAC shares for the inputs of `player`, zero if neither party owns them.
    fn authenticate_input(&mut self, player: usize, values: &[T]) -> Result<Vec<M>, Error> {
        if player != self.me && player != self.peer {
            return Ok(vec![M::ZERO; values.len()]);
        }
        let channel = &mut self.channel;
        let auth = self.auth.as_mut().ok_or_else(macs_disabled)?;
        if player == self.me {
            let inputs: Vec<M> = values.iter().map(|x| M::from(*x)).collect();
            auth.input.evaluate(channel, &inputs)
        } else {
            auth.key.evaluate(channel, values.len())
        }
    }

    /// Runs one job with the peer.
    #[instrument(
        level = Level::DEBUG,
        skip_all,
        fields(me = self.me, peer = self.peer, n = job.len()),
        err,
    )]
    pub fn process(&mut self, job: MultJob<T>) -> Result<MultOutput<T, M>, Error> {
        match job {
            MultJob::Triple { a, b } => Ok(MultOutput::Products(self.cross_products(&a, &b)?)),
            MultJob::Bit { a } => Ok(MultOutput::Products(self.cross_products(&a, &a)?)),
            MultJob::Input { player, values } => {
                Ok(MultOutput::Macs(self.authenticate_input(player, &values)?))
            }
            MultJob::Authenticate { values } => Ok(MultOutput::Macs(self.authenticate(&values)?)),
        }
    }

    /// Processes jobs from `inbox` until it is closed, answering on `outbox`.
    ///
    /// The first error is sent to `outbox` and ends the loop.
    pub fn run(
        mut self,
        mut inbox: Receiver<MultJob<T>>,
        outbox: Sender<Result<MultOutput<T, M>, Error>>,
    ) -> C {
        while let Some(job) = inbox.blocking_recv() {
            let res = self.process(job);
            let failed = res.is_err();
            if outbox.blocking_send(res).is_err() {
                warn!(peer = self.peer, "generator stopped listening");
                break;
            }
            if failed {
                break;
            }
        }
        debug!(peer = self.peer, "multiplier finished");
        self.channel
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::{
        base_ot::{BaseOt, OtRole},
        channel::LocalChannel,
        ring::Gfp127,
    };

    type Party<T, M> = (OtMultiplier<LocalChannel, T, M>, Option<M>);

    fn setup_party<T: RingElement, M: RingElement + From<T>>(
        mut channel: LocalChannel,
        me: usize,
        macs: bool,
    ) -> Result<Party<T, M>, Error> {
        let peer = 1 - me;
        let mut base = BaseOt::new(128, OtRole::Both, me, peer);
        base.exec_base(&mut channel, false)?;
        let key = macs.then(|| M::random(&mut rand::rng()));
        let mult = OtMultiplier::setup(channel, me, peer, base.set_seeds()?, key, false)?;
        Ok((mult, key))
    }

    /// Runs the same jobs on both parties, returns the keys and outputs of both.
    fn run_jobs<T: RingElement, M: RingElement + From<T>>(
        macs: bool,
        jobs: [Vec<MultJob<T>>; 2],
    ) -> Result<[(Option<M>, Vec<MultOutput<T, M>>); 2], Error> {
        let (a, b) = LocalChannel::pair();
        let [jobs0, jobs1] = jobs;
        let other = thread::spawn(move || -> Result<_, Error> {
            let (mut mult, key) = setup_party::<T, M>(b, 1, macs)?;
            let out = jobs1.into_iter().map(|job| mult.process(job)).collect::<Result<_, _>>()?;
            Ok((key, out))
        });
        let (mut mult, key) = setup_party::<T, M>(a, 0, macs)?;
        let out = jobs0.into_iter().map(|job| mult.process(job)).collect::<Result<_, _>>()?;
        Ok([(key, out), other.join().expect("party 1 panicked")?])
    }

    fn products<T: RingElement, M: RingElement>(out: &MultOutput<T, M>) -> &[T] {
        match out {
            MultOutput::Products(p) => p,
            MultOutput::Macs(_) => panic!("expected products"),
        }
    }

    fn macs<T: RingElement, M: RingElement>(out: &MultOutput<T, M>) -> &[M] {
        match out {
            MultOutput::Macs(m) => m,
            MultOutput::Products(_) => panic!("expected MACs"),
        }
    }

    fn check_cross_products<T: RingElement, M: RingElement + From<T>>() -> Result<(), Error> {
        let mut rng = StdRng::seed_from_u64(T::BITS as u64);
        let n = 30;
        let a: [Vec<T>; 2] = std::array::from_fn(|_| (0..n).map(|_| T::random(&mut rng)).collect());
        let b: [Vec<T>; 2] = std::array::from_fn(|_| (0..n).map(|_| T::random(&mut rng)).collect());
        let jobs = std::array::from_fn(|i| {
            vec![
                MultJob::Triple {
                    a: a[i].clone(),
                    b: b[i].clone(),
                },
                MultJob::Bit { a: a[i].clone() },
            ]
        });
        let [(_, out0), (_, out1)] = run_jobs::<T, M>(false, jobs)?;
        for k in 0..n {
            let cross = a[0][k] * b[1][k] + a[1][k] * b[0][k];
            assert_eq!(cross, products(&out0[0])[k] + products(&out1[0])[k]);
            let square = a[0][k] * a[1][k] + a[1][k] * a[0][k];
            assert_eq!(square, products(&out0[1])[k] + products(&out1[1])[k]);
        }
        Ok(())
    }

    #[test]
    fn cross_products_in_all_rings() -> Result<(), Error> {
        check_cross_products::<Gfp127, Gfp127>()?;
        check_cross_products::<Gf2, Gf2n128>()?;
        check_cross_products::<Z64, Z128>()?;
        Ok(())
    }

    #[test]
    fn authenticated_values_and_inputs() -> Result<(), Error> {
        let mut rng = rand::rng();
        let x: [Vec<Gfp127>; 2] =
            std::array::from_fn(|_| (0..10).map(|_| Gfp127::random(&mut rng)).collect());
        let inputs: Vec<Gfp127> = (0..5).map(|_| Gfp127::random(&mut rng)).collect();
        let jobs = std::array::from_fn(|i| {
            vec![
                MultJob::Authenticate { values: x[i].clone() },
                MultJob::Input {
                    player: 1,
                    values: if i == 1 { inputs.clone() } else { vec![Gfp127::ZERO; 5] },
                },
            ]
        });
        let [(key0, out0), (key1, out1)] = run_jobs::<Gfp127, Gfp127>(true, jobs)?;
        let (key0, key1) = (key0.expect("MAC key"), key1.expect("MAC key"));
        for k in 0..10 {
            let mac = key0 * x[0][k] + key1 * x[1][k] + macs(&out0[0])[k] + macs(&out1[0])[k];
            assert_eq!((key0 + key1) * (x[0][k] + x[1][k]), mac);
        }
        for (k, r) in inputs.iter().enumerate() {
            let mac = key1 * *r + macs(&out0[1])[k] + macs(&out1[1])[k];
            assert_eq!((key0 + key1) * *r, mac);
        }
        Ok(())
    }

    #[test]
    fn authentication_needs_a_key() {
        let jobs = std::array::from_fn(|_| {
            vec![MultJob::Authenticate {
                values: vec![Gfp127::ONE],
            }]
        });
        assert!(matches!(
            run_jobs::<Gfp127, Gfp127>(false, jobs),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn worker_loop_answers_every_job() -> Result<(), Error> {
        let (a, b) = LocalChannel::pair();
        let (inbox_tx, inbox) = tokio::sync::mpsc::channel(4);
        let (outbox, mut outbox_rx) = tokio::sync::mpsc::channel(4);
        let worker = thread::spawn(move || -> Result<(), Error> {
            let (mult, _) = setup_party::<Gfp127, Gfp127>(b, 1, false)?;
            mult.run(inbox, outbox);
            Ok(())
        });
        let (mut mult, _) = setup_party::<Gfp127, Gfp127>(a, 0, false)?;
        for _ in 0..3 {
            let job = MultJob::Bit { a: vec![Gfp127::new(3); 4] };
            inbox_tx.blocking_send(job.clone()).expect("worker alive");
            let mine = mult.process(job)?;
            let theirs = outbox_rx.blocking_recv().expect("worker answers")?;
            assert_eq!(Gfp127::new(18), products(&mine)[0] + products(&theirs)[0]);
        }
        drop(inbox_tx);
        worker.join().expect("worker panicked")?;
        Ok(())
    }
}
