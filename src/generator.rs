//! N-party generation of raw triples, squares and input masks.
//!
//! Every party runs one [`OtMultiplier`] per peer. A batch is handed to all
//! multipliers at once and the generator waits for all of them before it adds up
//! the pairwise shares with the local terms `a_i * b_i` and `α_i * x_i`. With
//! [`Config::multi_threaded`] every multiplier runs on its own OS thread, fed over
//! bounded channels; otherwise the multipliers run in the calling thread one peer
//! after the other in ascending order.
//!
//! The generated data is not checked yet, see [`crate::sacrifice`].
use std::{
    ops::Range,
    thread::{self, JoinHandle},
};

use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{Level, debug, instrument, warn};

use crate::{
    channel::Channel,
    config::Config,
    error::Error,
    multiplier::{MultJob, MultOutput, OtMultiplier},
    player::Player,
    ring::RingElement,
    setup::OtTripleSetup,
    share::{InputTuple, PlainTriple, Share, Triple},
};

/// The number of jobs that can be queued for a worker thread.
const JOB_QUEUE_CAPACITY: usize = 4;

type JobResult<T, M> = Result<MultOutput<T, M>, Error>;

/// A multiplier running on its own thread.
#[derive(Debug)]
struct Worker<C: Channel, T: RingElement, M: RingElement> {
    peer: usize,
    inbox: Option<Sender<MultJob<T>>>,
    outbox: Receiver<JobResult<T, M>>,
    handle: Option<JoinHandle<Option<C>>>,
}

impl<C: Channel, T: RingElement, M: RingElement> Worker<C, T, M> {
    /// The error that stopped the worker, if it left one behind.
    fn failure(&mut self) -> Error {
        match self.outbox.try_recv() {
            Ok(Err(e)) => e,
            _ => Error::WorkerTerminated(self.peer),
        }
    }

    /// Closes the inbox and waits for the worker to hand back its link.
    fn join(mut self) -> Result<C, Error> {
        self.inbox = None;
        let handle = self.handle.take().ok_or(Error::WorkerTerminated(self.peer))?;
        match handle.join() {
            Ok(Some(channel)) => Ok(channel),
            _ => Err(Error::WorkerTerminated(self.peer)),
        }
    }
}

#[derive(Debug)]
enum Workers<C: Channel, T: RingElement, M: RingElement> {
    Inline(Vec<OtMultiplier<C, T, M>>),
    Threaded(Vec<Worker<C, T, M>>),
}

/// Generates preprocessing data together with all other parties.
#[derive(Debug)]
pub struct NPartyTripleGenerator<C: Channel + 'static, T: RingElement, M: RingElement = T> {
    me: usize,
    n_parties: usize,
    batch_size: usize,
    mac_key: Option<M>,
    workers: Workers<C, T, M>,
    failed: bool,
}

impl<C, T, M> NPartyTripleGenerator<C, T, M>
where
    C: Channel + 'static,
    T: RingElement,
    M: RingElement + From<T>,
{
    /// Runs the base OTs with all peers of `player` and starts one multiplier per peer.
    ///
    /// The links of `player` move to the multipliers; [`Self::into_player`] returns
    /// them. A random MAC key share is drawn if the configuration asks for MACs.
    #[instrument(level = Level::DEBUG, skip_all, fields(me = config.my_num), err)]
    pub fn new(mut player: Player<C>, config: &Config) -> Result<Self, Error> {
        config.validate()?;
        let (me, n_parties) = (player.my_num(), player.num_players());
        if me != config.my_num || n_parties != config.n_parties {
            return Err(Error::Config(format!(
                "player {me} of {n_parties} does not match the configured party {} of {}",
                config.my_num, config.n_parties
            )));
        }
        let mut setup = OtTripleSetup::new(&player, config.n_base_ots);
        setup.run(&mut player)?;
        let mac_key = config.generate_macs.then(|| M::random(&mut rand::rng()));
        let passive = config.passive;

        let mut inline = vec![];
        let mut threaded = vec![];
        for (peer, link) in player.take_links() {
            let seeds = setup.take_seeds(peer)?;
            if config.multi_threaded {
                let (inbox, jobs) = mpsc::channel(JOB_QUEUE_CAPACITY);
                let (results, outbox) = mpsc::channel(JOB_QUEUE_CAPACITY);
                let handle = thread::Builder::new()
                    .name(format!("multiplier-{me}-{peer}"))
                    .spawn(move || {
                        match OtMultiplier::setup(link, me, peer, seeds, mac_key, passive) {
                            Ok(mult) => Some(mult.run(jobs, results)),
                            Err(e) => {
                                // the generator picks this up with the first job
                                let _ = results.blocking_send(Err(e));
                                None
                            }
                        }
                    })?;
                threaded.push(Worker {
                    peer,
                    inbox: Some(inbox),
                    outbox,
                    handle: Some(handle),
                });
            } else {
                inline.push(OtMultiplier::setup(link, me, peer, seeds, mac_key, passive)?);
            }
        }
        let workers = if config.multi_threaded {
            Workers::Threaded(threaded)
        } else {
            Workers::Inline(inline)
        };
        debug!(threads = config.multi_threaded, macs = mac_key.is_some(), "generator ready");
        Ok(Self {
            me,
            n_parties,
            batch_size: config.batch_size,
            mac_key,
            workers,
            failed: false,
        })
    }

    /// The index of this party.
    pub fn my_num(&self) -> usize {
        self.me
    }

    /// This party's share of the global MAC key, `None` without MACs.
    pub fn mac_key(&self) -> Option<M> {
        self.mac_key
    }

    /// Hands `job` to the multipliers of all peers and collects their outputs in
    /// ascending peer order.
    fn run_job(&mut self, job: MultJob<T>) -> Result<Vec<MultOutput<T, M>>, Error> {
        let res = match &mut self.workers {
            Workers::Inline(mults) => mults.iter_mut().map(|m| m.process(job.clone())).collect(),
            Workers::Threaded(workers) => fan_out(workers, job),
        };
        if res.is_err() {
            self.failed = true;
        }
        res
    }

    /// Sums the pairwise outputs of all jobs created by `job` for the ranges of a
    /// batching of `n` values.
    fn cross_terms<V: RingElement>(
        &mut self,
        n: usize,
        job: impl Fn(Range<usize>) -> MultJob<T>,
        pick: impl Fn(MultOutput<T, M>) -> Result<Vec<V>, Error>,
    ) -> Result<Vec<V>, Error> {
        let mut sums = Vec::with_capacity(n);
        for start in (0..n).step_by(self.batch_size) {
            let range = start..n.min(start + self.batch_size);
            let mut sum = vec![V::ZERO; range.len()];
            for out in self.run_job(job(range.clone()))? {
                let out = pick(out)?;
                crate::error::check_len(sum.len(), out.len())?;
                sum.iter_mut().zip(out).for_each(|(s, x)| *s += x);
            }
            sums.extend(sum);
        }
        Ok(sums)
    }

    fn products(&mut self, a: &[T], b: Option<&[T]>) -> Result<Vec<T>, Error> {
        let cross = self.cross_terms(
            a.len(),
            |r| match b {
                Some(b) => MultJob::Triple {
                    a: a[r.clone()].to_vec(),
                    b: b[r].to_vec(),
                },
                None => MultJob::Bit { a: a[r].to_vec() },
            },
            |out| match out {
                MultOutput::Products(p) => Ok(p),
                MultOutput::Macs(_) => Err(Error::Bug("multiplier returned MACs for products")),
            },
        )?;
        Ok(a.iter()
            .zip(b.unwrap_or(a))
            .zip(cross)
            .map(|((a, b), cross)| *a * *b + cross)
            .collect())
    }

    fn key(&self) -> Result<M, Error> {
        self.mac_key
            .ok_or(Error::Config("MACs are disabled in this configuration".into()))
    }

    /// Generates `n` triples without MACs.
    #[instrument(level = Level::DEBUG, skip(self), fields(me = self.me), err)]
    pub fn generate_plain_triples(&mut self, n: usize) -> Result<Vec<PlainTriple<T>>, Error> {
        let mut rng = rand::rng();
        let a: Vec<T> = (0..n).map(|_| T::random(&mut rng)).collect();
        let b: Vec<T> = (0..n).map(|_| T::random(&mut rng)).collect();
        let c = self.products(&a, Some(&b))?;
        debug!("plain triples generated");
        Ok(a.into_iter()
            .zip(b)
            .zip(c)
            .map(|((a, b), c)| PlainTriple { a, b, c })
            .collect())
    }

    /// Adds MACs to the shared `values`.
    #[instrument(level = Level::DEBUG, skip_all, fields(me = self.me, n = values.len()), err)]
    pub fn authenticate(&mut self, values: &[T]) -> Result<Vec<Share<T, M>>, Error> {
        let key = self.key()?;
        let macs = self.cross_terms(
            values.len(),
            |r| MultJob::Authenticate {
                values: values[r].to_vec(),
            },
            macs,
        )?;
        Ok(values
            .iter()
            .zip(macs)
            .map(|(x, mac)| Share::new(*x, key * M::from(*x) + mac))
            .collect())
    }

    /// Generates `n` authenticated triples that still have to be sacrificed.
    #[instrument(level = Level::DEBUG, skip(self), fields(me = self.me), err)]
    pub fn generate_triples(&mut self, n: usize) -> Result<Vec<Triple<T, M>>, Error> {
        let plain = self.generate_plain_triples(n)?;
        let values: Vec<T> = plain
            .iter()
            .map(|t| t.a)
            .chain(plain.iter().map(|t| t.b))
            .chain(plain.iter().map(|t| t.c))
            .collect();
        let shares = self.authenticate(&values)?;
        let (a, rest) = shares.split_at(n);
        let (b, c) = rest.split_at(n);
        Ok((0..n)
            .map(|i| Triple {
                a: a[i],
                b: b[i],
                c: c[i],
            })
            .collect())
    }

    /// Generates `n` authenticated pairs `(a, a^2)` that still have to be sacrificed.
    #[instrument(level = Level::DEBUG, skip(self), fields(me = self.me), err)]
    pub fn generate_squares(&mut self, n: usize) -> Result<Vec<(Share<T, M>, Share<T, M>)>, Error> {
        let mut rng = rand::rng();
        let a: Vec<T> = (0..n).map(|_| T::random(&mut rng)).collect();
        let squares = self.products(&a, None)?;
        let values: Vec<T> = a.into_iter().chain(squares).collect();
        let shares = self.authenticate(&values)?;
        let (a, s) = shares.split_at(n);
        Ok(a.iter().copied().zip(s.iter().copied()).collect())
    }

    /// Generates `n` authenticated random input masks of `player`.
    ///
    /// The owner's value share is the mask itself, all other parties hold zero.
    #[instrument(level = Level::DEBUG, skip(self), fields(me = self.me), err)]
    pub fn generate_inputs(
        &mut self,
        player: usize,
        n: usize,
    ) -> Result<Vec<InputTuple<T, M>>, Error> {
        if player >= self.n_parties {
            return Err(Error::Config(format!(
                "party {player} does not exist in a {}-party computation",
                self.n_parties
            )));
        }
        let key = self.key()?;
        let owner = player == self.me;
        let mut rng = rand::rng();
        let values: Vec<T> = (0..n)
            .map(|_| if owner { T::random(&mut rng) } else { T::ZERO })
            .collect();
        let macs = self.cross_terms(
            n,
            |r| MultJob::Input {
                player,
                values: values[r].to_vec(),
            },
            macs,
        )?;
        Ok(values
            .into_iter()
            .zip(macs)
            .map(|(value, mac)| InputTuple {
                share: Share::new(value, if owner { key * M::from(value) + mac } else { mac }),
                value,
            })
            .collect())
    }

    /// Stops all multipliers and returns the links to the peers as a player.
    pub fn into_player(mut self) -> Result<Player<C>, Error> {
        let workers = std::mem::replace(&mut self.workers, Workers::Inline(vec![]));
        let mut links: Vec<Option<C>> = (0..self.n_parties).map(|_| None).collect();
        match workers {
            Workers::Inline(mults) => {
                for m in mults {
                    let peer = m.peer();
                    links[peer] = Some(m.into_channel());
                }
            }
            Workers::Threaded(workers) => {
                for w in workers {
                    let peer = w.peer;
                    links[peer] = Some(w.join()?);
                }
            }
        }
        Player::new(self.me, links)
    }
}

fn macs<T: RingElement, M: RingElement>(out: MultOutput<T, M>) -> Result<Vec<M>, Error> {
    match out {
        MultOutput::Macs(m) => Ok(m),
        MultOutput::Products(_) => Err(Error::Bug("multiplier returned products for MACs")),
    }
}

fn fan_out<C: Channel, T: RingElement, M: RingElement>(
    workers: &mut [Worker<C, T, M>],
    job: MultJob<T>,
) -> Result<Vec<MultOutput<T, M>>, Error> {
    for w in workers.iter_mut() {
        let sent = match &w.inbox {
            Some(inbox) => inbox.blocking_send(job.clone()).is_ok(),
            None => false,
        };
        if !sent {
            return Err(w.failure());
        }
    }
    let mut outputs = Vec::with_capacity(workers.len());
    for w in workers.iter_mut() {
        match w.outbox.blocking_recv() {
            Some(res) => outputs.push(res?),
            None => return Err(Error::WorkerTerminated(w.peer)),
        }
    }
    Ok(outputs)
}

impl<C: Channel + 'static, T: RingElement, M: RingElement> Drop for NPartyTripleGenerator<C, T, M> {
    fn drop(&mut self) {
        if let Workers::Threaded(workers) = &mut self.workers {
            for w in workers.iter_mut() {
                w.inbox = None;
                if let Some(handle) = w.handle.take() {
                    if self.failed {
                        // a worker can still be blocked on its peer, leave it detached
                        warn!(peer = w.peer, "detaching multiplier after failure");
                    } else if handle.join().is_err() {
                        warn!(peer = w.peer, "multiplier panicked");
                    }
                }
            }
        }
    }
}
