//! Base oblivious transfers between two parties, the seeds of the OT extension.
use rand::SeedableRng;
use tracing::{Level, debug, instrument};

use crate::{
    bit_vector::BitVector,
    block::Block,
    channel::Channel,
    crypto::AesRng,
    error::Error,
};

mod chou_orlandi;

/// The direction(s) in which a party runs base OTs with its peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtRole {
    /// Only send.
    Sender,
    /// Only receive.
    Receiver,
    /// Send and receive; the party with the lower index sends first.
    Both,
}

impl OtRole {
    fn sends(self) -> bool {
        matches!(self, OtRole::Sender | OtRole::Both)
    }

    fn receives(self) -> bool {
        matches!(self, OtRole::Receiver | OtRole::Both)
    }
}

/// The PRNGs seeded from executed base OTs.
#[derive(Debug)]
pub struct BaseOtSeeds {
    /// One pair of PRNGs per OT in which this party was the sender.
    pub sender: Vec<(AesRng, AesRng)>,
    /// One PRNG per OT in which this party was the receiver, seeded with the chosen
    /// output.
    pub receiver: Vec<AesRng>,
    /// The choice bits of the OTs in which this party was the receiver.
    pub choices: BitVector,
}

/// A batch of `n_ots` random 1-out-of-2 OTs with one peer.
///
/// A `BaseOt` is executed once; [`BaseOt::fresh`] creates a new unexecuted instance
/// with the same parameters.
#[derive(Debug)]
pub struct BaseOt {
    n_ots: usize,
    role: OtRole,
    me: usize,
    peer: usize,
    choices: BitVector,
    sender_outputs: Vec<(Block, Block)>,
    receiver_outputs: Vec<Block>,
    executed: bool,
}

impl BaseOt {
    /// Creates `n_ots` OTs between `me` and `peer` with random choice bits.
    pub fn new(n_ots: usize, role: OtRole, me: usize, peer: usize) -> Self {
        Self::with_choices(role, me, peer, BitVector::random(n_ots, &mut rand::rng()))
    }

    /// Creates OTs with the given choice bits, one OT per bit.
    pub fn with_choices(role: OtRole, me: usize, peer: usize, choices: BitVector) -> Self {
        Self {
            n_ots: choices.len(),
            role,
            me,
            peer,
            choices,
            sender_outputs: vec![],
            receiver_outputs: vec![],
            executed: false,
        }
    }

    /// A new unexecuted instance with the same parameters and fresh random choices.
    pub fn fresh(&self) -> Self {
        Self::new(self.n_ots, self.role, self.me, self.peer)
    }

    /// The number of OTs.
    pub fn n_ots(&self) -> usize {
        self.n_ots
    }

    /// The choice bits used as receiver.
    pub fn choices(&self) -> &BitVector {
        &self.choices
    }

    /// The outputs `(k0, k1)` as sender, empty before execution.
    pub fn sender_outputs(&self) -> &[(Block, Block)] {
        &self.sender_outputs
    }

    /// The outputs `k_{c_i}` as receiver, empty before execution.
    pub fn receiver_outputs(&self) -> &[Block] {
        &self.receiver_outputs
    }

    /// Runs the OTs over `channel`.
    ///
    /// With `regenerate`, new random choice bits are drawn first.
    #[instrument(level = Level::DEBUG, skip_all, fields(me = self.me, peer = self.peer), err)]
    pub fn exec_base<C: Channel + ?Sized>(
        &mut self,
        channel: &mut C,
        regenerate: bool,
    ) -> Result<(), Error> {
        if self.executed {
            return Err(Error::Bug("base OTs can only be executed once"));
        }
        if regenerate {
            self.choices = BitVector::random(self.n_ots, &mut rand::rng());
        }
        let mut rng = rand::rng();
        let send_first = self.me < self.peer || !self.role.receives();
        for sending in [send_first, !send_first] {
            if sending && self.role.sends() {
                self.sender_outputs =
                    chou_orlandi::send(channel, &mut rng, self.me, self.peer, self.n_ots)?;
            } else if !sending && self.role.receives() {
                self.receiver_outputs =
                    chou_orlandi::receive(channel, &mut rng, self.me, self.peer, &self.choices)?;
            }
        }
        debug!(n = self.n_ots, role = ?self.role, "base OTs done");
        self.executed = true;
        Ok(())
    }

    /// Seeds one [`AesRng`] per OT output for the extension.
    pub fn set_seeds(&self) -> Result<BaseOtSeeds, Error> {
        if !self.executed {
            return Err(Error::Bug("base OTs have not been executed"));
        }
        Ok(BaseOtSeeds {
            sender: self
                .sender_outputs
                .iter()
                .map(|(k0, k1)| (AesRng::from_seed(*k0), AesRng::from_seed(*k1)))
                .collect(),
            receiver: self.receiver_outputs.iter().map(|k| AesRng::from_seed(*k)).collect(),
            choices: self.choices.clone(),
        })
    }
}
