//! The base OTs of a party with all its peers.
use tracing::{Level, debug, instrument};

use crate::{
    base_ot::{BaseOt, BaseOtSeeds, OtRole},
    channel::Channel,
    config::BASE_OTS,
    error::Error,
    player::Player,
};

/// Base OTs in both directions with every peer, run once per generator.
#[derive(Debug)]
pub struct OtTripleSetup {
    me: usize,
    base_ots: Vec<Option<BaseOt>>,
}

impl OtTripleSetup {
    /// Prepares `n_base_ots` OTs in both directions with every peer of `player`.
    pub fn new<C: Channel>(player: &Player<C>, n_base_ots: usize) -> Self {
        let me = player.my_num();
        let base_ots = (0..player.num_players())
            .map(|k| (k != me).then(|| BaseOt::new(n_base_ots, OtRole::Both, me, k)))
            .collect();
        Self { me, base_ots }
    }

    /// Runs the base OTs with all peers in ascending order.
    #[instrument(level = Level::DEBUG, skip_all, fields(me = self.me), err)]
    pub fn run<C: Channel>(&mut self, player: &mut Player<C>) -> Result<(), Error> {
        for peer in player.peers() {
            let ot = self.base_ots[peer].as_mut().ok_or(Error::Bug("no base OTs for peer"))?;
            ot.exec_base(player.link(peer)?, false)?;
        }
        debug!(peers = self.base_ots.len() - 1, "base OTs with all peers done");
        Ok(())
    }

    /// The seeds for the OT extension with `peer`; can be taken once.
    pub fn take_seeds(&mut self, peer: usize) -> Result<BaseOtSeeds, Error> {
        self.base_ots
            .get_mut(peer)
            .and_then(Option::take)
            .ok_or(Error::Bug("base OTs for peer missing or already taken"))?
            .set_seeds()
    }
}

/// Runs the default setup of [`BASE_OTS`] OTs with every peer.
pub fn base_ots_with_all<C: Channel>(player: &mut Player<C>) -> Result<OtTripleSetup, Error> {
    let mut setup = OtTripleSetup::new(player, BASE_OTS);
    setup.run(player)?;
    Ok(setup)
}
