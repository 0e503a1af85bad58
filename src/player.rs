//! A party's view of the network: one [`Channel`] per peer.
//!
//! Every exchange between two parties follows the same order: the party with the
//! lower index sends first, the party with the higher index receives first. When
//! a party talks to all its peers it does so in ascending peer order. Together this
//! gives a global order on all pairwise exchanges, so that no set of parties can
//! wait on each other in a cycle, even on links without buffering.
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    channel::{self, Channel, recv_from, send_to},
    config::Config,
    error::{Cheat, Error},
};

/// Sends `msg` to `peer` and receives its message of the same phase, in pair order.
pub(crate) fn exchange<T, C>(
    channel: &mut C,
    me: usize,
    peer: usize,
    phase: &str,
    msg: &T,
) -> Result<T, channel::Error>
where
    T: Serialize + DeserializeOwned,
    C: Channel + ?Sized,
{
    if me < peer {
        send_to(channel, phase, msg)?;
        recv_from(channel, phase)
    } else {
        let theirs = recv_from(channel, phase)?;
        send_to(channel, phase, msg)?;
        Ok(theirs)
    }
}

/// The links of party `my_num` to all other parties.
#[derive(Debug)]
pub struct Player<C: Channel> {
    me: usize,
    links: Vec<Option<C>>,
}

impl<C: Channel> Player<C> {
    /// Creates a player from its links, `links[k]` being the link to party `k`.
    ///
    /// `links[me]` must be `None`, all other entries must be present.
    pub fn new(me: usize, links: Vec<Option<C>>) -> Result<Self, Error> {
        if links.len() < 2 || me >= links.len() {
            return Err(Error::Config(format!(
                "party {me} cannot take part in a {}-party computation",
                links.len()
            )));
        }
        for (k, link) in links.iter().enumerate() {
            if (k == me) != link.is_none() {
                return Err(Error::Config(format!("invalid link from {me} to {k}")));
            }
        }
        Ok(Self { me, links })
    }

    /// The index of this party.
    pub fn my_num(&self) -> usize {
        self.me
    }

    /// The number of parties.
    pub fn num_players(&self) -> usize {
        self.links.len()
    }

    /// All other parties in ascending order.
    pub fn peers(&self) -> impl Iterator<Item = usize> + use<C> {
        let me = self.me;
        (0..self.links.len()).filter(move |k| *k != me)
    }

    /// The link to `peer`.
    pub(crate) fn link(&mut self, peer: usize) -> Result<&mut C, Error> {
        self.links
            .get_mut(peer)
            .and_then(Option::as_mut)
            .ok_or(Error::Bug("no link to peer"))
    }

    /// Serializes and sends a message to `peer`.
    pub fn send_to(
        &mut self,
        peer: usize,
        phase: &str,
        msg: &(impl Serialize + ?Sized),
    ) -> Result<(), Error> {
        Ok(send_to(self.link(peer)?, phase, msg)?)
    }

    /// Receives and deserializes a message from `peer`.
    pub fn recv_from<T: DeserializeOwned>(&mut self, peer: usize, phase: &str) -> Result<T, Error> {
        Ok(recv_from(self.link(peer)?, phase)?)
    }

    /// Sends `msgs[k]` to every peer `k` and returns the messages received from them.
    ///
    /// `msgs[me]` is ignored, the result contains `None` at index `me`.
    pub fn scatter<T>(&mut self, phase: &str, msgs: &[T]) -> Result<Vec<Option<T>>, Error>
    where
        T: Serialize + DeserializeOwned,
    {
        crate::error::check_len(self.num_players(), msgs.len())?;
        let me = self.me;
        let mut received: Vec<Option<T>> = (0..msgs.len()).map(|_| None).collect();
        for k in self.peers() {
            received[k] = Some(exchange(self.link(k)?, me, k, phase, &msgs[k])?);
        }
        Ok(received)
    }

    /// Sends the same message to all peers without checking that they all got the
    /// same. The result contains `msg` itself at index `me`.
    pub fn unverified_broadcast<T>(&mut self, phase: &str, msg: &T) -> Result<Vec<T>, Error>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let me = self.me;
        let mut received = Vec::with_capacity(self.num_players());
        for k in 0..self.num_players() {
            if k == me {
                received.push(msg.clone());
            } else {
                received.push(exchange(self.link(k)?, me, k, phase, msg)?);
            }
        }
        Ok(received)
    }

    /// Broadcast with abort: like [`Player::unverified_broadcast`], followed by an
    /// exchange of hashes of everything received so that a party sending different
    /// messages to different peers is caught.
    pub fn broadcast<T>(&mut self, phase: &str, msg: &T) -> Result<Vec<T>, Error>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let received = self.unverified_broadcast(phase, msg)?;
        if self.num_players() == 2 {
            return Ok(received);
        }
        let mut hashes = Vec::with_capacity(received.len());
        for m in &received {
            let bytes = bincode::serialize(m).map_err(|e| channel::Error {
                phase: format!("hashing {phase}"),
                reason: channel::ErrorKind::SerdeError(format!("{e:?}")),
            })?;
            hashes.push(*blake3::hash(&bytes).as_bytes());
        }
        let phase = format!("{phase} (verification)");
        let theirs = self.unverified_broadcast(&phase, &hashes)?;
        for (k, h) in theirs.iter().enumerate() {
            if *h != hashes {
                debug!(peer = k, %phase, "broadcast views differ");
                return Err(Cheat::InconsistentBroadcast.into());
            }
        }
        Ok(received)
    }

    /// Removes the links to all peers, leaving the player without links.
    pub(crate) fn take_links(&mut self) -> Vec<(usize, C)> {
        self.links
            .iter_mut()
            .enumerate()
            .filter_map(|(k, link)| link.take().map(|link| (k, link)))
            .collect()
    }

    /// Returns the links, `links[me]` being `None`.
    pub fn into_links(self) -> Vec<Option<C>> {
        self.links
    }
}

impl Player<channel::TcpChannel> {
    /// Connects party [`Config::my_num`] to the parties listening on `addrs`.
    ///
    /// See [`channel::tcp_links`] for the connection order.
    pub fn connect_tcp(config: &Config, addrs: &[std::net::SocketAddr]) -> Result<Self, Error> {
        config.validate()?;
        if addrs.len() != config.n_parties {
            return Err(Error::Config(format!(
                "{} addresses given for {} parties",
                addrs.len(),
                config.n_parties
            )));
        }
        let me = config.my_num;
        let links = channel::tcp_links(me, addrs, config.connect_timeout, config.max_frame_len())?;
        Self::new(me, links)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::thread;

    use super::*;
    use crate::channel::LocalChannel;

    /// Runs `f` for every party of an in-memory `n`-party network on its own thread.
    pub(crate) fn run_parties<T, F>(n: usize, f: F) -> Vec<T>
    where
        T: Send + 'static,
        F: Fn(Player<LocalChannel>) -> T + Send + Sync + Clone + 'static,
    {
        let handles: Vec<_> = LocalChannel::mesh(n)
            .into_iter()
            .enumerate()
            .map(|(me, links)| {
                let f = f.clone();
                thread::spawn(move || f(Player::new(me, links).expect("valid links")))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("party thread panicked"))
            .collect()
    }

    #[test]
    fn new_rejects_missing_links() {
        let mut mesh = LocalChannel::mesh(3);
        let links = mesh.remove(0);
        assert!(Player::new(1, links).is_err());
    }

    #[test]
    fn connect_tcp_needs_one_address_per_party() {
        let addrs: Vec<std::net::SocketAddr> = vec!["127.0.0.1:0".parse().unwrap(); 2];
        let res = Player::connect_tcp(&Config::new(3, 2), &addrs);
        assert!(matches!(res, Err(Error::Config(_))));
    }

    #[test]
    fn broadcast_and_scatter() {
        let results = run_parties(4, |mut p| -> Result<_, Error> {
            let me = p.my_num();
            let all = p.broadcast("ids", &(me as u32 * 10))?;
            let msgs: Vec<u64> = (0..4).map(|k| (me * 100 + k) as u64).collect();
            let scattered = p.scatter("scatter", &msgs)?;
            Ok((all, scattered))
        });
        for (me, res) in results.into_iter().enumerate() {
            let (all, scattered) = res.expect("no error");
            assert_eq!(vec![0, 10, 20, 30], all);
            for (k, m) in scattered.into_iter().enumerate() {
                if k == me {
                    assert!(m.is_none());
                } else {
                    assert_eq!(Some((k * 100 + me) as u64), m);
                }
            }
        }
    }

    #[test]
    fn inconsistent_broadcast_is_detected() {
        let results = run_parties(3, |mut p| -> Result<Vec<u8>, Error> {
            if p.my_num() == 0 {
                // party 0 equivocates by sending different values to its peers
                let mut received = vec![0_u8; 3];
                received[1] = exchange(p.link(1)?, 0, 1, "value", &1_u8)?;
                received[2] = exchange(p.link(2)?, 0, 2, "value", &2_u8)?;
                let hashes: Vec<[u8; 32]> = received
                    .iter()
                    .map(|m| *blake3::hash(&bincode::serialize(m).unwrap()).as_bytes())
                    .collect();
                p.unverified_broadcast("value (verification)", &hashes)?;
                Ok(received)
            } else {
                p.broadcast("value", &0_u8)
            }
        });
        assert!(matches!(
            results[1],
            Err(Error::MaliciousBehavior(Cheat::InconsistentBroadcast))
        ));
        assert!(matches!(
            results[2],
            Err(Error::MaliciousBehavior(Cheat::InconsistentBroadcast))
        ));
    }
}
