//! Point-to-point links between two parties.
//!
//! Every pair of parties shares one [`Channel`]. All protocol messages are
//! serialized with bincode (fixed-width little-endian integers, `u64` length
//! prefixes for vectors) and, on TCP, framed as `[u64 LE length][payload]`.
//! Channels are blocking: each link is owned by exactly one thread at a time.

use std::{
    fmt,
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    thread,
    time::{Duration, Instant},
};

use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::mpsc::{Receiver, Sender, channel, error::SendError};
use tracing::{debug, trace, warn};

/// Errors related to sending / receiving / (de-)serializing messages.
#[derive(Debug, thiserror::Error)]
#[error("{reason} (phase: {phase})")]
pub struct Error {
    /// The protocol phase during which the error occurred.
    pub phase: String,
    /// The specific error that was raised.
    pub reason: ErrorKind,
}

/// The specific error that occurred when trying to send / receive a message.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// The (serialized) message could not be received over the channel.
    #[error("receive failed: {0}")]
    RecvError(String),
    /// The (serialized) message could not be sent over the channel.
    #[error("send failed: {0}")]
    SendError(String),
    /// The message could not be (de-)serialized.
    #[error("serialization failed: {0}")]
    SerdeError(String),
    /// The message is a Vec, but not of the expected length.
    #[error("expected {expected} elements, got {actual}")]
    InvalidLength {
        /// Expected number of elements.
        expected: usize,
        /// Received number of elements.
        actual: usize,
    },
}

/// A bidirectional, blocking, ordered link to one other party.
pub trait Channel: Send {
    /// The error that can occur sending messages over the channel.
    type SendError: fmt::Debug;
    /// The error that can occur receiving messages over the channel.
    type RecvError: fmt::Debug;

    /// Sends a message to the other end of the link.
    fn send_bytes(&mut self, msg: Vec<u8>) -> Result<(), Self::SendError>;

    /// Blocks until the next message from the other end of the link arrives.
    fn recv_bytes(&mut self) -> Result<Vec<u8>, Self::RecvError>;
}

/// Serializes and sends a message to the other end of `channel`.
pub(crate) fn send_to<C: Channel + ?Sized>(
    channel: &mut C,
    phase: &str,
    msg: &(impl Serialize + ?Sized),
) -> Result<(), Error> {
    let msg = bincode::serialize(msg).map_err(|e| Error {
        phase: format!("sending {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })?;
    trace!(phase, bytes = msg.len(), "sending message");
    channel.send_bytes(msg).map_err(|e| Error {
        phase: phase.to_string(),
        reason: ErrorKind::SendError(format!("{e:?}")),
    })
}

/// Receives and deserializes a message from the other end of `channel`.
pub(crate) fn recv_from<T: DeserializeOwned, C: Channel + ?Sized>(
    channel: &mut C,
    phase: &str,
) -> Result<T, Error> {
    let msg = channel.recv_bytes().map_err(|e| Error {
        phase: phase.to_string(),
        reason: ErrorKind::RecvError(format!("{e:?}")),
    })?;
    trace!(phase, bytes = msg.len(), "received message");
    bincode::deserialize(&msg).map_err(|e| Error {
        phase: format!("receiving {phase}"),
        reason: ErrorKind::SerdeError(format!("{e:?}")),
    })
}

/// Receives and deserializes a Vec while checking its length.
pub(crate) fn recv_vec_from<T: DeserializeOwned, C: Channel + ?Sized>(
    channel: &mut C,
    phase: &str,
    len: usize,
) -> Result<Vec<T>, Error> {
    let v: Vec<T> = recv_from(channel, phase)?;
    if v.len() == len {
        Ok(v)
    } else {
        Err(Error {
            phase: phase.to_string(),
            reason: ErrorKind::InvalidLength {
                expected: len,
                actual: v.len(),
            },
        })
    }
}

/// Number of messages buffered in each direction of a [`LocalChannel`].
const LOCAL_BUFFER_CAPACITY: usize = 1024;

/// An in-memory link between two threads of the same process.
#[derive(Debug)]
pub struct LocalChannel {
    s: Sender<Vec<u8>>,
    r: Receiver<Vec<u8>>,
}

/// The error raised by `recv` calls of a [`LocalChannel`].
#[derive(Debug)]
pub enum LocalRecvError {
    /// The other end of the link has been dropped.
    Closed,
}

impl LocalChannel {
    /// Creates the two ends of a link.
    pub fn pair() -> (Self, Self) {
        let (send_a_to_b, recv_a_to_b) = channel(LOCAL_BUFFER_CAPACITY);
        let (send_b_to_a, recv_b_to_a) = channel(LOCAL_BUFFER_CAPACITY);
        (
            Self {
                s: send_a_to_b,
                r: recv_b_to_a,
            },
            Self {
                s: send_b_to_a,
                r: recv_a_to_b,
            },
        )
    }

    /// Creates a full mesh of links for `parties` parties.
    ///
    /// Entry `[a][b]` is the link of party `a` to party `b`, `[a][a]` is `None`.
    pub fn mesh(parties: usize) -> Vec<Vec<Option<Self>>> {
        let mut links: Vec<Vec<Option<Self>>> = (0..parties)
            .map(|_| (0..parties).map(|_| None).collect())
            .collect();
        for a in 0..parties {
            for b in a + 1..parties {
                let (a_to_b, b_to_a) = Self::pair();
                links[a][b] = Some(a_to_b);
                links[b][a] = Some(b_to_a);
            }
        }
        links
    }
}

impl Channel for LocalChannel {
    type SendError = SendError<Vec<u8>>;
    type RecvError = LocalRecvError;

    fn send_bytes(&mut self, msg: Vec<u8>) -> Result<(), Self::SendError> {
        self.s.blocking_send(msg)
    }

    fn recv_bytes(&mut self) -> Result<Vec<u8>, Self::RecvError> {
        self.r.blocking_recv().ok_or(LocalRecvError::Closed)
    }
}

/// Default upper bound for the length of a single framed message.
///
/// [`crate::config::Config::max_frame_len`] derives a tighter bound from the batch
/// sizes of a run.
pub const DEFAULT_MAX_FRAME_LEN: u64 = 1 << 26;

/// A link over a TCP connection.
#[derive(Debug)]
pub struct TcpChannel {
    stream: TcpStream,
    max_frame_len: u64,
}

impl TcpChannel {
    /// Wraps an established connection.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        })
    }

    /// Rejects received frames longer than `max_frame_len` bytes.
    pub fn with_max_frame_len(mut self, max_frame_len: u64) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Connects to `addr`, retrying with exponential backoff until `timeout` elapsed.
    pub fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<Self> {
        let start = Instant::now();
        let mut backoff = Duration::from_millis(10);
        loop {
            match TcpStream::connect(addr) {
                Ok(stream) => {
                    debug!(%addr, "connected");
                    return Self::new(stream);
                }
                Err(e) if start.elapsed() + backoff < timeout => {
                    warn!(%addr, ?backoff, "connection failed, retrying: {e}");
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(Duration::from_secs(2));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Channel for TcpChannel {
    type SendError = io::Error;
    type RecvError = io::Error;

    fn send_bytes(&mut self, msg: Vec<u8>) -> Result<(), Self::SendError> {
        let mut frame = Vec::with_capacity(8 + msg.len());
        frame.extend((msg.len() as u64).to_le_bytes());
        frame.extend(msg);
        self.stream.write_all(&frame)?;
        self.stream.flush()
    }

    fn recv_bytes(&mut self) -> Result<Vec<u8>, Self::RecvError> {
        let mut len = [0; 8];
        self.stream.read_exact(&mut len)?;
        let len = u64::from_le_bytes(len);
        if len > self.max_frame_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds limit of {}", self.max_frame_len),
            ));
        }
        let mut msg = vec![0; len as usize];
        self.stream.read_exact(&mut msg)?;
        Ok(msg)
    }
}

/// Establishes TCP links from party `me` to all parties listed in `addrs`.
///
/// Party `me` listens on `addrs[me]`, connects to all parties with a lower index
/// and accepts connections from all parties with a higher index. A connecting party
/// announces its index as `u64 LE` right after connecting. Every link rejects frames
/// longer than `max_frame_len` bytes.
pub fn tcp_links(
    me: usize,
    addrs: &[SocketAddr],
    timeout: Duration,
    max_frame_len: u64,
) -> io::Result<Vec<Option<TcpChannel>>> {
    let Some(own) = addrs.get(me) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("party {me} has no address, {} given", addrs.len()),
        ));
    };
    let mut links: Vec<Option<TcpChannel>> = (0..addrs.len()).map(|_| None).collect();
    let listener = TcpListener::bind(own)?;
    for (peer, addr) in addrs.iter().enumerate().take(me) {
        let mut link = TcpChannel::connect(*addr, timeout)?.with_max_frame_len(max_frame_len);
        link.stream.write_all(&(me as u64).to_le_bytes())?;
        links[peer] = Some(link);
    }
    for _ in me + 1..addrs.len() {
        let (mut stream, remote) = listener.accept()?;
        let mut id = [0; 8];
        stream.read_exact(&mut id)?;
        let peer = u64::from_le_bytes(id) as usize;
        if peer <= me || peer >= addrs.len() || links[peer].is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected party id {peer} from {remote}"),
            ));
        }
        debug!(peer, %remote, "accepted connection");
        links[peer] = Some(TcpChannel::new(stream)?.with_max_frame_len(max_frame_len));
    }
    Ok(links)
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn local_mesh_delivers_in_order() -> Result<(), Error> {
        let mut mesh = LocalChannel::mesh(3);
        assert!(mesh[1][1].is_none());
        let mut a = mesh[0][2].take().expect("link exists");
        let mut b = mesh[2][0].take().expect("link exists");
        send_to(&mut a, "first", &vec![1_u64, 2, 3])?;
        send_to(&mut a, "second", &7_u32)?;
        assert_eq!(vec![1_u64, 2, 3], recv_vec_from::<u64, _>(&mut b, "first", 3)?);
        assert_eq!(7_u32, recv_from::<u32, _>(&mut b, "second")?);
        Ok(())
    }

    #[test]
    fn recv_vec_checks_length() {
        let (mut a, mut b) = LocalChannel::pair();
        send_to(&mut a, "vec", &vec![0_u8; 4]).unwrap();
        let err = recv_vec_from::<u8, _>(&mut b, "vec", 5).unwrap_err();
        assert!(matches!(
            err.reason,
            ErrorKind::InvalidLength {
                expected: 5,
                actual: 4
            }
        ));
    }

    #[test]
    fn closed_link_is_an_error() {
        let (a, mut b) = LocalChannel::pair();
        drop(a);
        assert!(recv_from::<u8, _>(&mut b, "closed").is_err());
    }

    #[test]
    fn tcp_framing() -> io::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let server = thread::spawn(move || -> io::Result<Vec<u8>> {
            let (stream, _) = listener.accept()?;
            let mut link = TcpChannel::new(stream)?;
            let msg = link.recv_bytes()?;
            link.send_bytes(msg.iter().rev().copied().collect())?;
            Ok(msg)
        });
        let mut client = TcpChannel::connect(addr, Duration::from_secs(5))?;
        client.send_bytes(vec![1, 2, 3])?;
        assert_eq!(vec![3, 2, 1], client.recv_bytes()?);
        assert_eq!(vec![1, 2, 3], server.join().expect("server thread")?);
        Ok(())
    }

    #[test]
    fn oversized_frame_is_rejected() -> io::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        let server = thread::spawn(move || -> io::Result<Vec<u8>> {
            let (stream, _) = listener.accept()?;
            TcpChannel::new(stream)?.with_max_frame_len(16).recv_bytes()
        });
        let mut client = TcpChannel::connect(addr, Duration::from_secs(5))?;
        client.stream.write_all(&(1_u64 << 40).to_le_bytes())?;
        let err = server.join().expect("server thread").unwrap_err();
        assert_eq!(io::ErrorKind::InvalidData, err.kind());
        Ok(())
    }

    #[test]
    fn tcp_links_reject_missing_own_address() {
        let addrs: Vec<SocketAddr> = vec!["127.0.0.1:0".parse().unwrap()];
        let timeout = Duration::from_millis(10);
        let err = tcp_links(1, &addrs, timeout, DEFAULT_MAX_FRAME_LEN).unwrap_err();
        assert_eq!(io::ErrorKind::InvalidInput, err.kind());
    }
}
