//! `RankTransport`: the inter-rank communication seam that stands in
//! for `MPI_Isend`/`MPI_Irecv`/`MPI_Waitall`/`MPI_Allreduce` (spec §2.2).
//!
//! No MPI crate exists anywhere in this corpus, so the reference
//! implementation's direct MPI calls are abstracted behind a small trait
//! with two implementations: [`LoopbackTransport`], an in-process
//! stand-in built on `crossbeam-channel` for tests and single-process
//! demos, and [`TcpTransport`], a real point-to-point transport built the
//! way the rest of this crate's ancestry builds its networking --
//! length-prefixed frames over `tokio::net::TcpStream`, bincode-encoded.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::error::{Result, SyncError};

/// Point-to-point and collective operations a `RankSync` implementation
/// needs from the transport layer. Every method blocks the calling
/// (rank-0-of-thread) task until the operation completes, matching the
/// reference's `MPI_Waitall`-then-continue structure -- there is no
/// async overlap opportunity the sync protocols themselves exploit.
#[async_trait::async_trait]
pub trait RankTransport: Send + Sync {
    fn my_rank(&self) -> u32;
    fn num_ranks(&self) -> u32;

    /// Send a raw byte buffer to `dest`, tagged so the receiver can
    /// distinguish message kinds sharing a rank pair (the reference uses
    /// tag 1 for the steady-state batch, tag 2 for an oversized-buffer
    /// resend).
    async fn send(&self, dest: u32, tag: u32, buf: Vec<u8>) -> Result<()>;

    /// Receive the next buffer sent to this rank under `tag` from `src`.
    async fn recv(&self, src: u32, tag: u32) -> Result<Vec<u8>>;

    /// Global minimum across all ranks (used for the next-sync-time
    /// computation, spec §4.5.1).
    async fn allreduce_min(&self, value: u64) -> Result<u64>;

    /// Global maximum across all ranks, elementwise (used for the
    /// end/user/alarm signal triple, spec §5).
    async fn allreduce_max(&self, values: [i32; 3]) -> Result<[i32; 3]>;

    /// Global sum (used for the exit-action reference count, spec §4.9).
    async fn allreduce_sum(&self, value: i64) -> Result<i64>;
}

/// Convenience wrappers that serialize/deserialize through bincode
/// rather than passing raw bytes at every call site.
pub async fn send_value<T: RankTransport + ?Sized>(
    transport: &T,
    dest: u32,
    tag: u32,
    value: &impl Serialize,
) -> Result<()> {
    let buf = bincode::serialize(value).map_err(|source| SyncError::Transport {
        rank: dest,
        source: source.into(),
    })?;
    transport.send(dest, tag, buf).await
}

pub async fn recv_value<T: RankTransport + ?Sized, V: DeserializeOwned>(
    transport: &T,
    src: u32,
    tag: u32,
) -> Result<V> {
    let buf = transport.recv(src, tag).await?;
    bincode::deserialize(&buf).map_err(|source| SyncError::Transport {
        rank: src,
        source: source.into(),
    })
}

/// In-process transport for tests and single-binary demos: every "rank"
/// is a task in the same process, wired together with
/// `crossbeam-channel`s set up once at construction.
pub struct LoopbackTransport {
    my_rank: u32,
    num_ranks: u32,
    senders: HashMap<(u32, u32), crossbeam_channel::Sender<Vec<u8>>>,
    receivers: Mutex<HashMap<(u32, u32), crossbeam_channel::Receiver<Vec<u8>>>>,
    allreduce: Arc<LoopbackAllreduce>,
}

/// A simple rendezvous coordinator shared by every rank's
/// `LoopbackTransport`: each call blocks until every rank has
/// contributed a value, same discipline `MPI_Allreduce` enforces.
struct LoopbackAllreduce {
    num_ranks: u32,
    state: std::sync::Mutex<AllreduceState>,
    cond: std::sync::Condvar,
}

#[derive(Default)]
struct AllreduceState {
    round: u64,
    contributions: Vec<(u64, [i64; 3])>,
}

impl LoopbackAllreduce {
    fn new(num_ranks: u32) -> Self {
        Self {
            num_ranks,
            state: std::sync::Mutex::new(AllreduceState::default()),
            cond: std::sync::Condvar::new(),
        }
    }

    /// Contribute a packed `(min_candidate, [signal_or_sum...])` value
    /// and block until every rank has, then fold with `fold`.
    fn reduce(&self, contribution: (u64, [i64; 3]), fold: impl Fn(&[(u64, [i64; 3])]) -> (u64, [i64; 3])) -> (u64, [i64; 3]) {
        let mut state = self.state.lock().unwrap();
        let my_round = state.round;
        state.contributions.push(contribution);
        if state.contributions.len() as u32 == self.num_ranks {
            self.cond.notify_all();
        } else {
            while state.round == my_round && (state.contributions.len() as u32) < self.num_ranks {
                state = self.cond.wait(state).unwrap();
            }
        }
        let result = fold(&state.contributions);
        // last rank out resets for the next round
        if state.round == my_round {
            state.round += 1;
            state.contributions.clear();
            self.cond.notify_all();
        }
        result
    }
}

impl LoopbackTransport {
    /// Build a fully-connected mesh of `num_ranks` loopback transports,
    /// one per rank, sharing a single allreduce coordinator.
    pub fn mesh(num_ranks: u32) -> Vec<LoopbackTransport> {
        let mut channels = HashMap::new();
        for from in 0..num_ranks {
            for to in 0..num_ranks {
                if from == to {
                    continue;
                }
                for tag in [1u32, 2u32] {
                    let (tx, rx) = crossbeam_channel::unbounded();
                    channels.insert((from, to, tag), (tx, rx));
                }
            }
        }
        let allreduce = Arc::new(LoopbackAllreduce::new(num_ranks));
        (0..num_ranks)
            .map(|rank| {
                let mut senders = HashMap::new();
                let mut receivers = HashMap::new();
                for to in 0..num_ranks {
                    if to == rank {
                        continue;
                    }
                    for tag in [1u32, 2u32] {
                        let (tx, _) = &channels[&(rank, to, tag)];
                        senders.insert((to, tag), tx.clone());
                    }
                }
                for from in 0..num_ranks {
                    if from == rank {
                        continue;
                    }
                    for tag in [1u32, 2u32] {
                        let (_, rx) = &channels[&(from, rank, tag)];
                        receivers.insert((from, tag), rx.clone());
                    }
                }
                LoopbackTransport {
                    my_rank: rank,
                    num_ranks,
                    senders,
                    receivers: Mutex::new(receivers),
                    allreduce: allreduce.clone(),
                }
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl RankTransport for LoopbackTransport {
    fn my_rank(&self) -> u32 {
        self.my_rank
    }

    fn num_ranks(&self) -> u32 {
        self.num_ranks
    }

    async fn send(&self, dest: u32, tag: u32, buf: Vec<u8>) -> Result<()> {
        let sender = self.senders.get(&(dest, tag)).ok_or_else(|| SyncError::Configuration(format!(
            "no loopback channel from rank {} to rank {} tag {tag}",
            self.my_rank, dest
        )))?;
        sender.send(buf).map_err(|source| SyncError::Transport {
            rank: dest,
            source: anyhow::anyhow!(source.to_string()),
        })
    }

    async fn recv(&self, src: u32, tag: u32) -> Result<Vec<u8>> {
        let receiver = {
            let receivers = self.receivers.lock().expect("loopback receivers mutex poisoned");
            receivers
                .get(&(src, tag))
                .cloned()
                .ok_or_else(|| SyncError::Configuration(format!(
                    "no loopback channel from rank {src} to rank {} tag {tag}",
                    self.my_rank
                )))?
        };
        // `Receiver::recv` blocks the OS thread until a peer sends, which
        // would starve a current-thread tokio runtime of every other
        // task (including the peer's own send); push it onto the
        // blocking pool instead of calling it straight from async code.
        tokio::task::spawn_blocking(move || receiver.recv())
            .await
            .map_err(|source| SyncError::Transport { rank: src, source: source.into() })?
            .map_err(|source| SyncError::Transport {
                rank: src,
                source: anyhow::anyhow!(source.to_string()),
            })
    }

    async fn allreduce_min(&self, value: u64) -> Result<u64> {
        let allreduce = self.allreduce.clone();
        let (min, _) = tokio::task::spawn_blocking(move || {
            allreduce.reduce((value, [0; 3]), |contributions| {
                let min = contributions.iter().map(|(v, _)| *v).min().unwrap_or(u64::MAX);
                (min, [0; 3])
            })
        })
        .await
        .map_err(|source| SyncError::Transport { rank: self.my_rank, source: source.into() })?;
        Ok(min)
    }

    async fn allreduce_max(&self, values: [i32; 3]) -> Result<[i32; 3]> {
        let packed = [values[0] as i64, values[1] as i64, values[2] as i64];
        let allreduce = self.allreduce.clone();
        let (_, result) = tokio::task::spawn_blocking(move || {
            allreduce.reduce((0, packed), |contributions| {
                let mut max = [i64::MIN; 3];
                for (_, v) in contributions {
                    for i in 0..3 {
                        max[i] = max[i].max(v[i]);
                    }
                }
                (0, max)
            })
        })
        .await
        .map_err(|source| SyncError::Transport { rank: self.my_rank, source: source.into() })?;
        Ok([result[0] as i32, result[1] as i32, result[2] as i32])
    }

    async fn allreduce_sum(&self, value: i64) -> Result<i64> {
        let allreduce = self.allreduce.clone();
        let (_, result) = tokio::task::spawn_blocking(move || {
            allreduce.reduce((0, [value, 0, 0]), |contributions| {
                let sum = contributions.iter().map(|(_, v)| v[0]).sum();
                (0, [sum, 0, 0])
            })
        })
        .await
        .map_err(|source| SyncError::Transport { rank: self.my_rank, source: source.into() })?;
        Ok(result[0])
    }
}

/// Real cross-process transport: a length-prefixed, bincode-framed TCP
/// connection per rank pair, same framing discipline the rest of this
/// crate's networking uses (a `u64` big-endian length prefix ahead of
/// the payload). Collectives use a star topology rooted at rank 0,
/// since no dedicated collective primitive exists over plain sockets.
pub struct TcpTransport {
    my_rank: u32,
    num_ranks: u32,
    peers: HashMap<u32, SocketAddr>,
    connections: AsyncMutex<HashMap<(u32, u32), TcpStream>>,
    listener: TcpListener,
}

impl TcpTransport {
    pub async fn bind(my_rank: u32, peers: HashMap<u32, SocketAddr>, listen_addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        let num_ranks = peers.len() as u32 + 1;
        Ok(Self {
            my_rank,
            num_ranks,
            peers,
            connections: AsyncMutex::new(HashMap::new()),
            listener,
        })
    }

    async fn connection_for(&self, dest: u32, tag: u32) -> Result<TcpStream> {
        let mut connections = self.connections.lock().await;
        if let Some(stream) = connections.remove(&(dest, tag)) {
            return Ok(stream);
        }
        let addr = *self
            .peers
            .get(&dest)
            .ok_or_else(|| SyncError::Configuration(format!("no known address for rank {dest}")))?;
        TcpStream::connect(addr).await.map_err(|source| SyncError::Transport {
            rank: dest,
            source: source.into(),
        })
    }

    async fn write_frame(stream: &mut TcpStream, buf: &[u8]) -> anyhow::Result<()> {
        stream.write_u64(buf.len() as u64).await?;
        stream.write_all(buf).await?;
        Ok(())
    }

    async fn read_frame(stream: &mut TcpStream) -> anyhow::Result<Vec<u8>> {
        let len = stream.read_u64().await? as usize;
        let mut buf = vec![0; len];
        stream.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

#[async_trait::async_trait]
impl RankTransport for TcpTransport {
    fn my_rank(&self) -> u32 {
        self.my_rank
    }

    fn num_ranks(&self) -> u32 {
        self.num_ranks
    }

    async fn send(&self, dest: u32, tag: u32, buf: Vec<u8>) -> Result<()> {
        let mut stream = self.connection_for(dest, tag).await?;
        Self::write_frame(&mut stream, &buf).await.map_err(|source| SyncError::Transport { rank: dest, source })?;
        self.connections.lock().await.insert((dest, tag), stream);
        Ok(())
    }

    async fn recv(&self, src: u32, _tag: u32) -> Result<Vec<u8>> {
        let (mut stream, _) = self.listener.accept().await.map_err(|err| SyncError::Transport {
            rank: src,
            source: err.into(),
        })?;
        Self::read_frame(&mut stream).await.map_err(|source| {
            if matches!(source.downcast_ref::<std::io::Error>().map(std::io::Error::kind), Some(ErrorKind::UnexpectedEof)) {
                warn!(src, "peer closed connection mid-frame");
            }
            SyncError::Transport { rank: src, source }
        })
    }

    /// Rank 0 collects every rank's value over the same connections used
    /// for steady-state traffic, folds, and broadcasts the result back.
    async fn allreduce_min(&self, value: u64) -> Result<u64> {
        if self.my_rank == 0 {
            let mut min = value;
            for rank in 1..self.num_ranks {
                let v: u64 = recv_value(self, rank, 9).await?;
                min = min.min(v);
            }
            for rank in 1..self.num_ranks {
                send_value(self, rank, 9, &min).await?;
            }
            Ok(min)
        } else {
            send_value(self, 0, 9, &value).await?;
            recv_value(self, 0, 9).await
        }
    }

    async fn allreduce_max(&self, values: [i32; 3]) -> Result<[i32; 3]> {
        if self.my_rank == 0 {
            let mut max = values;
            for rank in 1..self.num_ranks {
                let v: [i32; 3] = recv_value(self, rank, 10).await?;
                for i in 0..3 {
                    max[i] = max[i].max(v[i]);
                }
            }
            for rank in 1..self.num_ranks {
                send_value(self, rank, 10, &max).await?;
            }
            Ok(max)
        } else {
            send_value(self, 0, 10, &values).await?;
            recv_value(self, 0, 10).await
        }
    }

    async fn allreduce_sum(&self, value: i64) -> Result<i64> {
        if self.my_rank == 0 {
            let mut sum = value;
            for rank in 1..self.num_ranks {
                let v: i64 = recv_value(self, rank, 11).await?;
                sum += v;
            }
            for rank in 1..self.num_ranks {
                send_value(self, rank, 11, &sum).await?;
            }
            Ok(sum)
        } else {
            send_value(self, 0, 11, &value).await?;
            recv_value(self, 0, 11).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_point_to_point_roundtrips() {
        let mut ranks = LoopbackTransport::mesh(2);
        let rank1 = ranks.pop().unwrap();
        let rank0 = ranks.pop().unwrap();

        let sender = tokio::spawn(async move { rank0.send(1, 1, vec![1, 2, 3]).await });
        let received = rank1.recv(0, 1).await.unwrap();
        sender.await.unwrap().unwrap();
        assert_eq!(received, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn loopback_allreduce_min_converges_across_ranks() {
        let ranks = LoopbackTransport::mesh(3);
        let mut handles = Vec::new();
        for (i, rank) in ranks.into_iter().enumerate() {
            let input = [50u64, 10, 30][i];
            handles.push(tokio::spawn(async move { rank.allreduce_min(input).await.unwrap() }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 10);
        }
    }

    #[tokio::test]
    async fn loopback_allreduce_max_is_elementwise() {
        let ranks = LoopbackTransport::mesh(2);
        let mut handles = Vec::new();
        for (i, rank) in ranks.into_iter().enumerate() {
            let input = [[1, 0, 0], [0, 1, 1]][i];
            handles.push(tokio::spawn(async move { rank.allreduce_max(input).await.unwrap() }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), [1, 1, 1]);
        }
    }

    #[tokio::test]
    async fn loopback_allreduce_sum_adds_every_ranks_contribution() {
        let ranks = LoopbackTransport::mesh(3);
        let mut handles = Vec::new();
        for rank in ranks {
            handles.push(tokio::spawn(async move { rank.allreduce_sum(1).await.unwrap() }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 3);
        }
    }
}
