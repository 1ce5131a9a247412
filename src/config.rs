//! Rank/thread topology and transport configuration for a sync-core run.
//!
//! Parsed with `structopt`, the same way the reference codebase's own
//! binaries take their configuration, and optionally overlaid with a
//! `serde_json` file for settings that don't fit comfortably on a
//! command line (peer address lists in particular).

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use structopt::StructOpt;

use crate::rank_sync::RankSyncVariant;

/// Selects which [`crate::rank_sync::RankSync`] implementation drives
/// cross-rank exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RankSyncKind {
    Serial,
    Parallel,
}

impl std::str::FromStr for RankSyncKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serial" => Ok(RankSyncKind::Serial),
            "parallel" => Ok(RankSyncKind::Parallel),
            other => Err(format!("unknown rank-sync variant {other:?}, expected \"serial\" or \"parallel\"")),
        }
    }
}

impl From<RankSyncKind> for RankSyncVariant {
    fn from(kind: RankSyncKind) -> Self {
        match kind {
            RankSyncKind::Serial => RankSyncVariant::Serial,
            RankSyncKind::Parallel => RankSyncVariant::Parallel,
        }
    }
}

/// Which [`crate::rank_sync::transport::RankTransport`] backs the
/// cross-rank exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportKind {
    Loopback,
    Tcp,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loopback" => Ok(TransportKind::Loopback),
            "tcp" => Ok(TransportKind::Tcp),
            other => Err(format!("unknown transport {other:?}, expected \"loopback\" or \"tcp\"")),
        }
    }
}

/// Topology and tuning knobs for one rank's synchronization core.
///
/// Every field has a command-line flag; `--config-file` additionally
/// layers a JSON file on top (command-line flags still win, matching
/// the usual precedence of flags over config files).
#[derive(Debug, Clone, StructOpt, Serialize, Deserialize)]
#[structopt(name = "sync-config", about = "Topology and transport for a synchronization-core run")]
pub struct SyncConfig {
    /// Total number of ranks (OS processes) in this run.
    #[structopt(long, default_value = "1")]
    pub num_ranks: u32,

    /// This process's rank id, in `0..num_ranks`.
    #[structopt(long, default_value = "0")]
    pub rank: u32,

    /// Threads per rank.
    #[structopt(long, default_value = "1")]
    pub threads_per_rank: u32,

    /// Global lookahead: the minimum latency across every cross-boundary
    /// link anywhere in the run (spec glossary: "min-partition").
    #[structopt(long, default_value = "1")]
    pub min_part: u64,

    /// Which `RankSync` strategy to use.
    #[structopt(long, default_value = "serial")]
    pub rank_sync: RankSyncKind,

    /// Which `ThreadSync` skip strategy to use.
    #[structopt(long, default_value = "skip-ahead")]
    pub thread_sync_strategy: String,

    /// Which transport backs cross-rank exchange.
    #[structopt(long, default_value = "loopback")]
    pub transport: TransportKind,

    /// For `--transport tcp`: this rank's listen address.
    #[structopt(long)]
    pub listen_addr: Option<SocketAddr>,

    /// For `--transport tcp`: `rank=host:port` peer entries, one per
    /// other rank.
    #[structopt(long)]
    pub peer_addr: Vec<String>,

    /// Overlay these fields from a JSON file before applying the above
    /// command-line flags on top.
    #[structopt(long, parse(from_os_str))]
    pub config_file: Option<PathBuf>,
}

impl SyncConfig {
    /// Parse from `std::env::args`, then overlay `--config-file` (if
    /// given) underneath the parsed flags: JSON-file values fill in
    /// anything the command line left at its default, never the reverse.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::from_args();
        if let Some(path) = config.config_file.clone() {
            let contents = std::fs::read_to_string(&path)?;
            let from_file: Self = serde_json::from_str(&contents)?;
            config = config.overlay(from_file);
        }
        Ok(config)
    }

    /// Merge `base` underneath `self`: every field already at its
    /// `structopt` default is replaced by `base`'s value.
    fn overlay(self, base: Self) -> Self {
        let defaults = Self::from_iter(std::iter::empty::<String>());
        Self {
            num_ranks: if self.num_ranks == defaults.num_ranks { base.num_ranks } else { self.num_ranks },
            rank: if self.rank == defaults.rank { base.rank } else { self.rank },
            threads_per_rank: if self.threads_per_rank == defaults.threads_per_rank {
                base.threads_per_rank
            } else {
                self.threads_per_rank
            },
            min_part: if self.min_part == defaults.min_part { base.min_part } else { self.min_part },
            rank_sync: self.rank_sync,
            thread_sync_strategy: self.thread_sync_strategy,
            transport: self.transport,
            listen_addr: self.listen_addr.or(base.listen_addr),
            peer_addr: if self.peer_addr.is_empty() { base.peer_addr } else { self.peer_addr },
            config_file: self.config_file,
        }
    }

    /// Parse the `rank=host:port` peer entries into a lookup table.
    pub fn peer_addrs(&self) -> anyhow::Result<Vec<(u32, SocketAddr)>> {
        self.peer_addr
            .iter()
            .map(|entry| {
                let (rank, addr) = entry
                    .split_once('=')
                    .ok_or_else(|| anyhow::anyhow!("peer-addr entry {entry:?} is not of the form rank=host:port"))?;
                Ok((rank.parse()?, addr.parse()?))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_flags() {
        let config = SyncConfig::from_iter(["sync-config", "--num-ranks", "4", "--rank", "2"]);
        assert_eq!(config.num_ranks, 4);
        assert_eq!(config.rank, 2);
        assert_eq!(config.rank_sync, RankSyncKind::Serial);
    }

    #[test]
    fn peer_addrs_parses_rank_equals_host_port_entries() {
        let config = SyncConfig::from_iter([
            "sync-config",
            "--peer-addr",
            "1=127.0.0.1:9001",
            "--peer-addr",
            "2=127.0.0.1:9002",
        ]);
        let peers = config.peer_addrs().unwrap();
        assert_eq!(peers, vec![(1, "127.0.0.1:9001".parse().unwrap()), (2, "127.0.0.1:9002".parse().unwrap())]);
    }

    #[test]
    fn overlay_keeps_explicit_flags_over_file_values() {
        let explicit = SyncConfig::from_iter(["sync-config", "--num-ranks", "8"]);
        let from_file = SyncConfig::from_iter(["sync-config", "--num-ranks", "2", "--min-part", "5"]);
        let merged = explicit.overlay(from_file);
        assert_eq!(merged.num_ranks, 8, "explicit flag must win");
        assert_eq!(merged.min_part, 5, "file value fills in an unset flag");
    }
}
