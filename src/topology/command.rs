//! Coordinator → peer command protocol

use super::fencing::Version;
use super::types::string_enum;
use serde::{Deserialize, Serialize};

string_enum! {
    /// Commands the topology coordinator sends to peers to drive a phase
    pub enum CmdKind as "raft_topology_cmd" {
        /// Wait until the peer has applied the coordinator's topology version
        Barrier => "barrier",
        /// Barrier, then wait for requests running against older versions to finish
        BarrierAndDrain => "barrier_and_drain",
        /// Stream this node's share of data; returns when streaming is done
        StreamRanges => "stream_ranges",
        /// Wait until a joining node's address is known to the peer
        WaitForIp => "wait_for_ip",
    }
}

string_enum! {
    pub enum CmdStatus as "command_status" {
        Fail => "fail",
        Success => "success",
    }
}

/// A command together with the topology version the coordinator issued it under
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftTopologyCmd {
    pub cmd: CmdKind,
    pub version: Version,
}

impl RaftTopologyCmd {
    pub fn new(cmd: CmdKind, version: Version) -> Self {
        Self { cmd, version }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaftTopologyCmdResult {
    pub status: CmdStatus,
}

impl RaftTopologyCmdResult {
    pub fn success() -> Self {
        Self {
            status: CmdStatus::Success,
        }
    }

    pub fn fail() -> Self {
        Self {
            status: CmdStatus::Fail,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == CmdStatus::Success
    }
}

impl Default for RaftTopologyCmdResult {
    fn default() -> Self {
        Self::fail()
    }
}
