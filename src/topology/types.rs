//! Identifiers and the enum vocabulary of the topology.
//!
//! Every enum has one canonical string form, used both for display and for the
//! persisted representation. Parsing is strict: an unknown string is an error
//! carrying the offending value, never a default.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Declares a fieldless enum together with its canonical string table.
///
/// Generates `as_str`, `ALL`, `Display`, a strict `FromStr`, and serde support
/// that goes through the same strings.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident as $kind:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            /// Every variant, in declaration order
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Canonical string form
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text, )+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::errors::ParseEnumError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err($crate::errors::ParseEnumError::new($kind, other)),
                }
            }
        }

        impl ::std::convert::TryFrom<String> for $name {
            type Error = $crate::errors::ParseEnumError;

            fn try_from(s: String) -> ::std::result::Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl ::std::convert::From<$name> for String {
            fn from(value: $name) -> String {
                value.as_str().to_string()
            }
        }
    };
}

pub(crate) use string_enum;

/// Globally unique, immutable identity of a cluster member (its group0 server id)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    /// Generate a fresh random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for NodeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of the session that guards long-running operations such as streaming.
///
/// The nil uuid means "no session".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

string_enum! {
    /// Lifecycle stage of a single node
    pub enum NodeState as "node_state" {
        /// Joined group0 but owns no tokens yet
        None => "none",
        Bootstrapping => "bootstrapping",
        Decommissioning => "decommissioning",
        Removing => "removing",
        Replacing => "replacing",
        Rebuilding => "rebuilding",
        Normal => "normal",
        Left => "left",
        /// Rolling back a failed decommission or removenode
        RollbackToNormal => "rollback_to_normal",
    }
}

string_enum! {
    /// Node-targeted membership request.
    ///
    /// Declaration order is the admission priority: when several requests are
    /// queued, the smallest one (by `Ord`) starts first. The order minimises
    /// cleanup work, e.g. a replace runs before a join so tokens are not
    /// reassigned twice.
    pub enum TopologyRequest as "topology_request" {
        Replace => "replace",
        Join => "join",
        Remove => "remove",
        Leave => "leave",
        Rebuild => "rebuild",
    }
}

string_enum! {
    /// Cluster-wide request not tied to a particular node
    pub enum GlobalTopologyRequest as "global_topology_request" {
        NewCdcGeneration => "new_cdc_generation",
        Cleanup => "cleanup",
    }
}

string_enum! {
    /// Whether a node holds data it no longer owns
    pub enum CleanupStatus as "cleanup_status" {
        Clean => "clean",
        Needed => "needed",
        Running => "running",
    }
}

string_enum! {
    /// Global phase of an in-flight topology operation
    pub enum TransitionState as "transition_state" {
        JoinGroup0 => "join group0",
        CommitCdcGeneration => "commit cdc generation",
        TabletDraining => "tablet draining",
        WriteBothReadOld => "write both read old",
        WriteBothReadNew => "write both read new",
        TabletMigration => "tablet migration",
        LeftTokenRing => "left token ring",
    }
}

impl NodeState {
    /// States in which a node sits in `transition_nodes`
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            NodeState::Bootstrapping
                | NodeState::Decommissioning
                | NodeState::Removing
                | NodeState::Replacing
                | NodeState::Rebuilding
                | NodeState::RollbackToNormal
        )
    }

    /// Transitioning states that keep the ring the node owned while it was normal
    pub fn retains_ring(&self) -> bool {
        matches!(
            self,
            NodeState::Decommissioning
                | NodeState::Removing
                | NodeState::Rebuilding
                | NodeState::RollbackToNormal
        )
    }
}

impl TopologyRequest {
    /// Node state a request puts its target in once the operation starts
    pub fn operation_state(&self) -> NodeState {
        match self {
            TopologyRequest::Replace => NodeState::Replacing,
            TopologyRequest::Join => NodeState::Bootstrapping,
            TopologyRequest::Remove => NodeState::Removing,
            TopologyRequest::Leave => NodeState::Decommissioning,
            TopologyRequest::Rebuild => NodeState::Rebuilding,
        }
    }

    /// Global phase entered when the operation starts
    pub fn initial_transition_state(&self) -> Option<TransitionState> {
        match self {
            TopologyRequest::Replace | TopologyRequest::Join => Some(TransitionState::JoinGroup0),
            TopologyRequest::Remove | TopologyRequest::Leave => {
                Some(TransitionState::WriteBothReadOld)
            }
            TopologyRequest::Rebuild => None,
        }
    }
}

impl TransitionState {
    /// Phases that exist only while a node operation is in flight
    pub fn is_node_phase(&self) -> bool {
        matches!(
            self,
            TransitionState::JoinGroup0
                | TransitionState::TabletDraining
                | TransitionState::WriteBothReadOld
                | TransitionState::WriteBothReadNew
                | TransitionState::LeftTokenRing
        )
    }

    /// Whether the global phase may move from `from` to `to` (`None` = quiescent).
    pub fn can_advance(from: Option<TransitionState>, to: Option<TransitionState>) -> bool {
        use TransitionState::*;
        match (from, to) {
            (None, None) => false,
            // Node phases start with the node operation itself
            (None, Some(next)) => matches!(next, CommitCdcGeneration | TabletMigration),
            (Some(JoinGroup0), next) => matches!(next, Some(CommitCdcGeneration) | Some(WriteBothReadOld)),
            (Some(CommitCdcGeneration), next) => matches!(next, Some(WriteBothReadOld) | None),
            (Some(TabletDraining), next) => matches!(next, Some(WriteBothReadOld) | None),
            (Some(WriteBothReadOld), next) => matches!(next, Some(WriteBothReadNew)),
            (Some(WriteBothReadNew), next) => {
                matches!(next, Some(TabletMigration) | Some(LeftTokenRing) | None)
            }
            (Some(TabletMigration), next) | (Some(LeftTokenRing), next) => next.is_none(),
        }
    }
}
