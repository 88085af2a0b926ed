//! Proximity channel grouping engine.
//!
//! Keeps entities that are transitively in contact on one named channel:
//! groups merge when contact begins and split when it ends. Channel naming,
//! the merge/split tie-breaks and per-channel token fetches all live here.
//!
//! Zero I/O: every event returns a [`Step`] describing the transport
//! intents, presence notifications, token fetches and replication deltas
//! the runtime must carry out.

pub mod connectivity;
pub mod constants;
pub mod delta;
pub mod directory;
pub mod error;
pub mod graph;
pub mod ids;
pub mod naming;
pub mod reactor;
pub mod snapshot;
pub mod token;

pub use connectivity::{ComponentId, ConnectivityTracker, Merge, Split};
pub use constants::{DEFAULT_CHANNEL_NAME_LEN, DEFAULT_CHANNEL_PREFIX, SNAPSHOT_VERSION};
pub use delta::{DirectoryDelta, DirectoryMirror};
pub use directory::{Channel, ChannelDirectory, MemberRemoval, MergeOutcome, SplitOutcome};
pub use error::{DirectoryError, ReactorError, SnapshotError};
pub use graph::ContactGraph;
pub use ids::{ChannelId, EntityId, Token};
pub use naming::{ChannelNamer, NamingStrategy};
pub use reactor::{Intent, Presence, Reactor, Step, TokenFailure};
pub use snapshot::{Snapshot, export_json, import_json};
pub use token::{Completion, FetchTicket, TokenCoordinator, TokenRequest, TokenStatus};
