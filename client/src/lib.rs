//! # Listsync Client
//!
//! Connects a local [`MergeableStore`](listsync_engine::MergeableStore) to the
//! sync server and keeps it converged with the other replicas of its group.
//!
//! The [`Synchronizer`] owns the connection lifecycle: it fetches a
//! credential, opens a WebSocket for the current group, loads the group's
//! content before pushing anything, then streams changes both ways. Failed
//! attempts are retried with the delays of a [`ReconnectionManager`].
//!
//! ```no_run
//! use listsync_client::{ClientConfig, GroupContext, SharedStore, StaticToken, Synchronizer};
//! use listsync_engine::{MergeableStore, Schema};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SharedStore::new(MergeableStore::new("device-1", Schema::todo_app()));
//! let config = ClientConfig::from_env()?;
//! let handle = Synchronizer::new(
//!     store.clone(),
//!     config,
//!     Arc::new(StaticToken::new("secret")),
//!     Arc::new(GroupContext::new("family")),
//! )
//! .start();
//!
//! store.set_cell("lists", "L1", "title", "Groceries")?;
//! handle.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod provider;
pub mod shared;
pub mod synchronizer;
pub mod transport;

pub use backoff::ReconnectionManager;
pub use config::{ClientConfig, ReconnectConfig};
pub use error::{ConfigError, SyncError};
pub use provider::{GroupContext, GroupProvider, StaticToken, TokenProvider};
pub use shared::SharedStore;
pub use synchronizer::{SyncHandle, SyncState, Synchronizer};
pub use transport::{Connection, Connector, WebSocketConnector};
