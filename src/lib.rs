//! Ferry - concurrent UDP file transfer.
//!
//! Ferry streams files over a framed datagram protocol with lock-step
//! acknowledgements. One process is a *sender* that chunks a local file into
//! datagrams, the other a *receiver* that demultiplexes streams from many
//! peers onto isolated writer tasks hosted by a work-stealing thread pool.
//!
//! # Architecture
//!
//! - [`frame`]: the packed little-endian wire headers and message-type
//!   bitfield.
//! - [`connection`]: the blocking UDP endpoint with sequence counters and
//!   the ACK discipline.
//! - [`channel`]: bounded and rendezvous channels connecting the dispatcher
//!   to each writer.
//! - [`executor`]: the work-stealing thread pool the writers run on.
//! - [`receiver`]: the dispatch loop and the per-peer file writers.
//! - [`sender`]: the single-threaded client.
//!
//! # Example
//!
//! ```no_run
//! use ferry::{Config, Server};
//!
//! # fn main() -> Result<(), ferry::TransferError> {
//! let config = Config::load_or_create(&"ferry.toml".into())?;
//! let mut server = Server::new(&config.server)?;
//! server.run()?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod frame;
pub mod receiver;
pub mod sender;

pub use channel::Channel;
pub use config::Config;
pub use connection::Connection;
pub use error::TransferError;
pub use executor::ThreadPool;
pub use receiver::Server;
pub use sender::Sender;

// Re-export commonly used types for convenience
pub use bytes;
