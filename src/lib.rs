//! Seedium - a reseed server for the I2P anonymity network
//!
//! # Architecture (Pipeline)
//!
//! ```text
//! NetDb directory
//! → NetDb reader (freshness + quality filters)
//! → Bundle builder (sample, zip, sign — fan-out across workers)
//! → Reseed engine cache (atomic snapshot)
//! → Request pipeline (rate limits, UA gate, tokens)
//! → Transport listeners (clearnet TCP/TLS, overlay endpoints)
//! → Client
//! ```
//!
//! ## Core Principles
//!
//! - Rebuilds never block readers; the cache swaps whole snapshots
//! - The same request pipeline serves every transport
//! - External collaborators (router-info parser, overlay transports,
//!   localized homepage) plug in behind traits
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── su3/             # Signed container codec + crypto
//! ├── netdb/           # Router-info directory reader
//! ├── reseed/          # Engine, cache, bundle pipeline
//! ├── server/          # Router, middleware, limits, tokens, blacklist
//! ├── transport/       # Listeners: TCP, TLS, overlay; orchestration
//! └── keys/            # Keystore and certificate factories
//! ```

pub mod config;
pub mod error;

pub mod keys;
pub mod netdb;
pub mod reseed;
pub mod server;
pub mod su3;
pub mod transport;

// Re-exports for convenience
pub use config::Config;
pub use error::{Error, Result};

pub use keys::KeyStore;
pub use netdb::{LocalNetDb, RouterInfoFilter};
pub use reseed::{Peer, Reseeder};
pub use server::{AppState, Blacklist, BrowserUi, RateLimiter, TokenStore};
pub use su3::{SignerCert, Su3File};
pub use transport::{OverlayTransport, ServeListener};
