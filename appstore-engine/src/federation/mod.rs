//! # Federation
//!
//! Package exchange between independently operated stores that share no
//! database.
//!
//! - **Pull**: list what a peer offers ([`filter::filter_offers`] drops what
//!   we already have), then download and ingest one offer as a local release.
//! - **Push**: announce a locally tested release to peer inboxes with public
//!   download URLs. Targets are independent; one failing peer never fails
//!   another.
//!
//! Every exchange is appended to the message log. Outbound HTTP goes through
//! [`client::PeerTransport`] and is best-effort.

pub mod client;
pub mod engine;
pub mod filter;
pub mod peers;

pub use self::{
    client::{DownloadKind, HttpPeerTransport, PeerTransport},
    engine::{FederationEngine, PeerOffers, PullRequest, PushResult},
    filter::filter_offers,
    peers::PeerDirectory,
};
