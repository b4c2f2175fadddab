//! Bundled site adapters

mod torznab_feed;

pub use torznab_feed::TorznabFeed;
