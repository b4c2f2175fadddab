//! In-process test doubles
//!
//! Public rather than test-gated so integration tests and downstream
//! crates can drive pipelines against scripted responses instead of
//! live sites.

mod demo_site;
mod transport;

pub use demo_site::{
    DemoRow, DemoTracker, account_page, empty_results_page, logged_out_page, login_rejected_page,
    results_page,
};
pub use transport::{MockResponse, MockTransport};
