//!
//! Fixtures shared by the unit tests.
//!

/// Subset of the schema a state-history node sends at session start.
pub const SHIP_ABI: &str = include_str!("../tests/data/ship_abi.json");

#[ctor::ctor]
fn init_tests() {
    // capture tracing output from the crate under test (filtered by RUST_LOG)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
