//! Shared helpers for the integration tests.

use stackjit::{parse_listing, Listing};
use std::path::Path;

pub fn load(name: &str) -> Listing {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/listings")
        .join(name);
    let text = std::fs::read_to_string(&path).expect("listing exists");
    parse_listing(&text).expect("listing parses")
}
