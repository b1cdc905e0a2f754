//! Veil Finder
//!
//! Finds a working forward proxy:
//! - **Listing**: scrape a public proxy table into filtered candidates
//! - **Finder**: sample candidates and validate them against a target until one relays a 200

pub mod finder;
pub mod listing;

pub use finder::*;
pub use listing::*;
