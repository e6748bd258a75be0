//! CLI command implementations

pub mod cache;
pub mod circuit;
pub mod config;
pub mod fetch;
pub mod generate;
pub mod runs;

pub use cache::execute as cache;
pub use circuit::execute as circuit;
pub use config::execute as config;
pub use fetch::execute as fetch;
pub use generate::execute as generate;
pub use runs::execute as runs;
