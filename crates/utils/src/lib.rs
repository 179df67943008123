//! The inevitable catchall "utils" crate. Generally only add
//! things here that only depend on the standard library and
//! "core" crates.

mod exec;
pub use exec::*;
mod report;
pub use report::*;
mod deps;
pub use deps::*;
pub mod sizes;
mod tracing_util;
pub use tracing_util::*;
