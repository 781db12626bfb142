//! Conveyor State
//!
//! This crate provides the per-run [`ExecutionContext`] and the helpers the
//! engine uses to address values inside it:
//! - Dot/bracket address parsing (`Reports.Daily[2].Total`)
//! - Resolution against global state with node-state fallback
//! - Mutation that creates intermediate containers on demand
//! - The HTTP cookie jar kept under `Cookies` in global state
//! - Staging root and staging file resolution with traversal rejection
//!
//! Absence is a normal outcome here. Nothing in this crate returns an
//! error: unresolvable addresses come back as `None`.

mod address;
mod context;
mod staging;

pub use address::{Segment, parse_address, resolve_in, resolve_value, set_in};
pub use context::{COOKIES_KEY, ExecutionContext, StateMap, merge_state};
pub use staging::StagingResolver;
