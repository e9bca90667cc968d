//! Test utilities: a fully wired engine over in-memory storage, a
//! simulated clock, and the dummy payment provider.

mod harness;

pub use harness::*;
