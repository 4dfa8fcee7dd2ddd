//! VCS adapters: a git/gh-backed implementation and a scripted mock for
//! tests.

mod git;
mod mock;

pub use git::GitVcs;
pub use mock::{MockVcs, MockVcsState};
