//! The four pipeline roles

mod coder;
mod planner;
mod reviewer;
mod tester;

pub use coder::{Coder, CoderInput, Revision};
pub use planner::Planner;
pub use reviewer::{ReviewInput, Reviewer};
pub use tester::{TestWriter, TestWriterInput, Tester};
