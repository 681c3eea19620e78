mod import;
mod index;
mod mirror;
mod status;

pub use import::import;
pub use index::{build_manifest, index};
pub use mirror::{run_mirror, RunOutcome};
pub use status::{status, StatusReport};
