// Small pieces of updater state that live on disk next to the installed tree.

mod disk_io;
pub mod progress;

pub use progress::{ProgressTracker, UpdateProgress};
