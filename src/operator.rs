mod reconciler;
mod tracker;
mod tracking;
mod watcher;

pub use reconciler::*;
pub use tracker::*;
pub use tracking::*;
pub use watcher::*;
