//! Utility modules shared by the commands.
//!
//! - [`progress`] - progress bars that compile away without the `progress` feature

pub mod progress;
