//! Scan progress reporting; compiles to nothing without the `progress` feature

#[cfg(feature = "progress")]
pub use self::bar::ScanProgress;

#[cfg(not(feature = "progress"))]
pub use self::noop::ScanProgress;

#[cfg(feature = "progress")]
mod bar {
    use indicatif::{ProgressBar, ProgressStyle};

    /// Progress over one pass through a data directory.
    ///
    /// Shared by the rayon workers of a scan, so every method takes `&self`.
    pub struct ScanProgress {
        bar: Option<ProgressBar>,
    }

    impl ScanProgress {
        /// A bar counting up to `files` data files
        pub fn new(files: u64) -> Self {
            let bar = ProgressBar::new(files);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")
            {
                bar.set_style(style.progress_chars("=> "));
            }
            Self { bar: Some(bar) }
        }

        /// Reports nothing; used by the server's startup scan
        pub fn hidden() -> Self {
            Self { bar: None }
        }

        /// One data file done
        pub fn file_done(&self, name: &str) {
            if let Some(bar) = &self.bar {
                bar.set_message(name.to_string());
                bar.inc(1);
            }
        }

        pub fn finish(&self) {
            if let Some(bar) = &self.bar {
                bar.finish_and_clear();
            }
        }
    }
}

#[cfg(not(feature = "progress"))]
mod noop {
    pub struct ScanProgress;

    impl ScanProgress {
        pub fn new(_files: u64) -> Self {
            ScanProgress
        }

        pub fn hidden() -> Self {
            ScanProgress
        }

        pub fn file_done(&self, _name: &str) {}

        pub fn finish(&self) {}
    }
}
