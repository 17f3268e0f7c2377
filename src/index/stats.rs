use super::header::{self, HeaderStatus};
use super::index_path_for;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Index state of one data file
#[derive(Debug, Clone)]
pub struct FileStats {
    pub name: String,
    pub data_len: u64,
    pub index_len: Option<u64>,
    pub status: HeaderStatus,
}

/// Data files in `dir` whose name ends with `data_suffix`, sorted by name
pub fn data_files(dir: &Path, data_suffix: &str) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        if name.ends_with(data_suffix) && entry.file_type()?.is_file() {
            files.push((name, entry.path()));
        }
    }
    files.sort();
    Ok(files)
}

pub fn collect_stats(dir: &Path, data_suffix: &str, index_suffix: &str) -> Result<Vec<FileStats>> {
    let mut stats = Vec::new();
    for (name, path) in data_files(dir, data_suffix)? {
        let data_len = fs::metadata(&path)?.len();
        let index_path = index_path_for(&path, index_suffix);
        let index_len = fs::metadata(&index_path).ok().map(|m| m.len());
        let status = header::inspect(&index_path, data_len)?;
        stats.push(FileStats {
            name,
            data_len,
            index_len,
            status,
        });
    }
    Ok(stats)
}

/// Display index statistics
pub fn show_stats(dir: &Path, data_suffix: &str, index_suffix: &str) -> Result<()> {
    let stats = collect_stats(dir, data_suffix, index_suffix)?;

    println!("Index Statistics");
    println!("================");
    println!();
    println!("Directory:        {}", dir.display());
    println!("Data files:       {}", stats.len());
    println!(
        "Indexed:          {}",
        stats.iter().filter(|s| s.status.is_valid()).count()
    );
    println!();

    let mut total_data = 0;
    let mut total_index = 0;
    for file in &stats {
        total_data += file.data_len;
        total_index += file.index_len.unwrap_or(0);
        let ratio = match file.index_len {
            Some(index) if file.data_len > 0 => format!("{:.2}x", index as f64 / file.data_len as f64),
            _ => "-".to_string(),
        };
        println!(
            "  {:30} {:>12} {:>12} {:>7}  {}",
            file.name,
            format_size(file.data_len),
            file.index_len.map_or_else(|| "-".to_string(), format_size),
            ratio,
            file.status.describe()
        );
    }

    println!();
    println!("Data size:        {}", format_size(total_data));
    println!("Index size:       {}", format_size(total_index));

    Ok(())
}

/// Format byte size to human readable
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
