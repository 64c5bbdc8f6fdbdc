//! Locations of the framework's files on disk.
//!
//! Everything lives under one folder next to the game executable:
//!
//! ```text
//! DynaBook/
//!   config/       mapping files (*.ini, [Books] sections)
//!   books/        backing text files for dynamic books
//!   history.log   master save-lineage log
//!   dynabook.log  plugin log
//! ```

use std::path::PathBuf;

use cached::proc_macro::cached;

#[cached]
fn find_plugin_dir_path() -> PathBuf {
    let mut path = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(std::env::temp_dir);

    path.push("DynaBook");

    if !path.exists() {
        // Can't log here: this runs before logging has a file to write to.
        let _ = std::fs::create_dir_all(&path);
    }

    path
}

pub fn config_dir() -> PathBuf {
    find_plugin_dir_path().join("config")
}

pub fn books_dir() -> PathBuf {
    find_plugin_dir_path().join("books")
}

pub fn history_log_path() -> PathBuf {
    find_plugin_dir_path().join("history.log")
}

pub fn log_path() -> PathBuf {
    find_plugin_dir_path().join("dynabook.log")
}

pub fn panic_path() -> PathBuf {
    find_plugin_dir_path().join("PANIC.txt")
}

pub fn settings_path() -> PathBuf {
    find_plugin_dir_path().join("settings.json")
}

pub fn init() {
    for dir in [config_dir(), books_dir()] {
        if dir.exists() {
            continue;
        }

        log::warn!("{} was not found. It will be created.", dir.display());

        if let Err(err) = std::fs::create_dir_all(&dir) {
            log::error!("Unable to create {}! Error: {}", dir.display(), err);
        }
    }
}
