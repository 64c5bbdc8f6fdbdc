//! Resolves book titles to the text files that back them.
//!
//! Mappings come from `*.ini` files in the config folder. Each file may carry a `[Books]` section
//! of `Title = filename.txt` pairs, with filenames taken relative to the books folder. A title
//! that doesn't resolve here is simply not a dynamic book.

use std::path::{Path, PathBuf};

use case_insensitive_hashmap::CaseInsensitiveHashMap;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;

// Titles arrive from the game with inconsistent casing, so lookups are case-insensitive.
pub struct MappingTable {
    books: CaseInsensitiveHashMap<PathBuf>,
}

static COMMENT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new("[;#]").unwrap());

impl MappingTable {
    pub fn new() -> MappingTable {
        MappingTable {
            books: CaseInsensitiveHashMap::new(),
        }
    }

    /// Clears the table and rebuilds it from every `.ini` file under `config_dir`. Files are
    /// visited in name order, so a key that appears twice takes its value from the last file.
    pub fn load(&mut self, config_dir: &Path, books_dir: &Path) {
        self.books.clear();

        let entries = match std::fs::read_dir(config_dir) {
            Ok(entries) => entries,

            Err(err) => {
                log::warn!(
                    "Couldn't read config folder {}: {}. No dynamic books will be available.",
                    config_dir.display(),
                    err
                );

                return;
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| {
                let path = entry.ok()?.path();
                matches!(
                    path.extension().and_then(|ext| ext.to_str()),
                    Some("ini")
                )
                .then(|| path)
            })
            .collect();

        paths.sort();

        for path in paths {
            self.load_file(&path, books_dir);
        }

        if self.books.is_empty() {
            log::info!("No book mappings loaded.");
        } else {
            log::info!(
                "Dynamic book titles loaded: {}",
                self.books.keys().map(|key| format!("'{}'", key)).join(", ")
            );
        }
    }

    fn load_file(&mut self, path: &Path, books_dir: &Path) {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,

            Err(err) => {
                log::warn!("Unable to read mapping file {}: {}", path.display(), err);
                return;
            }
        };

        let mut in_books_section = false;

        for line in text.lines() {
            let line = match COMMENT_PATTERN.split(line).next().map(str::trim) {
                Some(line) if !line.is_empty() => line,
                _ => continue,
            };

            if line.starts_with('[') && line.ends_with(']') {
                in_books_section = line.eq_ignore_ascii_case("[Books]");
                continue;
            }

            if !in_books_section {
                continue;
            }

            let (key, value) = match line.split_once('=') {
                Some((key, value)) => (key.trim(), value.trim()),

                None => {
                    log::warn!("Unable to find key and value in line '{}'", line);
                    continue;
                }
            };

            if key.is_empty() || value.is_empty() {
                log::warn!("Skipping mapping line with empty key or value: '{}'", line);
                continue;
            }

            self.books.insert(key, books_dir.join(value));
        }
    }

    /// Returns the backing file for `title`, or `None` if the title isn't a dynamic book.
    pub fn resolve(&self, title: &str) -> Option<PathBuf> {
        self.books.get(title).cloned()
    }

    pub fn len(&self) -> usize {
        self.books.len()
    }

    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }
}

impl Default for MappingTable {
    fn default() -> Self {
        MappingTable::new()
    }
}
