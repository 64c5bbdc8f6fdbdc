//! Watches the backing files of open books for edits made outside the game.
//!
//! One background thread polls modification times at a fixed interval. It never touches the
//! content cache or the UI itself: when a file changes, it fires the refresh callback it was
//! constructed with, and the composition root routes that through [`crate::tasks`] onto the main
//! context.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread::JoinHandle,
    time::{Duration, SystemTime},
};

#[derive(Clone)]
struct WatchedFile {
    path: PathBuf,

    /// `None` when the file didn't exist the last time we looked.
    last_write: Option<SystemTime>,
}

struct Shared {
    files: Mutex<HashMap<String, WatchedFile>>,
    stop: AtomicBool,
}

pub struct FileWatcher {
    shared: Arc<Shared>,
    interval: Duration,
    refresh: Arc<dyn Fn(&str) + Send + Sync>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl FileWatcher {
    /// Creates a watcher that calls `refresh` with the book key whenever that book's file gains a
    /// newer modification time. The watcher does nothing until [`FileWatcher::start`] is called.
    pub fn new(interval: Duration, refresh: impl Fn(&str) + Send + Sync + 'static) -> FileWatcher {
        FileWatcher {
            shared: Arc::new(Shared {
                files: Mutex::new(HashMap::new()),
                stop: AtomicBool::new(false),
            }),
            interval,
            refresh: Arc::new(refresh),
            thread: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut thread = self.thread.lock().unwrap();

        if thread.is_some() {
            log::warn!("start() called, but the watcher thread is already running");
            return;
        }

        log::info!("starting file watcher thread");

        self.shared.stop.store(false, Ordering::SeqCst);

        let shared = self.shared.clone();
        let refresh = self.refresh.clone();
        let interval = self.interval;

        *thread = Some(std::thread::spawn(move || {
            watch_loop(&shared, &refresh, interval);
        }));
    }

    /// Requests cancellation and joins the watcher thread. Safe to call when not running.
    pub fn stop(&self) {
        let handle = self.thread.lock().unwrap().take();

        if let Some(handle) = handle {
            log::info!("stopping file watcher thread");
            self.shared.stop.store(true, Ordering::SeqCst);

            if handle.join().is_err() {
                log::error!("watcher thread panicked before it could be joined");
            }
        }
    }

    /// Begins (or restarts) watching `path` under `key`. Watching a file that doesn't exist yet
    /// is fine; it will be picked up when it appears.
    pub fn monitor(&self, key: &str, path: &Path) {
        let last_write = modification_time(path);

        if last_write.is_none() {
            log::info!(
                "monitoring '{}' at {}, which doesn't exist yet",
                key,
                path.display()
            );
        } else {
            log::info!("monitoring '{}' at {}", key, path.display());
        }

        self.shared.files.lock().unwrap().insert(
            key.to_string(),
            WatchedFile {
                path: path.to_path_buf(),
                last_write,
            },
        );
    }

    pub fn stop_monitoring(&self, key: &str) {
        if self.shared.files.lock().unwrap().remove(key).is_some() {
            log::info!("stopped monitoring '{}'", key);
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn modification_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

fn watch_loop(shared: &Shared, refresh: &Arc<dyn Fn(&str) + Send + Sync>, interval: Duration) {
    loop {
        std::thread::sleep(interval);

        if shared.stop.load(Ordering::SeqCst) {
            break;
        }

        // Snapshot under the lock, then do the filesystem checks without it.
        let snapshot: Vec<(String, WatchedFile)> = shared
            .files
            .lock()
            .unwrap()
            .iter()
            .map(|(key, info)| (key.clone(), info.clone()))
            .collect();

        for (key, info) in snapshot {
            let current = match modification_time(&info.path) {
                Some(time) => time,

                // Missing file: skip until it reappears or monitoring is cancelled.
                None => continue,
            };

            let changed = match info.last_write {
                Some(last) => current > last,
                None => true,
            };

            if !changed {
                continue;
            }

            log::info!("detected change in {}", info.path.display());

            {
                let mut files = shared.files.lock().unwrap();
                if let Some(entry) = files.get_mut(&key) {
                    entry.last_write = Some(current);
                }
            }

            refresh(&key);
        }
    }

    log::info!("watcher thread loop has finished");
}
