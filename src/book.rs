//! Everything to do with dynamic books: title mapping, the session store, the markup transform,
//! file watching and the display cache. This module owns the long-lived instances and wires them
//! together; the submodules stay constructible on their own so they can be tested in isolation.

pub mod api;
pub mod display;
pub mod mapping;
pub mod markup;
pub mod session;
pub mod watcher;

use std::{sync::Mutex, time::Duration};

use once_cell::sync::Lazy;

use mapping::MappingTable;
use session::SessionStore;
use watcher::FileWatcher;

/// Session identifier used from startup until the game reports a real load.
const MAIN_MENU_SESSION: &str = "MainMenu";

const WATCH_INTERVAL: Duration = Duration::from_secs(1);

// Lock order for the paths that need both: mappings before store.
static MAPPINGS: Lazy<Mutex<MappingTable>> = Lazy::new(|| Mutex::new(MappingTable::new()));

static STORE: Lazy<Mutex<SessionStore>> = Lazy::new(|| {
    Mutex::new(SessionStore::new(crate::meta::resources::history_log_path()))
});

static WATCHER: Lazy<FileWatcher> = Lazy::new(|| {
    FileWatcher::new(WATCH_INTERVAL, |key| {
        // The watcher thread must never touch game state itself; bounce onto the main context.
        let title = key.to_string();
        crate::tasks::enqueue(move || display::refresh_open_book(&title));
    })
});

pub fn mappings() -> &'static Mutex<MappingTable> {
    &MAPPINGS
}

pub fn store() -> &'static Mutex<SessionStore> {
    &STORE
}

pub fn watcher() -> &'static FileWatcher {
    &WATCHER
}

/// Rebuilds the title table from the config folder. Also reachable at runtime through the
/// [`api::MSG_RELOAD_MAPPINGS`] message.
pub fn reload_mappings() {
    MAPPINGS.lock().unwrap().load(
        &crate::meta::resources::config_dir(),
        &crate::meta::resources::books_dir(),
    );
}

pub fn init() {
    reload_mappings();

    // Until a real load comes through, entries are buffered against the main menu session.
    STORE.lock().unwrap().on_load(MAIN_MENU_SESSION);

    WATCHER.start();

    display::init();
    api::init();
}
