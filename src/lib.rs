//! Sets up the book framework when the library is loaded into the game process.

use ctor::ctor;
use std::os::raw::c_char;

mod book;
mod hook;
mod logging;
mod meta;
mod tasks;

mod targets {
    #![allow(clippy::unreadable_literal)]

    use super::{c_char, create_soft_target};

    create_soft_target!(game_tick, 0x1001c2b60, fn());

    create_soft_target!(
        set_book_text,
        0x1003f7a18,
        fn(view: usize, book_id: u32, text: *const c_char)
    );

    create_soft_target!(open_book_menu, 0x1003f6e94, fn(u32, *const c_char));
    create_soft_target!(close_book_menu, 0x1003f70bc, fn());

    create_soft_target!(save_game, 0x1002d84f0, fn(*const c_char));
    create_soft_target!(load_game, 0x1002d9134, fn(*const c_char));
    create_soft_target!(new_game, 0x1002d7c28, fn(*const c_char));
}

#[ctor]
fn load() {
    // Load the logging system before everything else so we can log from constructors.
    logging::init();

    if hook::can_hook() {
        log::info!("hook test successful! book framework should work ok");
    } else {
        log::error!("hook test failed! book framework probably won't work - please report this");
    }

    log::info!("Cargo package version is {}", env!("CARGO_PKG_VERSION"));

    log::info!(
        "game ASLR slide is {:#x}",
        crate::hook::get_game_aslr_offset(),
    );

    // Settings and directories first, since everything else reads them.
    meta::init();

    // The main-context task queue must exist before the watcher can post refreshes.
    tasks::init();

    // Load the book systems.
    book::init();
}
