//! The rendered-content cache and the substitution point in the game's book renderer.
//!
//! When the reading UI opens a book we build its display text (session content run through the
//! markup transform, wrapped in the configured font) and cache it against the book's form ID.
//! Our detour on the game's text call then swaps the cached text in and forwards to the original
//! implementation either way, so the game's own bookkeeping still happens.

use std::{
    collections::HashMap,
    ffi::{CStr, CString},
    os::raw::c_char,
    sync::atomic::{AtomicUsize, Ordering},
    sync::Mutex,
};

use once_cell::sync::Lazy;

use super::markup;
use crate::{call_original, meta::settings::Options};

/// Display text per open book instance. Stored NUL-terminated so the game can consume the
/// pointer directly.
static CACHE: Lazy<Mutex<HashMap<u32, CString>>> = Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Clone)]
struct OpenBook {
    book_id: u32,
    title: String,
}

/// The dynamic book currently open in the reading UI, if any.
static LAST_OPENED: Lazy<Mutex<Option<OpenBook>>> = Lazy::new(|| Mutex::new(None));

/// The view handle from the game's last text call. Needed to push refreshed text into a menu
/// that is already open.
static LAST_VIEW: AtomicUsize = AtomicUsize::new(0);

/// Builds the final display text for a book: raw passthrough if the author asked for it,
/// otherwise generated markup wrapped in the configured font.
fn build_display_text(content: &str, options: &Options) -> String {
    match markup::strip_raw_marker(content) {
        Some(raw) => raw.to_string(),

        None => format!(
            "<font face=\"{}\" size=\"{}\">\n{}</font>",
            options.font_face,
            options.font_size,
            markup::render(content, options.alignment)
        ),
    }
}

/// Resolves `title`, renders its current content and caches it for `book_id`. A title that
/// doesn't resolve isn't a dynamic book: any stale cache entry is evicted and the game's own
/// text gets used.
pub fn prepare_book(book_id: u32, title: &str) {
    let mappings = super::mappings().lock().unwrap();

    match mappings.resolve(title) {
        Some(path) => {
            super::watcher().monitor(title, &path);
            *LAST_OPENED.lock().unwrap() = Some(OpenBook {
                book_id,
                title: title.to_string(),
            });

            let content = super::store().lock().unwrap().full_content(title, &mappings);
            let text = build_display_text(&content, &Options::get());

            match CString::new(text) {
                Ok(text) => {
                    log::info!("prepared and cached content for '{}'", title);
                    CACHE.lock().unwrap().insert(book_id, text);
                }

                Err(_) => {
                    log::error!(
                        "content for '{}' contains a NUL byte; the game's own text will be used",
                        title
                    );
                    CACHE.lock().unwrap().remove(&book_id);
                }
            }
        }

        None => {
            CACHE.lock().unwrap().remove(&book_id);

            let mut last_opened = LAST_OPENED.lock().unwrap();
            if matches!(&*last_opened, Some(open) if open.title.eq_ignore_ascii_case(title)) {
                *last_opened = None;
            }
        }
    }
}

/// Re-renders the open book after its backing file changed on disk, then pushes the new text
/// into the open menu. Runs on the main context via the task queue.
pub fn refresh_open_book(title: &str) {
    let open = LAST_OPENED.lock().unwrap().clone();

    let Some(open) = open else {
        return;
    };

    if !open.title.eq_ignore_ascii_case(title) {
        return;
    }

    log::info!("refreshing open book '{}'", open.title);
    prepare_book(open.book_id, &open.title);

    let view = LAST_VIEW.load(Ordering::SeqCst);
    if view == 0 {
        return;
    }

    let cache = CACHE.lock().unwrap();
    if let Some(text) = cache.get(&open.book_id) {
        // The cache lock stays held here so the pointer remains valid for the whole call.
        call_original!(
            crate::targets::set_book_text,
            view,
            open.book_id,
            text.as_ptr()
        );
    }
}

fn set_book_text(view: usize, book_id: u32, text: *const c_char) {
    LAST_VIEW.store(view, Ordering::SeqCst);

    let cache = CACHE.lock().unwrap();

    let text = match cache.get(&book_id) {
        Some(replacement) => replacement.as_ptr(),
        None => text,
    };

    // Always forward, with our pointer or the game's.
    call_original!(crate::targets::set_book_text, view, book_id, text);
}

fn open_book_menu(book_id: u32, title: *const c_char) {
    if !title.is_null() {
        match unsafe { CStr::from_ptr(title) }.to_str() {
            Ok(title) if !title.is_empty() => prepare_book(book_id, title),
            Ok(_) => {}
            Err(_) => log::warn!("book title is not valid UTF-8; ignoring"),
        }
    }

    call_original!(crate::targets::open_book_menu, book_id, title);
}

fn close_book_menu() {
    if let Some(book) = LAST_OPENED.lock().unwrap().take() {
        log::info!("book menu closing; stopping file watch for '{}'", book.title);
        super::watcher().stop_monitoring(&book.title);
    }

    LAST_VIEW.store(0, Ordering::SeqCst);

    call_original!(crate::targets::close_book_menu);
}

pub fn init() {
    crate::targets::set_book_text::install(set_book_text);
    crate::targets::open_book_menu::install(open_book_menu);
    crate::targets::close_book_menu::install(close_book_menu);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::markup::Alignment;

    fn options() -> Options {
        Options {
            font_face: "$HandwrittenFont".to_string(),
            font_size: 20,
            alignment: Alignment::Left,
            menu_key: Default::default(),
        }
    }

    #[test]
    fn plain_content_is_rendered_and_wrapped() {
        let text = build_display_text("hello there", &options());

        assert_eq!(
            text,
            "<font face=\"$HandwrittenFont\" size=\"20\">\n<p align='left'>hello there</p>\n</font>"
        );
    }

    #[test]
    fn raw_content_bypasses_the_transform() {
        let text = build_display_text(";;RAW_HTML;;\n<b>exactly this</b>", &options());

        assert_eq!(text, "<b>exactly this</b>");
    }
}
