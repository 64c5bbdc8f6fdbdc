//! The messaging surface other plugins use to talk to us, plus the save/load lifecycle detours
//! that drive the session store.

use std::ffi::CStr;

use libc::c_char;

use crate::call_original;

/// `"DBFA"` as a big-endian tag. Append an entry to a book's pending buffer.
pub const MSG_APPEND_ENTRY: u32 = u32::from_be_bytes(*b"DBFA");

/// `"DBFR"` as a big-endian tag. Re-read the mapping files from disk. Carries no payload.
pub const MSG_RELOAD_MAPPINGS: u32 = u32::from_be_bytes(*b"DBFR");

/// Envelope delivered by the loader's messaging bus. Layout is shared with every other plugin, so
/// it must not change.
#[repr(C)]
pub struct PluginMessage {
    pub msg_type: u32,
    pub data_len: u32,
    pub data: *mut std::ffi::c_void,
}

/// Payload for [`MSG_APPEND_ENTRY`]. Both pointers are NUL-terminated strings owned by the
/// sender, valid only for the duration of the call.
#[repr(C)]
pub struct AppendEntryPayload {
    pub book_title: *const c_char,
    pub text: *const c_char,
}

/// Entry point the loader calls with messages other plugins send to us.
///
/// # Safety
/// `message` must point to a valid [`PluginMessage`] whose `data` matches `msg_type` as
/// documented, or be null.
#[no_mangle]
pub unsafe extern "C" fn dynabook_handle_message(message: *const PluginMessage) {
    if message.is_null() {
        log::warn!("received a null API message");
        return;
    }

    handle_message(&*message);
}

fn handle_message(message: &PluginMessage) {
    match message.msg_type {
        MSG_APPEND_ENTRY => handle_append_entry(message),

        MSG_RELOAD_MAPPINGS => {
            log::info!("reloading book mappings at another plugin's request");
            super::reload_mappings();
        }

        other => log::warn!("ignoring API message with unknown type {:#010x}", other),
    }
}

fn handle_append_entry(message: &PluginMessage) {
    // A size mismatch means the sender built the payload against a different layout. Touching it
    // would read garbage, so the message is dropped whole.
    if message.data.is_null() || message.data_len as usize != std::mem::size_of::<AppendEntryPayload>() {
        log::error!(
            "rejecting append message: payload is {} bytes, expected {}",
            message.data_len,
            std::mem::size_of::<AppendEntryPayload>()
        );

        return;
    }

    let payload = unsafe { &*(message.data as *const AppendEntryPayload) };

    let (Some(title), Some(text)) = (read_str(payload.book_title), read_str(payload.text)) else {
        log::error!("rejecting append message: null or non-UTF-8 string in payload");
        return;
    };

    super::store().lock().unwrap().append_entry(title, text);
}

fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }

    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

fn save_game(name: *const c_char) {
    match read_str(name) {
        Some(name) => {
            let mappings = super::mappings().lock().unwrap();
            super::store().lock().unwrap().on_save(name, &mappings);
        }

        None => log::warn!("save fired without a usable save name; nothing persisted"),
    }

    call_original!(crate::targets::save_game, name);
}

fn load_game(name: *const c_char) {
    match read_str(name) {
        Some(name) => super::store().lock().unwrap().on_load(name),
        None => log::warn!("load fired without a usable save name; session state unchanged"),
    }

    call_original!(crate::targets::load_game, name);
}

fn new_game(name: *const c_char) {
    // A fresh game has no save file yet. The sentinel keeps pending entries buffered until the
    // first real save names the session.
    let session = read_str(name).unwrap_or("NewGame");
    super::store().lock().unwrap().on_load(session);

    call_original!(crate::targets::new_game, name);
}

pub fn init() {
    crate::targets::save_game::install(save_game);
    crate::targets::load_game::install(load_game);
    crate::targets::new_game::install(new_game);
}
