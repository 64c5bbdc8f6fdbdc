//! Loading, saving and access for the user's settings.

use std::{
    fs::File,
    io::Read,
    path::PathBuf,
    str::FromStr,
    sync::{Mutex, MutexGuard},
};

use eyre::Result;
use serde::{Deserialize, Serialize};

use crate::book::markup::Alignment;

/// Keys that can be bound to open the debug editor. Stored in the settings file by name so the
/// file stays hand-editable.
#[derive(Clone, Copy, PartialEq, Eq, Debug, strum::Display, strum::EnumString)]
pub enum MenuKey {
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
    F11,
    F12,
}

impl Default for MenuKey {
    fn default() -> Self {
        MenuKey::F10
    }
}

impl Serialize for MenuKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MenuKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;

        // An unrecognised name falls back to the default rather than rejecting the whole file.
        Ok(MenuKey::from_str(&name).unwrap_or_default())
    }
}

/// The user's settings for the framework.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Options {
    /// The font face applied to books that don't carry their own markup.
    pub font_face: String,

    /// The font size applied alongside `font_face`.
    pub font_size: u32,

    /// Paragraph alignment for generated markup.
    #[serde(default)]
    pub alignment: Alignment,

    /// The key that opens the editor overlay.
    #[serde(default)]
    pub menu_key: MenuKey,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            font_face: "$HandwrittenFont".to_string(),
            font_size: 20,
            alignment: Alignment::default(),
            menu_key: MenuKey::default(),
        }
    }
}

impl Options {
    /// Attempts to parse the contents of `reader` to get an `Options` value.
    fn parse_json(reader: impl Read) -> Result<Options> {
        // Coerce with `?`.
        Ok(serde_json::from_reader(reader)?)
    }

    /// Returns a mutex guard around the global options value.
    fn global_mut() -> MutexGuard<'static, Option<Options>> {
        lazy_static::lazy_static! {
            static ref OPTIONS: Mutex<Option<Options>> = Mutex::new(None);
        }

        OPTIONS.lock().expect("Failed to lock options")
    }

    /// Returns a snapshot of the user's current settings. Callers hold on to the snapshot for
    /// the duration of one operation rather than re-reading global state part-way through.
    pub fn get() -> Options {
        Options::global_mut()
            .clone()
            .expect("Settings haven't been loaded yet")
    }

    /// Returns the path of the file that options are saved to.
    fn path() -> PathBuf {
        crate::meta::resources::settings_path()
    }

    /// Looks for a settings file and loads it.
    fn load_from_file() -> Result<Option<Options>> {
        let path = Options::path();

        if !path.exists() {
            // This isn't an error, but we didn't find any settings.
            return Ok(None);
        }

        Ok(Some(Options::parse_json(File::open(path)?)?))
    }

    /// Either loads the settings from disk or generates default values for them.
    fn load() -> Options {
        match Options::load_from_file() {
            Ok(Some(options)) => return options,

            Ok(None) => log::info!("No settings file found. Defaults will be used."),

            Err(err) => {
                log::error!("Error loading settings file: {err:?}. Defaults will be used.")
            }
        };

        Options::default()
    }

    /// Saves the settings to a file, returning any errors encountered.
    fn try_save() -> Result<()> {
        std::fs::write(
            Options::path(),
            serde_json::to_string_pretty(&Options::get())?,
        )?;

        Ok(())
    }

    /// Saves the settings to a file. Errors will be logged.
    pub fn save() {
        if let Err(err) = Options::try_save() {
            log::error!("Error saving options to file: {err:?}.");
        } else {
            log::info!("Settings saved.");
        }
    }

    /// Loads the settings and stores them globally.
    fn init_global() {
        *Options::global_mut() = Some(Options::load());
    }
}

pub fn init() {
    Options::init_global();

    log::info!("Options: {:#?}", Options::get());

    // Write the file straight back so a fresh install ends up with a template to edit.
    if !Options::path().exists() {
        Options::save();
    }
}
