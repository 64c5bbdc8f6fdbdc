//! The framework's own housekeeping: settings and on-disk resources.

pub mod resources;
pub mod settings;

pub fn init() {
    resources::init();
    settings::init();
}
