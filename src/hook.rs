//! Handles finding the loader's detour library, and provides types and macros for using the
//! library to hook game code.

use cached::proc_macro::cached;
use dlopen::symbor::Library;
use eyre::{Result, WrapErr};

fn get_single_symbol<T: Copy>(path: &str, sym_name: &str) -> Result<T> {
    let lib = Library::open(path).wrap_err("Failed to open hooking library")?;
    let symbol =
        unsafe { lib.symbol::<T>(sym_name) }.wrap_err("Unable to find symbol in library")?;
    Ok(*symbol)
}

#[cached(result = true)]
fn get_raw_hook_fn() -> Result<usize> {
    get_single_symbol("libdetour.dylib", "DTRHookFunction")
}

#[cached(result = true)]
fn get_aslr_offset_fn() -> Result<fn(u32) -> usize> {
    get_single_symbol::<fn(image: u32) -> usize>(
        "/usr/lib/system/libdyld.dylib",
        "_dyld_get_image_vmaddr_slide",
    )
}

#[cached]
pub fn get_image_aslr_offset(image: u32) -> usize {
    match get_aslr_offset_fn() {
        Ok(function) => function(image),

        Err(err) => {
            // Without the loader runtime we can't know the slide. Zero keeps address maths
            // usable for diagnostics; the hook self-test already failed by this point anyway.
            log::error!("couldn't load ASLR offset function: {err:?}; assuming a slide of 0");
            0
        }
    }
}

/// Returns the ASLR slide applied to the game image.
pub fn get_game_aslr_offset() -> usize {
    get_image_aslr_offset(0)
}

/// Returns true if the detour library is present and exports the function we need. If this fails,
/// every hook install will fail too, so callers should treat a `false` here as "run degraded".
pub fn can_hook() -> bool {
    get_raw_hook_fn().is_ok()
}

fn get_hook_fn<FuncType>() -> Result<fn(FuncType, FuncType, &mut Option<FuncType>)> {
    let raw = get_raw_hook_fn()?;

    // Reinterpret cast the address to get a function pointer.
    // We get the address as a usize so that it can be cached once and then reused
    //  to get different signatures.
    Ok(unsafe {
        let addr_ptr: *const usize = &raw;
        *(addr_ptr as *const fn(FuncType, FuncType, &mut Option<FuncType>))
    })
}

pub enum Target<FuncType> {
    /// A function pointer.
    _Function(FuncType),

    /// A raw address, to which the ASLR offset for the current image will be applied.
    Address(usize),

    /// A raw address, to which the ASLR offset for the image given as the second parameter will
    /// be applied.
    _ForeignAddress(usize, u32),
}

impl<FuncType> Target<FuncType> {
    fn get_absolute(&self) -> usize {
        match self {
            Target::_Function(func) => unsafe { std::mem::transmute_copy(func) },

            Target::Address(addr) => {
                let aslr_offset = get_image_aslr_offset(0);
                addr + aslr_offset
            }

            Target::_ForeignAddress(addr, image) => {
                let aslr_offset = get_image_aslr_offset(*image);
                addr + aslr_offset
            }
        }
    }

    fn get_as_fn(&self) -> FuncType {
        unsafe { std::mem::transmute_copy(&self.get_absolute()) }
    }

    pub fn hook_soft(&self, replacement: FuncType, original_out: &mut Option<FuncType>) {
        // A missing detour library costs us this hook, not the whole plugin.
        match get_hook_fn::<FuncType>() {
            Ok(hook_fn) => hook_fn(self.get_as_fn(), replacement, original_out),
            Err(err) => log::error!("hook installation skipped: {err:?}"),
        }
    }
}

#[macro_export]
macro_rules! create_soft_target {
    ($name:ident, $addr:literal, $sig:ty) => {
        #[allow(dead_code)]
        pub mod $name {
            #[allow(unused_imports)]
            use super::*;

            const TARGET: crate::hook::Target<$sig> = crate::hook::Target::Address($addr);
            pub static mut ORIGINAL: Option<$sig> = None;

            pub fn install(replacement: $sig) {
                TARGET.hook_soft(replacement, unsafe { &mut ORIGINAL });
            }
        }
    };
}

#[macro_export]
macro_rules! call_original {
    ($hook_module:path) => {{
        use $hook_module as base;
        #[allow(unused_unsafe)]
        unsafe { base::ORIGINAL }.unwrap()()
    }};
    ($hook_module:path, $($args:expr),+) => {{
        // Workaround for $hook_module::x not working - see #48067.
        use $hook_module as base;
        #[allow(unused_unsafe)]
        unsafe { base::ORIGINAL }.unwrap()($($args),+)
    }}
}

pub fn generate_backtrace() -> String {
    // Generate a resolved backtrace. The symbol names aren't always correct, but we
    //  should still display them because they are helpful for Rust functions.
    let resolved = backtrace::Backtrace::new();
    let slide = get_game_aslr_offset() as u64;

    let mut lines = vec![
        format!("ASLR offset for image 0 is {:#x}.", slide),
        "Warning: All addresses will be assumed to be from image 0.".to_string(),
    ];

    for (i, frame) in resolved.frames().iter().enumerate() {
        let address = frame.symbol_address() as u64;

        let string = format!(
            "{}: {:#x} - {:#x} = {:#x}\n  symbols: {:?}",
            i,
            address,
            slide,
            address.wrapping_sub(slide),
            frame.symbols()
        );

        lines.push(string);
    }

    lines.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() {}

    #[test]
    fn missing_detour_library_skips_installation() {
        // Without the detour library an install must log and return, not bring the process down.
        assert!(!can_hook());

        Target::<fn()>::Address(0x1000).hook_soft(noop, &mut None);
    }

    #[test]
    fn aslr_lookup_degrades_without_loader_runtime() {
        // Must not panic even when the slide lookup function can't be loaded.
        let _ = get_game_aslr_offset();

        // The backtrace generator sits on the same path and runs inside the panic hook, so it
        // must survive too.
        let _ = generate_backtrace();
    }
}
