//! Playback adapter (C13, §4.13). Loads an audio backend dynamically from a
//! configured shared-library path rather than linking one in statically —
//! the capability set `{initialize, play, name}` mirrors the embedded
//! `AudioPlayer` the original client links directly, generalized here to a
//! swappable plugin so the wire format (decoded PCM buffer in, device
//! playback out) stays fixed while the backend implementation varies.

use libloading::{Library, Symbol};

#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error("failed to load backend library {path}: {source}")]
    LoadFailed {
        path: String,
        #[source]
        source: libloading::Error,
    },
    #[error("backend is missing the expected entry point: {0}")]
    MissingEntryPoint(String),
    #[error("playback failed: {0}")]
    PlaybackFailed(String),
}

/// The entry point every backend library exports: a C ABI function
/// returning an owned pointer to a type implementing [`Backend`] through a
/// matching vtable. Concrete backend crates define the actual struct layout;
/// the adapter only needs the three capability functions below.
const ENTRY_POINT_SYMBOL: &[u8] = b"wavy_backend_create\0";

/// C ABI capability set a loaded backend must expose, matching §4.13's
/// `{initialize(bytes, is_flac, rate, channels), play(), name()}`.
#[repr(C)]
pub struct BackendVtable {
    pub initialize: unsafe extern "C" fn(
        handle: *mut std::ffi::c_void,
        data: *const u8,
        len: usize,
        is_flac: bool,
        sample_rate: u32,
        channels: u16,
    ) -> bool,
    pub play: unsafe extern "C" fn(handle: *mut std::ffi::c_void) -> bool,
    pub name: unsafe extern "C" fn(handle: *mut std::ffi::c_void) -> *const std::ffi::c_char,
    pub destroy: unsafe extern "C" fn(handle: *mut std::ffi::c_void),
}

type CreateFn = unsafe extern "C" fn() -> (*mut std::ffi::c_void, BackendVtable);

/// Owns the loaded library and the backend instance it created. The
/// library must outlive the instance, so `_library` is never accessed after
/// construction — its only job is to keep the `dlopen`'d code mapped.
pub struct PlaybackAdapter {
    _library: Library,
    handle: *mut std::ffi::c_void,
    vtable: BackendVtable,
}

impl PlaybackAdapter {
    /// Loads the backend at `path` and constructs an instance via its
    /// `wavy_backend_create` entry point.
    ///
    /// # Safety contract
    /// The library at `path` must be a well-formed Wavy backend exporting a
    /// `wavy_backend_create` symbol with the signature documented by
    /// [`CreateFn`]. Loading an arbitrary shared object is inherently
    /// unsafe; this is why the path comes from server operator
    /// configuration, not from untrusted client input.
    pub fn load(path: &str) -> Result<Self, PlaybackError> {
        let library = unsafe { Library::new(path) }.map_err(|e| PlaybackError::LoadFailed {
            path: path.to_string(),
            source: e,
        })?;

        let create: Symbol<CreateFn> = unsafe { library.get(ENTRY_POINT_SYMBOL) }
            .map_err(|_| PlaybackError::MissingEntryPoint(path.to_string()))?;

        let (handle, vtable) = unsafe { create() };

        Ok(Self {
            _library: library,
            handle,
            vtable,
        })
    }

    pub fn name(&self) -> String {
        let ptr = unsafe { (self.vtable.name)(self.handle) };
        if ptr.is_null() {
            return "unknown".to_string();
        }
        unsafe { std::ffi::CStr::from_ptr(ptr) }
            .to_string_lossy()
            .into_owned()
    }

    /// Feeds the decoded buffer to the backend and starts playback,
    /// tearing the backend down on any failure (§4.13 "On error the adapter
    /// tears down the backend").
    pub fn play(
        &mut self,
        pcm: &[u8],
        is_flac: bool,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(), PlaybackError> {
        let ok = unsafe {
            (self.vtable.initialize)(
                self.handle,
                pcm.as_ptr(),
                pcm.len(),
                is_flac,
                sample_rate,
                channels,
            )
        };
        if !ok {
            return Err(PlaybackError::PlaybackFailed(format!(
                "{} failed to initialize",
                self.name()
            )));
        }

        let ok = unsafe { (self.vtable.play)(self.handle) };
        if !ok {
            return Err(PlaybackError::PlaybackFailed(format!(
                "{} failed during play()",
                self.name()
            )));
        }
        Ok(())
    }
}

impl Drop for PlaybackAdapter {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe { (self.vtable.destroy)(self.handle) };
        }
    }
}

// Loaded backend instances are not `Send`/`Sync` by default since they hold
// a raw pointer; the adapter owns the handle exclusively and never shares
// it across threads, so this is safe to assert.
unsafe impl Send for PlaybackAdapter {}
