pub mod identity;

pub use identity::IdentityStore;

use std::fs;

/// Ensure data directory exists
pub fn ensure_data_dir() -> std::io::Result<()> {
    fs::create_dir_all("data")?;
    Ok(())
}

/// Load this device's participant handle, falling back to an ephemeral one
/// when local storage is unavailable. The chat still works either way; the
/// handle just won't survive a restart.
pub fn load_or_create_identity() -> String {
    if let Err(err) = ensure_data_dir() {
        log::warn!("Cannot create data directory: {err}; using ephemeral identity");
        return identity::generate_handle();
    }
    match IdentityStore::open_default().and_then(|store| store.load_or_create()) {
        Ok(handle) => handle,
        Err(err) => {
            log::error!("Identity storage unavailable: {err}; using ephemeral identity");
            identity::generate_handle()
        }
    }
}
