#![forbid(unsafe_code)]

use log::error;
use path_absolutize::Absolutize;
use std::fs;
use std::io;
use std::ops::Deref;
use std::path::Path;

// ***************************************************************************
// GENERAL PUBLIC FUNCTIONS
// ***************************************************************************
// ---------------------------------------------------------------------------
// get_absolute_path:
// ---------------------------------------------------------------------------
/** Expand tilde (~) and environment variables in a path name and return
 * its absolute form.  Unlike canonicalize, absolutize does not require the
 * path to exist.  The original input is returned if any step fails.
 */
pub fn get_absolute_path(path: &str) -> String {
    let expanded = match shellexpand::full(path) {
        Ok(x) => x,
        Err(_) => return path.to_owned(),
    };

    let p = Path::new(expanded.deref());
    match p.absolutize() {
        Ok(abs) => match abs.to_str() {
            Some(s) => s.to_owned(),
            None => path.to_owned(),
        },
        Err(_) => path.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// read_named_file:
// ---------------------------------------------------------------------------
/** Read a file whose absence should stop the server.  The returned error
 * keeps the original kind but names the file.
 */
pub fn read_named_file(path: &str) -> io::Result<Vec<u8>> {
    fs::read(path).map_err(|e| {
        let msg = format!("Unable to read {}: {}", path, e);
        error!("{}", msg);
        io::Error::new(e.kind(), msg)
    })
}
