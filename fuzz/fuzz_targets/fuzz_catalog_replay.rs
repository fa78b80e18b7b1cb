#![no_main]

use libfuzzer_sys::fuzz_target;
use std::fs;
use tierenv_catalog::Catalog;

fuzz_target!(|tail: &[u8]| {
    if tail.len() > 64 * 1024 {
        return;
    }
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };

    // A valid log header followed by arbitrary bytes: open must recover
    // whatever prefix is intact and never panic.
    if Catalog::open(dir.path()).is_err() {
        return;
    }
    let log = dir.path().join("CATALOG.log");
    let Ok(mut contents) = fs::read(&log) else {
        return;
    };
    contents.extend_from_slice(tail);
    if fs::write(&log, &contents).is_err() {
        return;
    }

    if let Ok(catalog) = Catalog::open(dir.path()) {
        let _ = catalog.entries();
    }
});
