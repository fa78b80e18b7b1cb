#![no_main]

use libfuzzer_sys::fuzz_target;
use tierenv_catalog::CatalogRecord;

fuzz_target!(|data: &[u8]| {
    // Limit input size to prevent timeout
    if data.len() > 1_000_000 {
        return;
    }

    // Walk every frame in the buffer; decoding must never panic
    let mut offset = 0;
    while let Ok((_, size)) = CatalogRecord::decode(&data[offset..]) {
        offset += size;
    }
});
