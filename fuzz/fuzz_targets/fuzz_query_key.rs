#![no_main]

use libfuzzer_sys::fuzz_target;
use sigquery_core::QueryKey;

fuzz_target!(|data: &[u8]| {
    let Ok(segments) = serde_json::from_slice::<Vec<serde_json::Value>>(data) else {
        return;
    };
    let key = QueryKey::new(segments);
    let hash = key.hash();

    assert_eq!(key.clone().hash(), hash);

    // The hash is itself a key. Floats may lose a bit on the way back, so
    // only the shape is compared.
    let reparsed: QueryKey = serde_json::from_str(&hash).expect("hash is valid JSON");
    assert_eq!(reparsed.len(), key.len());
    assert!(key.starts_with(&QueryKey::new(Vec::new())));
});
