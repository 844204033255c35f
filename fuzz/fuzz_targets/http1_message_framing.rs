#![no_main]

use std::time::{Duration, UNIX_EPOCH};

use libfuzzer_sys::fuzz_target;

use cellproxy::proxy::http::{HttpMessage, READ_MORE};

fuzz_target!(|data: &[u8]| {
    // First byte picks the chunk size so split separators and chunk terminators get exercised.
    let Some((&split, body)) = data.split_first() else {
        return;
    };
    let chunk = usize::from(split).max(1);

    let mut incremental = HttpMessage::default();
    for piece in body.chunks(chunk) {
        incremental.append(piece);
        let complete = incremental.is_complete();
        let hint = incremental.remaining_hint();
        if complete {
            assert_eq!(hint, 0);
        } else {
            assert!(hint > 0 || hint == READ_MORE);
        }
        let _ = incremental.status_code();
        let _ = incremental.host();
    }

    let whole = HttpMessage::from(body);
    assert_eq!(whole.as_bytes(), incremental.as_bytes());
    assert_eq!(whole.has_head(), incremental.has_head());
    assert_eq!(whole.is_complete(), incremental.is_complete());

    if whole.has_head() {
        let stamp = UNIX_EPOCH + Duration::from_secs(u64::from(split) * 86_400);
        let conditional = whole
            .with_conditional_header(stamp)
            .expect("head present");
        assert!(conditional.header("If-Modified-Since").is_some());
        assert_eq!(conditional.body(), whole.body());
    }
});
