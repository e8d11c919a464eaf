use std::time::{SystemTime, UNIX_EPOCH};

const HEX: &[u8; 16] = b"0123456789abcdef";
const LOG_PREVIEW_MAX_CHARS: usize = 512;

/// Random lowercase hex string of `len` characters.
pub(crate) fn random_hex(len: usize) -> String {
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        out.push(char::from(HEX[fastrand::usize(..HEX.len())]));
    }
    out
}

#[inline]
pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[inline]
pub(crate) fn unix_now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
        })
}

/// Largest char boundary of `text` that is `<= index`.
#[inline]
pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut boundary = index;
    while !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

/// Cap a wire dump for logging.
pub(crate) fn preview_for_log(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(LOG_PREVIEW_MAX_CHARS)
        .map_or(text.len(), |(index, _)| index);
    &text[..end]
}
