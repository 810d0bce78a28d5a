//! Hard bounds on user-supplied data and engine retries.

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;
pub const MAX_IMAGE_REF_LEN: usize = 1_024;
pub const MAX_TEXT_QUERY_LEN: usize = 256;

/// Attempts at the load-validate-save cycle before a version conflict is surfaced.
pub const MAX_SAVE_ATTEMPTS: usize = 3;

/// Longest request line accepted by the JSON-lines front end, in bytes.
pub const MAX_REQUEST_LINE_LEN: usize = 64 * 1024;
