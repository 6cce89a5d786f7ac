//! Request path screening
//!
//! The access chain and the upstream have to agree on which resource a
//! path names. The upstream URL is parsed again before it is sent, which
//! resolves `.` and `..` segments (encoded or not) and treats `\` as a
//! separator, so such paths are rejected outright. Percent-encoding is
//! decoded once and rules are matched against the decoded path; encoded
//! separators and encoded `%` are rejected so no second decode can change
//! it.

use percent_encoding::percent_decode_str;

use crate::error::GatewayError;

/// Encoded sequences that would let a later decode change the path shape.
const BLOCKED_ENCODINGS: &[&str] = &["%2f", "%5c", "%25", "%00"];

/// Validate `raw` and return the decoded path the access rules see.
pub fn canonical_path(raw: &str) -> Result<String, GatewayError> {
    if raw.contains('\\') {
        return Err(rejected("backslash in path"));
    }

    let lower = raw.to_ascii_lowercase();
    if let Some(encoding) = BLOCKED_ENCODINGS.iter().find(|e| lower.contains(*e)) {
        return Err(rejected(&format!("encoded '{encoding}' in path")));
    }

    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| rejected("path is not valid UTF-8"))?;

    if decoded.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(rejected("dot segment in path"));
    }

    Ok(decoded.into_owned())
}

fn rejected(reason: &str) -> GatewayError {
    GatewayError::InvalidRequest(format!("rejected request path: {reason}"))
}
