//! Caller identity derivation.
//!
//! Limiters treat identities as opaque strings. These helpers build them the
//! way request handlers do: from proxy headers for anonymous traffic, or from
//! the authenticated user id.

/// Identity used when no client address can be found.
pub const UNKNOWN_CLIENT: &str = "unknown";

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Derive a client identity from request headers.
///
/// Takes the first entry of `X-Forwarded-For`, then `X-Real-IP`, then falls
/// back to [`UNKNOWN_CLIENT`]. Header names are matched case-insensitively.
pub fn client_identity<'a, I>(headers: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut forwarded = None;
    let mut real_ip = None;

    for (name, value) in headers {
        if forwarded.is_none() && name.eq_ignore_ascii_case(FORWARDED_FOR) {
            forwarded = value.split(',').next().map(str::trim).filter(|v| !v.is_empty());
        } else if real_ip.is_none() && name.eq_ignore_ascii_case(REAL_IP) {
            real_ip = Some(value.trim()).filter(|v| !v.is_empty());
        }
    }

    forwarded.or(real_ip).unwrap_or(UNKNOWN_CLIENT).to_string()
}

/// Identity for an authenticated user.
pub fn user_identity(user_id: &str) -> String {
    format!("user:{}", user_id)
}
