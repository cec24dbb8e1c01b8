use std::fmt;
use url::Url;

/// Where a refresh directive was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveSource {
    /// `Refresh` response header
    Header,
    /// `<meta http-equiv="refresh">` in the document
    Meta,
}

impl fmt::Display for DirectiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectiveSource::Header => write!(f, "header"),
            DirectiveSource::Meta => write!(f, "meta"),
        }
    }
}

/// A request for a follow-up navigation after `delay` seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshDirective {
    pub target: Url,
    pub delay: u64,
    pub source: DirectiveSource,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshParseError {
    #[error("empty refresh directive")]
    Empty,

    #[error("invalid refresh delay '{0}'")]
    InvalidDelay(String),

    #[error("invalid refresh target '{target}': {source}")]
    InvalidTarget {
        target: String,
        #[source]
        source: url::ParseError,
    },
}

/// Parses a refresh value of the form `<seconds>[; url=<target>]`.
///
/// `,` is accepted in place of `;`. The `url=` prefix is optional and case-insensitive,
/// and the target may be quoted. A fractional delay is truncated, a missing delay in front
/// of a separator counts as `0`. Without a target the page refreshes itself (`base`);
/// relative targets are resolved against `base`.
pub fn parse_refresh(value: &str, base: &Url, source: DirectiveSource) -> Result<RefreshDirective, RefreshParseError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RefreshParseError::Empty);
    }

    let (delay_part, target_part) = match value.find([';', ',']) {
        Some(idx) => (value[..idx].trim(), value[idx + 1..].trim()),
        None => (value, ""),
    };

    let delay = parse_delay(delay_part)?;
    let target = parse_target(target_part);

    let target = if target.is_empty() {
        base.clone()
    } else {
        base.join(target).map_err(|e| RefreshParseError::InvalidTarget {
            target: target.to_string(),
            source: e,
        })?
    };

    Ok(RefreshDirective { target, delay, source })
}

fn parse_delay(input: &str) -> Result<u64, RefreshParseError> {
    if input.is_empty() {
        return Ok(0);
    }

    let (whole, fraction) = match input.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (input, ""),
    };

    let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !digits_only(whole) || !digits_only(fraction) || (whole.is_empty() && fraction.is_empty()) {
        return Err(RefreshParseError::InvalidDelay(input.to_string()));
    }

    if whole.is_empty() {
        return Ok(0);
    }
    // Overlong delays saturate instead of failing
    Ok(whole.parse::<u64>().unwrap_or(u64::MAX))
}

fn parse_target(input: &str) -> &str {
    let mut target = input.trim();

    if target.len() >= 3 && target[..3].eq_ignore_ascii_case("url") {
        let rest = target[3..].trim_start();
        if let Some(rest) = rest.strip_prefix('=') {
            target = rest.trim();
        }
    }

    for quote in ['"', '\''] {
        if let Some(inner) = target.strip_prefix(quote) {
            target = inner.strip_suffix(quote).unwrap_or(inner).trim();
            break;
        }
    }

    target
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://a.test/dir/page.html").unwrap()
    }

    fn parse(value: &str) -> Result<RefreshDirective, RefreshParseError> {
        parse_refresh(value, &base(), DirectiveSource::Header)
    }

    #[test]
    fn delay_and_target() {
        let d = parse("5; url=https://b.test/next").unwrap();
        assert_eq!(d.delay, 5);
        assert_eq!(d.target.as_str(), "https://b.test/next");
        assert_eq!(d.source, DirectiveSource::Header);
    }

    #[test]
    fn url_prefix_is_case_insensitive_and_optional() {
        assert_eq!(parse("0;URL=/x").unwrap().target.as_str(), "https://a.test/x");
        assert_eq!(parse("0; Url = other.html").unwrap().target.as_str(), "https://a.test/dir/other.html");
        assert_eq!(parse("0; /bare").unwrap().target.as_str(), "https://a.test/bare");
    }

    #[test]
    fn quotes_and_comma_separator() {
        assert_eq!(parse("1, url='/q'").unwrap().target.as_str(), "https://a.test/q");
        assert_eq!(parse("1;url=\"/dq\"").unwrap().target.as_str(), "https://a.test/dq");
    }

    #[test]
    fn missing_target_refreshes_self() {
        let d = parse("3").unwrap();
        assert_eq!(d.delay, 3);
        assert_eq!(d.target, base());

        let d = parse("2; url=").unwrap();
        assert_eq!(d.target, base());
    }

    #[test]
    fn missing_delay_defaults_to_zero() {
        assert_eq!(parse("; url=/x").unwrap().delay, 0);
    }

    #[test]
    fn fractional_delay_is_truncated() {
        assert_eq!(parse("2.9; url=/x").unwrap().delay, 2);
        assert_eq!(parse(".5").unwrap().delay, 0);
    }

    #[test]
    fn malformed_values() {
        assert_eq!(parse(""), Err(RefreshParseError::Empty));
        assert_eq!(parse("   "), Err(RefreshParseError::Empty));
        assert!(matches!(parse("-1; url=/x"), Err(RefreshParseError::InvalidDelay(_))));
        assert!(matches!(parse("soon; url=/x"), Err(RefreshParseError::InvalidDelay(_))));
        assert!(matches!(parse("."), Err(RefreshParseError::InvalidDelay(_))));
        assert!(matches!(parse("0; url=http://[bad"), Err(RefreshParseError::InvalidTarget { .. })));
    }

    #[test]
    fn huge_delay_saturates() {
        assert_eq!(parse("99999999999999999999999").unwrap().delay, u64::MAX);
    }
}
