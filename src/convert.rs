//! Convenient conversion traits.
//
// These traits make the builder APIs feel a little bit more like using a
// dynamically-typed language: methods take `impl ToHeaderName` rather than
// `HeaderName` so that a variety of types can be used as arguments without
// burdening the end user with explicit conversions.
//
// Like [`std::convert::TryInto`] but without an associated error type: a
// failed conversion panics. The documentation for each trait describes which
// conversions can fail; prefer explicit conversions with error handling when
// the source value is untrusted.

use std::collections::{BTreeMap, HashMap};

use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Types that can be converted to a [`HeaderName`].
///
/// Conversions from strings or bytes panic if the value is not a valid HTTP
/// header name; use [`HeaderName::try_from()`] for a non-panicking
/// conversion.
pub trait ToHeaderName {
    /// Perform the conversion.
    fn into_header_name(self) -> HeaderName;
}

impl ToHeaderName for HeaderName {
    fn into_header_name(self) -> HeaderName {
        self
    }
}

impl ToHeaderName for &HeaderName {
    fn into_header_name(self) -> HeaderName {
        self.clone()
    }
}

impl ToHeaderName for &str {
    fn into_header_name(self) -> HeaderName {
        HeaderName::try_from(self).expect("invalid HTTP header name")
    }
}

impl ToHeaderName for String {
    fn into_header_name(self) -> HeaderName {
        self.as_str().into_header_name()
    }
}

impl ToHeaderName for &String {
    fn into_header_name(self) -> HeaderName {
        self.as_str().into_header_name()
    }
}

/// Types that can be converted to a [`HeaderValue`].
///
/// Conversions from strings or bytes panic if the value is not a valid HTTP
/// header value; use [`HeaderValue::try_from()`] for a non-panicking
/// conversion.
pub trait ToHeaderValue {
    /// Perform the conversion.
    fn into_header_value(self) -> HeaderValue;
}

impl ToHeaderValue for HeaderValue {
    fn into_header_value(self) -> HeaderValue {
        self
    }
}

impl ToHeaderValue for &HeaderValue {
    fn into_header_value(self) -> HeaderValue {
        self.clone()
    }
}

impl ToHeaderValue for &str {
    fn into_header_value(self) -> HeaderValue {
        HeaderValue::try_from(self).expect("invalid HTTP header value")
    }
}

impl ToHeaderValue for String {
    fn into_header_value(self) -> HeaderValue {
        self.as_str().into_header_value()
    }
}

impl ToHeaderValue for &String {
    fn into_header_value(self) -> HeaderValue {
        self.as_str().into_header_value()
    }
}

impl ToHeaderValue for &[u8] {
    fn into_header_value(self) -> HeaderValue {
        HeaderValue::try_from(self).expect("invalid HTTP header value")
    }
}

/// Types that can provide a full set of request headers for vary matching.
///
/// This is the single adapter through which all of the accepted header
/// representations are normalized: a pair list, a string-keyed mapping, or an
/// [`HeaderMap`] are all reduced to the same ordered collection before any
/// vary projection happens.
pub trait ToHeaderSource {
    /// Perform the conversion.
    fn into_header_map(self) -> HeaderMap;
}

impl ToHeaderSource for HeaderMap {
    fn into_header_map(self) -> HeaderMap {
        self
    }
}

impl ToHeaderSource for &HeaderMap {
    fn into_header_map(self) -> HeaderMap {
        self.clone()
    }
}

impl ToHeaderSource for Vec<(String, String)> {
    fn into_header_map(self) -> HeaderMap {
        pairs_to_map(self.into_iter())
    }
}

impl ToHeaderSource for &[(&str, &str)] {
    fn into_header_map(self) -> HeaderMap {
        pairs_to_map(self.iter().copied())
    }
}

impl<const N: usize> ToHeaderSource for [(&str, &str); N] {
    fn into_header_map(self) -> HeaderMap {
        pairs_to_map(self.into_iter())
    }
}

impl ToHeaderSource for HashMap<String, String> {
    fn into_header_map(self) -> HeaderMap {
        pairs_to_map(self.into_iter())
    }
}

impl ToHeaderSource for BTreeMap<String, String> {
    fn into_header_map(self) -> HeaderMap {
        pairs_to_map(self.into_iter())
    }
}

fn pairs_to_map<N, V>(pairs: impl Iterator<Item = (N, V)>) -> HeaderMap
where
    N: ToHeaderName,
    V: ToHeaderValue,
{
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.append(name.into_header_name(), value.into_header_value());
    }
    map
}
