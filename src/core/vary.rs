//! Vary rules and request-header projection.
//!
//! A vary rule is an ordered list of header names declared at write time.
//! Projecting a set of request headers onto a rule yields a [`VariantKey`]:
//! the concrete lookup token that distinguishes stored variants under one
//! cache key. Two requests collide iff every projected value is equal,
//! byte-for-byte. Projection is a pure function of its inputs: no I/O, no
//! blocking.

use http::header::{HeaderMap, HeaderName};

/// The set of header names whose values distinguish variants under one key.
///
/// Header names compare case-insensitively; [`HeaderName`] normalizes to
/// lowercase on construction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct VaryRule {
    names: Vec<HeaderName>,
}

impl VaryRule {
    pub(crate) fn new(names: impl IntoIterator<Item = HeaderName>) -> Self {
        let mut rule = VaryRule { names: Vec::new() };
        for name in names {
            if !rule.names.contains(&name) {
                rule.names.push(name);
            }
        }
        rule
    }

    /// Project request headers onto this rule.
    ///
    /// Every header named by the rule contributes its values (in insertion
    /// order) to the key; a header absent from the request contributes an
    /// empty value, so "no header" is itself a distinct variant.
    pub(crate) fn variant_key(&self, headers: &HeaderMap) -> VariantKey {
        let mut raw = Vec::new();
        for name in &self.names {
            raw.extend_from_slice(name.as_str().as_bytes());
            raw.push(b'=');
            let mut first = true;
            for value in headers.get_all(name) {
                if !first {
                    raw.push(b',');
                }
                first = false;
                raw.extend_from_slice(value.as_bytes());
            }
            // NUL cannot appear in a header name or value, so this separator
            // keeps adjacent fields from running together
            raw.push(b'\0');
        }
        VariantKey(raw)
    }
}

/// A cache key's vary projection: the per-variant half of a resolved identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub(crate) struct VariantKey(Vec<u8>);

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                HeaderName::try_from(*name).unwrap(),
                HeaderValue::try_from(*value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn empty_rule_projects_all_requests_to_one_variant() {
        let rule = VaryRule::default();
        assert_eq!(
            rule.variant_key(&headers(&[("animal", "cat")])),
            rule.variant_key(&headers(&[])),
        );
    }

    #[test]
    fn values_distinguish_variants() {
        let rule = VaryRule::new([HeaderName::from_static("animal")]);
        let cat = rule.variant_key(&headers(&[("animal", "cat")]));
        let dog = rule.variant_key(&headers(&[("animal", "dog")]));
        assert_ne!(cat, dog);
        assert_eq!(cat, rule.variant_key(&headers(&[("animal", "cat")])));
    }

    #[test]
    fn absent_header_is_its_own_variant() {
        let rule = VaryRule::new([HeaderName::from_static("animal")]);
        let absent = rule.variant_key(&headers(&[]));
        let cat = rule.variant_key(&headers(&[("animal", "cat")]));
        assert_ne!(absent, cat);
    }

    #[test]
    fn projection_ignores_headers_outside_the_rule() {
        let rule = VaryRule::new([HeaderName::from_static("animal")]);
        let plain = rule.variant_key(&headers(&[("animal", "cat")]));
        let noisy = rule.variant_key(&headers(&[("animal", "cat"), ("color", "red")]));
        assert_eq!(plain, noisy);
    }

    #[test]
    fn name_matching_is_case_insensitive() {
        let rule = VaryRule::new([HeaderName::from_static("animal")]);
        let lower = rule.variant_key(&headers(&[("animal", "cat")]));
        let upper = rule.variant_key(&headers(&[("Animal", "cat")]));
        assert_eq!(lower, upper);
    }
}
