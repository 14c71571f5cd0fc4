// Immutable packet-shape descriptors used by the PacketMatcher.

use std::fmt;
use std::sync::Arc;

use regex::bytes::Regex;
use uuid::Uuid;

use crate::user_info::UserInfo;

/// Caller-supplied evaluator for the predicate and prefix+evaluator forms.
///
/// Boxed and shared by reference so a single evaluator can be cheaply cloned
/// onto descriptor copies (the Rust analogue of a retained Objective-C
/// block).
pub type Evaluator = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

#[derive(Clone)]
enum Decision {
    /// Fixed prefix/suffix shape (covers the fixed and suffix-only forms).
    PrefixSuffix,
    /// Entire candidate data must match `regex`.
    Regex(Arc<Regex>),
    /// Caller-supplied predicate, optionally gated by prefix/suffix
    /// (covers "prefix-only with caller evaluator" and the bare predicate
    /// form).
    Predicate(Evaluator),
}

impl fmt::Debug for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::PrefixSuffix => write!(f, "PrefixSuffix"),
            Decision::Regex(re) => write!(f, "Regex({})", re.as_str()),
            Decision::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

/// Describes one packet shape a [`Port`](crate::port::Port) should recognize
/// in its receive buffer.
///
/// Covers the five shapes from the overview: fixed prefix+suffix,
/// prefix-only with a caller evaluator, suffix-only, regular expression, and
/// arbitrary predicate. Descriptors are value-equal by `uuid`: two
/// descriptors with the same `uuid` are considered the same descriptor
/// regardless of other fields.
#[derive(Clone, Debug)]
pub struct PacketDescriptor {
    uuid: Uuid,
    prefix: Option<Vec<u8>>,
    suffix: Option<Vec<u8>>,
    decision: Decision,
    user_info: UserInfo,
    maximum_packet_length: Option<usize>,
}

impl PartialEq for PacketDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}
impl Eq for PacketDescriptor {}

impl PacketDescriptor {
    fn bare(decision: Decision, prefix: Option<Vec<u8>>, suffix: Option<Vec<u8>>, user_info: UserInfo) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            prefix: prefix.filter(|p| !p.is_empty()),
            suffix: suffix.filter(|s| !s.is_empty()),
            decision,
            user_info,
            maximum_packet_length: None,
        }
    }

    /// Fixed prefix/suffix form. Passing an empty suffix yields a
    /// prefix-only descriptor that still requires a valid prefix match (no
    /// evaluator); passing an empty prefix yields a suffix-only descriptor.
    /// A descriptor with both empty matches nothing (the degenerate case
    /// called out in spec.md §4.3).
    pub fn with_prefix_suffix(
        prefix: impl Into<Vec<u8>>,
        suffix: impl Into<Vec<u8>>,
        user_info: UserInfo,
    ) -> Self {
        Self::bare(Decision::PrefixSuffix, Some(prefix.into()), Some(suffix.into()), user_info)
    }

    /// Regular-expression form. The entire candidate data must match `regex`.
    pub fn with_regex(regex: Regex, user_info: UserInfo) -> Self {
        Self::bare(Decision::Regex(Arc::new(regex)), None, None, user_info)
    }

    /// Arbitrary-predicate form, with no prefix to localize the search.
    pub fn with_predicate(evaluator: Evaluator, user_info: UserInfo) -> Self {
        Self::bare(Decision::Predicate(evaluator), None, None, user_info)
    }

    /// Prefix-only form with a caller evaluator: the matcher locates `prefix`
    /// to anchor the candidate window, and `evaluator` decides when (and
    /// whether) a complete packet has arrived.
    pub fn with_prefix_evaluator(
        prefix: impl Into<Vec<u8>>,
        evaluator: Evaluator,
        user_info: UserInfo,
    ) -> Self {
        Self::bare(Decision::Predicate(evaluator), Some(prefix.into()), None, user_info)
    }

    pub fn with_maximum_packet_length(mut self, max_len: usize) -> Self {
        self.maximum_packet_length = Some(max_len);
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn user_info(&self) -> &UserInfo {
        &self.user_info
    }

    pub fn maximum_packet_length(&self) -> Option<usize> {
        self.maximum_packet_length
    }

    pub fn prefix(&self) -> Option<&[u8]> {
        self.prefix.as_deref()
    }

    pub fn suffix(&self) -> Option<&[u8]> {
        self.suffix.as_deref()
    }

    /// Returns true iff `data` exactly matches this descriptor's shape, per
    /// the three-way dispatch in spec.md §4.3 (generalized to the fifth,
    /// prefix+evaluator, shape from §1).
    pub fn is_valid_packet(&self, data: &[u8]) -> bool {
        match &self.decision {
            Decision::PrefixSuffix => {
                let prefix = self.prefix.as_deref().unwrap_or(&[]);
                let suffix = self.suffix.as_deref().unwrap_or(&[]);
                if prefix.is_empty() && suffix.is_empty() {
                    return false;
                }
                data.len() >= prefix.len() + suffix.len()
                    && data.starts_with(prefix)
                    && data.ends_with(suffix)
            }
            Decision::Regex(re) => re
                .find(data)
                .is_some_and(|m| m.start() == 0 && m.end() == data.len()),
            Decision::Predicate(f) => {
                let prefix_ok = self.prefix.as_deref().is_none_or(|p| data.starts_with(p));
                let suffix_ok = self.suffix.as_deref().is_none_or(|s| data.ends_with(s));
                prefix_ok && suffix_ok && f(data)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_suffix_requires_both_ends() {
        let d = PacketDescriptor::with_prefix_suffix("!", "#", UserInfo::none());
        assert!(d.is_valid_packet(b"!ok#"));
        assert!(!d.is_valid_packet(b"!ok"));
        assert!(!d.is_valid_packet(b"ok#"));
    }

    #[test]
    fn empty_prefix_and_suffix_matches_nothing() {
        let d = PacketDescriptor::with_prefix_suffix("", "", UserInfo::none());
        assert!(!d.is_valid_packet(b""));
        assert!(!d.is_valid_packet(b"anything"));
    }

    #[test]
    fn suffix_only_matches_trailing_bytes() {
        let d = PacketDescriptor::with_prefix_suffix("", "\n", UserInfo::none());
        assert!(d.is_valid_packet(b"PONG\n"));
        assert!(!d.is_valid_packet(b"PONG"));
    }

    #[test]
    fn regex_must_match_entire_data() {
        let re = Regex::new(r"^\?.*#$").unwrap();
        let d = PacketDescriptor::with_regex(re, UserInfo::none());
        assert!(d.is_valid_packet(b"?hi#"));
        assert!(!d.is_valid_packet(b"?hi#trailing"));
    }

    #[test]
    fn predicate_form_delegates_entirely() {
        let d = PacketDescriptor::with_predicate(Arc::new(|data: &[u8]| data.len() == 3), UserInfo::none());
        assert!(d.is_valid_packet(b"abc"));
        assert!(!d.is_valid_packet(b"ab"));
    }

    #[test]
    fn prefix_with_evaluator_requires_both() {
        let d = PacketDescriptor::with_prefix_evaluator("$", Arc::new(|data: &[u8]| data.len() == 4), UserInfo::none());
        assert!(d.is_valid_packet(b"$abc"));
        assert!(!d.is_valid_packet(b"xabc"));
        assert!(!d.is_valid_packet(b"$ab"));
    }

    #[test]
    fn equality_is_by_uuid_not_shape() {
        let a = PacketDescriptor::with_prefix_suffix("!", "#", UserInfo::none());
        let b = a.clone();
        let c = PacketDescriptor::with_prefix_suffix("!", "#", UserInfo::none());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
