// Streaming packet matcher: scans a Port's receive buffer for packets
// described by its registered PacketDescriptors.

use bytes::Bytes;
use uuid::Uuid;

use crate::buffer::Buffer;
use crate::descriptor::PacketDescriptor;

/// One packet delivered by a scan, together with the descriptor it matched.
#[derive(Debug, Clone)]
pub struct PacketMatch {
    pub descriptor: PacketDescriptor,
    pub bytes: Bytes,
}

#[derive(Debug)]
enum Outcome {
    /// A complete packet spans `buffer[start..end]`.
    Packet { start: usize, end: usize },
    /// No complete packet yet for this descriptor alone. `floor` is the
    /// earliest index this descriptor can prove is garbage *for itself*
    /// (e.g. its own prefix occurrence, or one past a prefix occurrence
    /// it just capped out on); bytes before `floor` are never part of a
    /// packet this descriptor could still emit from the current buffer.
    Pending { floor: usize },
}

/// Holds the ordered set of active descriptors for one port and implements
/// the streaming match contract from spec.md §4.4.
#[derive(Debug, Default)]
pub struct PacketMatcher {
    descriptors: Vec<PacketDescriptor>,
}

impl PacketMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor. Registration order is the tie-break order
    /// used when multiple descriptors complete at the same buffer position.
    pub fn register(&mut self, descriptor: PacketDescriptor) {
        self.descriptors.retain(|d| d.uuid() != descriptor.uuid());
        self.descriptors.push(descriptor);
    }

    pub fn unregister(&mut self, uuid: Uuid) {
        self.descriptors.retain(|d| d.uuid() != uuid);
    }

    pub fn descriptors(&self) -> &[PacketDescriptor] {
        &self.descriptors
    }

    /// Evaluates the matching algorithm for one descriptor against the
    /// current buffer contents without mutating it.
    fn find_one(descriptor: &PacketDescriptor, buf: &[u8]) -> Outcome {
        let prefix = descriptor.prefix();
        let suffix = descriptor.suffix();
        let max_len = descriptor.maximum_packet_length();

        let i = match prefix {
            Some(p) if !p.is_empty() => match find_subslice(buf, p) {
                Some(idx) => idx,
                None => {
                    // `p` occurs nowhere in `buf`, but its last `p.len() - 1`
                    // bytes could still become the head of a future
                    // occurrence once more bytes arrive, so only the bytes
                    // strictly before that overlap window are provably
                    // garbage for this descriptor.
                    let floor = buf.len().saturating_sub(p.len().saturating_sub(1));
                    return Outcome::Pending { floor };
                }
            },
            _ => 0,
        };
        let prefix_len = prefix.map(<[u8]>::len).unwrap_or(0);
        let j = i + prefix_len;

        let hard_limit = max_len.map(|m| i + m);
        let upper = hard_limit.unwrap_or(buf.len()).min(buf.len());

        let mut k = j + 1;
        while k <= upper {
            let window = &buf[i..k];
            let suffix_ok = match suffix {
                Some(s) if !s.is_empty() => window.len() >= s.len() && window.ends_with(s),
                _ => true,
            };
            if suffix_ok && descriptor.is_valid_packet(window) {
                return Outcome::Packet { start: i, end: k };
            }
            k += 1;
        }

        let capped = max_len.is_some_and(|m| buf.len() - i >= m);
        if capped {
            // This occurrence of the prefix is a dead end; only it (and
            // whatever precedes it) is garbage for this descriptor, not
            // whatever lies beyond it in the buffer.
            Outcome::Pending { floor: i + 1 }
        } else {
            // Still growing toward a match; nothing before the prefix
            // occurrence is needed, but everything from `i` on might be.
            Outcome::Pending { floor: i }
        }
    }

    /// Scans `buffer`, emitting every complete packet exactly once, in the
    /// order their last byte entered the buffer (ties broken by
    /// registration order), consuming matched/garbage bytes as it goes.
    pub fn scan(&self, buffer: &mut Buffer) -> Vec<PacketMatch> {
        let mut emitted = Vec::new();

        loop {
            let snapshot = buffer.as_slice().to_vec();
            let mut best_packet: Option<(usize, usize, usize)> = None; // (desc_idx, start, end)
            let mut safe_floor: Option<usize> = None;

            for (idx, descriptor) in self.descriptors.iter().enumerate() {
                match Self::find_one(descriptor, &snapshot) {
                    Outcome::Packet { start, end } => {
                        let better = match best_packet {
                            Some((_, _, best_end)) => end < best_end,
                            None => true,
                        };
                        if better {
                            best_packet = Some((idx, start, end));
                        }
                    }
                    Outcome::Pending { floor } => {
                        safe_floor = Some(match safe_floor {
                            Some(f) => f.min(floor),
                            None => floor,
                        });
                    }
                }
            }

            if let Some((idx, start, end)) = best_packet {
                let descriptor = self.descriptors[idx].clone();
                let bytes = Bytes::copy_from_slice(&snapshot[start..end]);
                // Consuming through `end` drops any leading garbage before
                // `start` together with the packet itself, per the "no
                // overlap" rule.
                buffer.consume(end);
                emitted.push(PacketMatch { descriptor, bytes });
                continue;
            }

            // No descriptor completed a packet this round. Discard is only
            // safe up to the bytes *every* registered descriptor agrees are
            // garbage — a descriptor that hit its own `maximum_packet_length`
            // cap must not erase another descriptor's still-pending match
            // window (spec.md §4.4 scopes discard "to the matching
            // descriptor", not to the whole shared buffer).
            match safe_floor {
                Some(floor) if floor > 0 => {
                    buffer.consume(floor);
                    continue;
                }
                _ => break,
            }
        }

        emitted
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::PacketDescriptor;
    use crate::user_info::UserInfo;
    use regex::bytes::Regex;
    use std::sync::Arc;

    fn push_and_scan(matcher: &PacketMatcher, buffer: &mut Buffer, chunk: &[u8]) -> Vec<PacketMatch> {
        buffer.append(chunk);
        matcher.scan(buffer)
    }

    #[test]
    fn scenario_a_suffix_only_across_chunks() {
        let mut matcher = PacketMatcher::new();
        matcher.register(PacketDescriptor::with_prefix_suffix("", "\n", UserInfo::none()));
        let mut buffer = Buffer::new(256);

        let first = push_and_scan(&matcher, &mut buffer, b"PO");
        assert!(first.is_empty());

        let second = push_and_scan(&matcher, &mut buffer, b"NG\n");
        assert_eq!(second.len(), 1);
        assert_eq!(&second[0].bytes[..], b"PONG\n");
    }

    #[test]
    fn scenario_b_two_descriptors_registration_tiebreak() {
        let mut matcher = PacketMatcher::new();
        let a = PacketDescriptor::with_prefix_suffix("!", "#", UserInfo::none());
        let a_uuid = a.uuid();
        matcher.register(a);
        let b = PacketDescriptor::with_regex(Regex::new(r"^\?.*#$").unwrap(), UserInfo::none());
        let b_uuid = b.uuid();
        matcher.register(b);

        let mut buffer = Buffer::new(256);
        let first = push_and_scan(&matcher, &mut buffer, b"!ok#");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].descriptor.uuid(), a_uuid);

        let second = push_and_scan(&matcher, &mut buffer, b"?hi#");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].descriptor.uuid(), b_uuid);
    }

    #[test]
    fn scenario_f_maximum_packet_length_discards_failed_prefix() {
        let descriptor = PacketDescriptor::with_prefix_evaluator("$", Arc::new(|_: &[u8]| false), UserInfo::none())
            .with_maximum_packet_length(3);
        let mut matcher = PacketMatcher::new();
        matcher.register(descriptor);

        let mut buffer = Buffer::new(256);
        let emitted = push_and_scan(&matcher, &mut buffer, b"$ABCDEFG");
        assert!(emitted.is_empty());
        // The failed "$" occurrence and everything the matcher grew through
        // while probing it are gone; nothing is left to retry against.
        assert!(buffer.len() < 8);
    }

    #[test]
    fn capped_descriptor_does_not_erase_another_descriptors_pending_match() {
        let mut matcher = PacketMatcher::new();
        // Z has no cap and is still waiting on its own "Z" suffix.
        let z = PacketDescriptor::with_prefix_suffix("Q", "Z", UserInfo::none());
        let z_uuid = z.uuid();
        matcher.register(z);
        // X caps out on its own failed prefix well past Z's "Q".
        let x = PacketDescriptor::with_prefix_evaluator("$", Arc::new(|_: &[u8]| false), UserInfo::none())
            .with_maximum_packet_length(2);
        matcher.register(x);

        let mut buffer = Buffer::new(256);
        let first = push_and_scan(&matcher, &mut buffer, b"QAAAAAAAAA$AB");
        assert!(first.is_empty());
        // Z's leading "Q" must still be in the buffer for its suffix to
        // ever complete the match, even though X's cap-out touched bytes
        // further along in the same buffer.
        assert!(buffer.as_slice().starts_with(b"Q"));

        let second = push_and_scan(&matcher, &mut buffer, b"CZ");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].descriptor.uuid(), z_uuid);
        assert_eq!(&second[0].bytes[..], b"QAAAAAAAAA$ABCZ");
    }

    #[test]
    fn packets_never_overlap_and_consume_leading_garbage() {
        let mut matcher = PacketMatcher::new();
        matcher.register(PacketDescriptor::with_prefix_suffix("P", "S", UserInfo::none()));
        let mut buffer = Buffer::new(256);

        let emitted = push_and_scan(&matcher, &mut buffer, b"garbagePdataS");
        assert_eq!(emitted.len(), 1);
        assert_eq!(&emitted[0].bytes[..], b"PdataS");
        assert!(buffer.is_empty());
    }

    #[test]
    fn same_descriptor_does_not_rematch_until_next_scan() {
        let mut matcher = PacketMatcher::new();
        matcher.register(PacketDescriptor::with_prefix_suffix("<", ">", UserInfo::none()));
        let mut buffer = Buffer::new(256);

        // Two complete packets delivered in a single chunk both drain in one scan call.
        let emitted = push_and_scan(&matcher, &mut buffer, b"<a><b>");
        assert_eq!(emitted.len(), 2);
        assert_eq!(&emitted[0].bytes[..], b"<a>");
        assert_eq!(&emitted[1].bytes[..], b"<b>");
    }
}
