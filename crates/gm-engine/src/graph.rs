//! Pads and connections
//!
//! A [`Connection`] is a directed edge from an output pad to an input
//! pad, carried out once per block as an ownership transfer of the
//! produced buffer. Buffer policy decides whether the sink receives a
//! share of the producer's memory or its own deep copy.

use gm_core::SampleFormat;

/// Pad direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadDirection {
    In,
    Out,
}

/// A typed port on a node, identified by (node, direction, index).
#[derive(Debug, Clone, PartialEq)]
pub struct Pad {
    pub node: usize,
    pub direction: PadDirection,
    pub index: usize,
    pub format: SampleFormat,
}

/// How a buffer crosses a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPolicy {
    /// Resolve at initialization: ShareDirect when pad formats compare
    /// equal and the sink does not mutate its input in place, DeepCopy
    /// otherwise.
    Auto,
    /// The sink receives a share of the producer's memory.
    ShareDirect,
    /// The sink receives freshly allocated copied memory.
    DeepCopy,
}

impl BufferPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "share" | "share_direct" => Some(Self::ShareDirect),
            "copy" | "deep_copy" => Some(Self::DeepCopy),
            _ => None,
        }
    }
}

/// Directed edge between two pads, by node index
#[derive(Debug, Clone, Copy)]
pub struct Connection {
    pub source_node: usize,
    pub source_pad: usize,
    pub sink_node: usize,
    pub sink_pad: usize,
    pub allow_format_convert: bool,
    /// Policy as configured.
    pub policy: BufferPolicy,
    /// Policy after Auto resolution; never Auto once the graph is
    /// initialized.
    pub resolved: BufferPolicy,
}

impl Connection {
    pub fn new(source_node: usize, source_pad: usize, sink_node: usize, sink_pad: usize) -> Self {
        Self {
            source_node,
            source_pad,
            sink_node,
            sink_pad,
            allow_format_convert: false,
            policy: BufferPolicy::Auto,
            resolved: BufferPolicy::ShareDirect,
        }
    }

    /// Resolve the effective policy given pad equality and the sink's
    /// in-place behavior.
    pub fn resolve_policy(&mut self, formats_equal: bool, sink_mutates: bool) {
        self.resolved = match self.policy {
            BufferPolicy::Auto => {
                if formats_equal && !sink_mutates {
                    BufferPolicy::ShareDirect
                } else {
                    BufferPolicy::DeepCopy
                }
            }
            explicit => explicit,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_policy_resolution() {
        let mut conn = Connection::new(0, 0, 1, 0);
        conn.resolve_policy(true, false);
        assert_eq!(conn.resolved, BufferPolicy::ShareDirect);

        conn.resolve_policy(true, true);
        assert_eq!(conn.resolved, BufferPolicy::DeepCopy);

        conn.resolve_policy(false, false);
        assert_eq!(conn.resolved, BufferPolicy::DeepCopy);
    }

    #[test]
    fn test_explicit_policy_kept() {
        let mut conn = Connection::new(0, 0, 1, 0);
        conn.policy = BufferPolicy::DeepCopy;
        conn.resolve_policy(true, false);
        assert_eq!(conn.resolved, BufferPolicy::DeepCopy);
    }

    #[test]
    fn test_policy_names() {
        assert_eq!(BufferPolicy::from_name("auto"), Some(BufferPolicy::Auto));
        assert_eq!(
            BufferPolicy::from_name("share_direct"),
            Some(BufferPolicy::ShareDirect)
        );
        assert_eq!(
            BufferPolicy::from_name("deep_copy"),
            Some(BufferPolicy::DeepCopy)
        );
        assert_eq!(BufferPolicy::from_name("borrow"), None);
    }
}
