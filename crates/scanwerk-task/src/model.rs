// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Typed, hierarchical in-memory representation of a submitted capture task.
//
// The tree is built strictly append-only in document order by the parser;
// nothing is ever removed once attached. Every node carries its resolved
// exception policy, its vendor scope, and a per-node negotiation status that
// the negotiator updates as the search proceeds.

use scanwerk_core::types::{ExceptionPolicy, NegotiationStatus, VendorScope};

/// Fields shared by every level of the task hierarchy.
#[derive(Debug, Clone)]
pub struct NodeHeader {
    /// Dotted path of this node, e.g. `actions[0].streams[1]`.
    pub path: String,
    pub exception: ExceptionPolicy,
    /// Raw vendor tag as submitted, if any.
    pub vendor: Option<String>,
    pub scope: VendorScope,
    pub status: NegotiationStatus,
    /// Opaque client annotation, preserved but never interpreted.
    pub comment: Option<String>,
}

impl NodeHeader {
    pub fn new(path: String, exception: ExceptionPolicy, vendor: Option<String>, scope: VendorScope) -> Self {
        Self {
            path,
            exception,
            vendor,
            scope,
            status: NegotiationStatus::Ready,
            comment: None,
        }
    }
}

/// Root container: an ordered sequence of actions.
#[derive(Debug, Clone, Default)]
pub struct Task {
    pub actions: Vec<Action>,
}

/// One verb to apply to the device. Only `configure` is defined behaviourally;
/// unknown verbs are tolerated unless their exception policy says `fail`.
#[derive(Debug, Clone)]
pub struct Action {
    pub header: NodeHeader,
    pub verb: String,
    pub streams: Vec<Stream>,
}

/// A candidate capture configuration; an action may list several to be tried
/// in order.
#[derive(Debug, Clone)]
pub struct Stream {
    pub header: NodeHeader,
    pub sources: Vec<Source>,
}

/// A physical capture element to select.
#[derive(Debug, Clone)]
pub struct Source {
    pub header: NodeHeader,
    /// Raw source keyword; `any` when omitted.
    pub name: String,
    pub pixel_formats: Vec<PixelFormatNode>,
}

/// A colour mode to try within a source.
#[derive(Debug, Clone)]
pub struct PixelFormatNode {
    pub header: NodeHeader,
    /// Raw pixel-format keyword; `rgb24` when omitted.
    pub name: String,
    pub attributes: Vec<Attribute>,
}

/// A named device setting with an ordered list of candidate values.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub header: NodeHeader,
    pub name: String,
    pub values: Vec<ValueNode>,
}

/// A literal candidate value for an attribute.
#[derive(Debug, Clone)]
pub struct ValueNode {
    pub header: NodeHeader,
    pub value: serde_json::Value,
}

impl Task {
    /// Resolve every placeholder exception, once, after the full tree is built.
    ///
    /// A placeholder resolves to `NextStream` when a later sibling exists in
    /// its own array and `Ignore` when it is the last element. The resolved
    /// stream-level value is then pushed down to any descendant that still
    /// holds the placeholder (descendants inherited it at parse time).
    pub fn resolve_placeholders(&mut self) {
        let action_count = self.actions.len();
        for (ai, action) in self.actions.iter_mut().enumerate() {
            if action.header.exception == ExceptionPolicy::Unresolved {
                action.header.exception = resolve_by_position(ai, action_count);
            }

            let stream_count = action.streams.len();
            for (si, stream) in action.streams.iter_mut().enumerate() {
                if stream.header.exception == ExceptionPolicy::Unresolved {
                    stream.header.exception = resolve_by_position(si, stream_count);
                }
                let resolved = stream.header.exception.clone();
                stream.push_down_placeholder(&resolved);
            }
        }
    }

    /// Whether any node in the tree still holds the placeholder. Negotiation
    /// must never run on such a tree.
    pub fn has_unresolved(&self) -> bool {
        self.actions.iter().any(|a| {
            a.header.exception == ExceptionPolicy::Unresolved
                || a.streams.iter().any(Stream::has_unresolved)
        })
    }
}

impl Stream {
    fn push_down_placeholder(&mut self, resolved: &ExceptionPolicy) {
        for source in &mut self.sources {
            if source.header.exception == ExceptionPolicy::Unresolved {
                source.header.exception = resolved.clone();
            }
            for pf in &mut source.pixel_formats {
                if pf.header.exception == ExceptionPolicy::Unresolved {
                    pf.header.exception = resolved.clone();
                }
                for attr in &mut pf.attributes {
                    if attr.header.exception == ExceptionPolicy::Unresolved {
                        attr.header.exception = resolved.clone();
                    }
                    for value in &mut attr.values {
                        if value.header.exception == ExceptionPolicy::Unresolved {
                            value.header.exception = resolved.clone();
                        }
                    }
                }
            }
        }
    }

    fn has_unresolved(&self) -> bool {
        if self.header.exception == ExceptionPolicy::Unresolved {
            return true;
        }
        self.sources.iter().any(|s| {
            s.header.exception == ExceptionPolicy::Unresolved
                || s.pixel_formats.iter().any(|pf| {
                    pf.header.exception == ExceptionPolicy::Unresolved
                        || pf.attributes.iter().any(|a| {
                            a.header.exception == ExceptionPolicy::Unresolved
                                || a.values
                                    .iter()
                                    .any(|v| v.header.exception == ExceptionPolicy::Unresolved)
                        })
                })
        })
    }
}

fn resolve_by_position(index: usize, len: usize) -> ExceptionPolicy {
    if index + 1 < len {
        ExceptionPolicy::NextStream
    } else {
        ExceptionPolicy::Ignore
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(exception: ExceptionPolicy) -> NodeHeader {
        NodeHeader::new("test".into(), exception, None, VendorScope::Standard)
    }

    fn bare_stream(exception: ExceptionPolicy) -> Stream {
        Stream {
            header: header(exception),
            sources: Vec::new(),
        }
    }

    #[test]
    fn placeholder_resolves_by_array_position() {
        let mut task = Task {
            actions: vec![Action {
                header: header(ExceptionPolicy::Unresolved),
                verb: "configure".into(),
                streams: vec![
                    bare_stream(ExceptionPolicy::Unresolved),
                    bare_stream(ExceptionPolicy::Unresolved),
                ],
            }],
        };

        task.resolve_placeholders();

        // Sole action: no later sibling, so it resolves to ignore.
        assert_eq!(task.actions[0].header.exception, ExceptionPolicy::Ignore);
        // Stream 0 has a later sibling; stream 1 is last.
        assert_eq!(
            task.actions[0].streams[0].header.exception,
            ExceptionPolicy::NextStream
        );
        assert_eq!(
            task.actions[0].streams[1].header.exception,
            ExceptionPolicy::Ignore
        );
        assert!(!task.has_unresolved());
    }

    #[test]
    fn explicit_exception_is_never_rewritten() {
        let mut task = Task {
            actions: vec![Action {
                header: header(ExceptionPolicy::Fail),
                verb: "configure".into(),
                streams: vec![
                    bare_stream(ExceptionPolicy::Fail),
                    bare_stream(ExceptionPolicy::Unresolved),
                ],
            }],
        };

        task.resolve_placeholders();

        assert_eq!(task.actions[0].header.exception, ExceptionPolicy::Fail);
        assert_eq!(
            task.actions[0].streams[0].header.exception,
            ExceptionPolicy::Fail
        );
        assert_eq!(
            task.actions[0].streams[1].header.exception,
            ExceptionPolicy::Ignore
        );
    }

    #[test]
    fn resolved_stream_value_pushes_down_to_descendants() {
        let source = Source {
            header: header(ExceptionPolicy::Unresolved),
            name: "any".into(),
            pixel_formats: vec![PixelFormatNode {
                header: header(ExceptionPolicy::Unresolved),
                name: "rgb24".into(),
                attributes: vec![Attribute {
                    header: header(ExceptionPolicy::Unresolved),
                    name: "resolution".into(),
                    values: vec![ValueNode {
                        header: header(ExceptionPolicy::Unresolved),
                        value: serde_json::json!(200),
                    }],
                }],
            }],
        };
        let mut task = Task {
            actions: vec![Action {
                header: header(ExceptionPolicy::Ignore),
                verb: "configure".into(),
                streams: vec![
                    Stream {
                        header: header(ExceptionPolicy::Unresolved),
                        sources: vec![source],
                    },
                    bare_stream(ExceptionPolicy::Unresolved),
                ],
            }],
        };

        task.resolve_placeholders();

        let stream = &task.actions[0].streams[0];
        assert_eq!(stream.header.exception, ExceptionPolicy::NextStream);
        let source = &stream.sources[0];
        assert_eq!(source.header.exception, ExceptionPolicy::NextStream);
        assert_eq!(
            source.pixel_formats[0].attributes[0].values[0].header.exception,
            ExceptionPolicy::NextStream
        );
    }
}
