// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Strict hierarchical parser/validator for capture-task documents.
//
// The walk is level by level, outer to inner, using index probing: the
// parent's child array is re-fetched at `[i]` until the index is absent, and
// every element is appended to the model in document order. The first
// failure aborts the parse; a partially-built tree is never patched up.

use serde_json::{Map, Value};
use tracing::{debug, instrument};

use scanwerk_core::types::{ExceptionPolicy, VendorScope};

use crate::error::TaskError;
use crate::model::{
    Action, Attribute, NodeHeader, PixelFormatNode, Source, Stream, Task, ValueNode,
};

/// Plural/singular key pair for each level of the hierarchy, outer to inner.
///
/// A node may carry its own singular key (its identifying field) and the
/// plural key of the level immediately below it. Every other key from this
/// table is a topology violation at that node.
const LEVEL_KEYS: [(&str, &str); 6] = [
    ("actions", "action"),
    ("streams", "stream"),
    ("sources", "source"),
    ("pixelFormats", "pixelFormat"),
    ("attributes", "attribute"),
    ("values", "value"),
];

/// Defaults cascaded from the immediate parent onto nodes that omit them.
#[derive(Debug, Clone)]
struct Inherited {
    exception: ExceptionPolicy,
    vendor: Option<String>,
}

/// Parses and validates capture-task documents against a device identity.
///
/// The two identifiers are used to classify each node's `vendor` tag as
/// standard, device-owned, or unknown; unknown-vendor nodes are opaque
/// extensions exempt from topology checking.
pub struct TaskParser {
    authority_id: String,
    device_id: String,
}

impl TaskParser {
    pub fn new(authority_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            authority_id: authority_id.into(),
            device_id: device_id.into(),
        }
    }

    /// Parse a task document into the typed model.
    ///
    /// On success every placeholder exception has been resolved and every
    /// node's status is `Ready`. On failure, exactly one structured
    /// `TaskError` describes the first problem encountered.
    #[instrument(skip_all, fields(len = text.len()))]
    pub fn parse(&self, text: &str) -> Result<Task, TaskError> {
        let root: Value = serde_json::from_str(text).map_err(|err| {
            let offset = offset_for(text, err.line(), err.column());
            TaskError::syntax(offset, err.to_string())
        })?;

        let Some(root_obj) = root.as_object() else {
            return Err(TaskError::topology("task"));
        };

        // The root knows no singular key; only `actions` is legal here.
        check_topology(root_obj, -1, "task")?;

        let mut task = Task::default();
        let inherited = Inherited {
            // Top-level default is the resolvable placeholder, fixed up by
            // position once the whole tree is built.
            exception: ExceptionPolicy::Unresolved,
            vendor: None,
        };

        child_array(root_obj, "actions", "task")?;
        let mut ai = 0;
        while let Some(raw) = root.get("actions").and_then(|a| a.get(ai)) {
            let path = format!("actions[{ai}]");
            let action = self.parse_action(raw, &path, &inherited)?;
            task.actions.push(action);
            ai += 1;
        }

        task.resolve_placeholders();
        debug!(actions = task.actions.len(), "task parsed");
        Ok(task)
    }

    fn parse_action(&self, raw: &Value, path: &str, inherited: &Inherited) -> Result<Action, TaskError> {
        let obj = as_object(raw, path)?;
        let header = self.node_header(obj, 0, path, inherited)?;
        let verb =
            string_field(obj, "action", path)?.unwrap_or_else(|| "configure".to_owned());

        child_array(obj, "streams", path)?;
        let mut streams = Vec::new();
        let next = Inherited {
            exception: header.exception.clone(),
            vendor: header.vendor.clone(),
        };
        let mut si = 0;
        while let Some(raw_stream) = obj.get("streams").and_then(|s| s.get(si)) {
            let stream_path = format!("{path}.streams[{si}]");
            streams.push(self.parse_stream(raw_stream, &stream_path, &next)?);
            si += 1;
        }

        Ok(Action {
            header,
            verb,
            streams,
        })
    }

    fn parse_stream(&self, raw: &Value, path: &str, inherited: &Inherited) -> Result<Stream, TaskError> {
        let obj = as_object(raw, path)?;
        let header = self.node_header(obj, 1, path, inherited)?;

        child_array(obj, "sources", path)?;
        let mut sources = Vec::new();
        let next = Inherited {
            exception: header.exception.clone(),
            vendor: header.vendor.clone(),
        };
        let mut i = 0;
        while let Some(raw_source) = obj.get("sources").and_then(|s| s.get(i)) {
            let source_path = format!("{path}.sources[{i}]");
            sources.push(self.parse_source(raw_source, &source_path, &next)?);
            i += 1;
        }

        Ok(Stream { header, sources })
    }

    fn parse_source(&self, raw: &Value, path: &str, inherited: &Inherited) -> Result<Source, TaskError> {
        let obj = as_object(raw, path)?;
        let header = self.node_header(obj, 2, path, inherited)?;
        let name = string_field(obj, "source", path)?.unwrap_or_else(|| "any".to_owned());

        child_array(obj, "pixelFormats", path)?;
        let mut pixel_formats = Vec::new();
        let next = Inherited {
            exception: header.exception.clone(),
            vendor: header.vendor.clone(),
        };
        let mut i = 0;
        while let Some(raw_pf) = obj.get("pixelFormats").and_then(|p| p.get(i)) {
            let pf_path = format!("{path}.pixelFormats[{i}]");
            pixel_formats.push(self.parse_pixel_format(raw_pf, &pf_path, &next)?);
            i += 1;
        }

        Ok(Source {
            header,
            name,
            pixel_formats,
        })
    }

    fn parse_pixel_format(
        &self,
        raw: &Value,
        path: &str,
        inherited: &Inherited,
    ) -> Result<PixelFormatNode, TaskError> {
        let obj = as_object(raw, path)?;
        let header = self.node_header(obj, 3, path, inherited)?;
        let name = string_field(obj, "pixelFormat", path)?.unwrap_or_else(|| "rgb24".to_owned());

        child_array(obj, "attributes", path)?;
        let mut attributes = Vec::new();
        let next = Inherited {
            exception: header.exception.clone(),
            vendor: header.vendor.clone(),
        };
        let mut i = 0;
        while let Some(raw_attr) = obj.get("attributes").and_then(|a| a.get(i)) {
            let attr_path = format!("{path}.attributes[{i}]");
            attributes.push(self.parse_attribute(raw_attr, &attr_path, &next)?);
            i += 1;
        }

        Ok(PixelFormatNode {
            header,
            name,
            attributes,
        })
    }

    fn parse_attribute(
        &self,
        raw: &Value,
        path: &str,
        inherited: &Inherited,
    ) -> Result<Attribute, TaskError> {
        let obj = as_object(raw, path)?;
        let header = self.node_header(obj, 4, path, inherited)?;
        let name = string_field(obj, "attribute", path)?.unwrap_or_default();

        child_array(obj, "values", path)?;
        let mut values = Vec::new();
        let next = Inherited {
            exception: header.exception.clone(),
            vendor: header.vendor.clone(),
        };
        let mut i = 0;
        while let Some(raw_value) = obj.get("values").and_then(|v| v.get(i)) {
            let value_path = format!("{path}.values[{i}]");
            values.push(self.parse_value(raw_value, &value_path, &next)?);
            i += 1;
        }

        Ok(Attribute {
            header,
            name,
            values,
        })
    }

    fn parse_value(&self, raw: &Value, path: &str, inherited: &Inherited) -> Result<ValueNode, TaskError> {
        let obj = as_object(raw, path)?;
        let header = self.node_header(obj, 5, path, inherited)?;
        let value = obj.get("value").cloned().unwrap_or(Value::Null);
        Ok(ValueNode { header, value })
    }

    /// Extract the shared node fields, classify the vendor tag, and run the
    /// cross-level topology check (skipped for unknown-vendor nodes).
    fn node_header(
        &self,
        obj: &Map<String, Value>,
        level: isize,
        path: &str,
        inherited: &Inherited,
    ) -> Result<NodeHeader, TaskError> {
        let vendor = string_field(obj, "vendor", path)?.or_else(|| inherited.vendor.clone());
        let scope = VendorScope::classify(vendor.as_deref(), &self.authority_id, &self.device_id);

        // Vendor extensions are opaque: their interior shape is not ours to
        // police.
        if scope.is_known() {
            check_topology(obj, level, path)?;
        }

        let exception = match string_field(obj, "exception", path)? {
            Some(s) => ExceptionPolicy::parse(&s),
            None => inherited.exception.clone(),
        };
        let comment = string_field(obj, "comment", path)?;

        let mut header = NodeHeader::new(path.to_owned(), exception, vendor, scope);
        header.comment = comment;
        Ok(header)
    }
}

/// Verify the node at `level` carries no key belonging to another level.
///
/// Legal at level `n`: the node's own singular key and the plural container
/// of level `n + 1`. The root passes `level = -1` (no singular key of its
/// own, `actions` as its only legal container).
fn check_topology(obj: &Map<String, Value>, level: isize, path: &str) -> Result<(), TaskError> {
    for (li, (plural, singular)) in LEVEL_KEYS.iter().enumerate() {
        let li = li as isize;
        if li != level && obj.contains_key(*singular) {
            return Err(TaskError::topology(format!("{path}.{singular}")));
        }
        if li != level + 1 && obj.contains_key(*plural) {
            return Err(TaskError::topology(format!("{path}.{plural}")));
        }
    }
    Ok(())
}

/// The expected child container must be absent or an array; any other type
/// is a topology violation.
fn child_array(obj: &Map<String, Value>, key: &str, path: &str) -> Result<(), TaskError> {
    match obj.get(key) {
        None | Some(Value::Array(_)) => Ok(()),
        Some(_) => Err(TaskError::topology(format!("{path}.{key}"))),
    }
}

fn as_object<'a>(raw: &'a Value, path: &str) -> Result<&'a Map<String, Value>, TaskError> {
    raw.as_object().ok_or_else(|| TaskError::topology(path))
}

/// Read an optional string field; a present non-string value is a bad value.
fn string_field(obj: &Map<String, Value>, key: &str, path: &str) -> Result<Option<String>, TaskError> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(TaskError::bad_value(
            format!("{path}.{key}"),
            other.to_string(),
        )),
    }
}

/// Approximate byte offset for a 1-based line/column pair from serde_json.
fn offset_for(text: &str, line: usize, column: usize) -> usize {
    let mut offset = 0;
    for (i, l) in text.split('\n').enumerate() {
        if i + 1 == line {
            return offset + column.saturating_sub(1).min(l.len());
        }
        offset += l.len() + 1;
    }
    text.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskErrorCode;

    const AUTHORITY: &str = "211a1e90-11e1-11e5-9493-1697f925ec7b";
    const DEVICE: &str = "f5b4e1a2-8a77-4d52-9c1e-0d2f3a4b5c6d";

    fn parser() -> TaskParser {
        TaskParser::new(AUTHORITY, DEVICE)
    }

    #[test]
    fn parses_nested_task_in_document_order() {
        let text = r#"{"actions":[{"action":"configure","streams":[{"sources":[
            {"source":"feederFront","pixelFormats":[{"pixelFormat":"gray8",
            "attributes":[{"attribute":"resolution","values":[{"value":200},{"value":300}]}]}]}]}]}]}"#;

        let task = parser().parse(text).expect("parse");
        assert_eq!(task.actions.len(), 1);
        let action = &task.actions[0];
        assert_eq!(action.verb, "configure");
        let source = &action.streams[0].sources[0];
        assert_eq!(source.name, "feederFront");
        let pf = &source.pixel_formats[0];
        assert_eq!(pf.name, "gray8");
        let values = &pf.attributes[0].values;
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].value, serde_json::json!(200));
        assert_eq!(values[1].value, serde_json::json!(300));
        assert_eq!(values[0].header.path, "actions[0].streams[0].sources[0].pixelFormats[0].attributes[0].values[0]");
    }

    #[test]
    fn stream_inherits_explicit_action_exception() {
        let text = r#"{"actions":[{"exception":"fail","streams":[{"sources":[{}]}]}]}"#;
        let task = parser().parse(text).expect("parse");
        let stream = &task.actions[0].streams[0];
        assert_eq!(stream.header.exception, ExceptionPolicy::Fail);
        assert_eq!(stream.sources[0].header.exception, ExceptionPolicy::Fail);
    }

    #[test]
    fn default_exception_resolves_by_stream_position() {
        let text = r#"{"actions":[{"streams":[{},{}]}]}"#;
        let task = parser().parse(text).expect("parse");
        let streams = &task.actions[0].streams;
        assert_eq!(streams[0].header.exception, ExceptionPolicy::NextStream);
        assert_eq!(streams[1].header.exception, ExceptionPolicy::Ignore);
        assert!(!task.has_unresolved());
    }

    #[test]
    fn explicit_placeholder_spelling_is_accepted() {
        let text = r#"{"actions":[{"streams":[{"exception":"@nextStreamOrIgnore"},{}]}]}"#;
        let task = parser().parse(text).expect("parse");
        assert_eq!(
            task.actions[0].streams[0].header.exception,
            ExceptionPolicy::NextStream
        );
    }

    #[test]
    fn topology_rejects_singular_at_wrong_depth() {
        // `source` is only legal on a source node, not on an action.
        let text = r#"{"actions":[{"source":"flatbed"}]}"#;
        let err = parser().parse(text).unwrap_err();
        assert_eq!(err.code, TaskErrorCode::Topology);
        assert_eq!(err.key.as_deref(), Some("actions[0].source"));
    }

    #[test]
    fn topology_rejects_plural_at_wrong_depth() {
        // `attributes` belongs under a pixelFormat, not under a source.
        let text = r#"{"actions":[{"streams":[{"sources":[{"attributes":[]}]}]}]}"#;
        let err = parser().parse(text).unwrap_err();
        assert_eq!(err.code, TaskErrorCode::Topology);
        assert_eq!(
            err.key.as_deref(),
            Some("actions[0].streams[0].sources[0].attributes")
        );
    }

    #[test]
    fn topology_checked_at_every_level_pair() {
        // For each level, place a key one level too deep and expect the
        // violation to name the exact dotted path.
        let cases = [
            (r#"{"action":"configure"}"#, "task.action"),
            (r#"{"actions":[{"stream":{}}]}"#, "actions[0].stream"),
            (
                r#"{"actions":[{"streams":[{"streams":[]}]}]}"#,
                "actions[0].streams[0].streams",
            ),
            (
                r#"{"actions":[{"streams":[{"sources":[{"value":1}]}]}]}"#,
                "actions[0].streams[0].sources[0].value",
            ),
            (
                r#"{"actions":[{"streams":[{"sources":[{"pixelFormats":[{"values":[]}]}]}]}]}"#,
                "actions[0].streams[0].sources[0].pixelFormats[0].values",
            ),
            (
                r#"{"actions":[{"streams":[{"sources":[{"pixelFormats":[{"attributes":[{"pixelFormat":"bw1"}]}]}]}]}]}"#,
                "actions[0].streams[0].sources[0].pixelFormats[0].attributes[0].pixelFormat",
            ),
        ];

        for (text, expected_key) in cases {
            let err = parser().parse(text).unwrap_err();
            assert_eq!(err.code, TaskErrorCode::Topology, "doc: {text}");
            assert_eq!(err.key.as_deref(), Some(expected_key), "doc: {text}");
        }
    }

    #[test]
    fn unknown_vendor_node_is_exempt_from_topology() {
        // The same misplaced key that fails for a standard node parses fine
        // when the node belongs to an unknown vendor.
        let text = r#"{"actions":[{"vendor":"acme-imaging","source":"flatbed"}]}"#;
        let task = parser().parse(text).expect("parse");
        assert_eq!(task.actions[0].header.scope, VendorScope::UnknownVendor);
    }

    #[test]
    fn device_owned_vendor_is_still_checked() {
        let text = format!(r#"{{"actions":[{{"vendor":"{DEVICE}","source":"flatbed"}}]}}"#);
        let err = parser().parse(&text).unwrap_err();
        assert_eq!(err.code, TaskErrorCode::Topology);
    }

    #[test]
    fn container_must_be_array() {
        let text = r#"{"actions":[{"streams":{"sources":[]}}]}"#;
        let err = parser().parse(text).unwrap_err();
        assert_eq!(err.code, TaskErrorCode::Topology);
        assert_eq!(err.key.as_deref(), Some("actions[0].streams"));
    }

    #[test]
    fn syntax_error_carries_offset() {
        let text = r#"{"actions": [}"#;
        let err = parser().parse(text).unwrap_err();
        assert_eq!(err.code, TaskErrorCode::Syntax);
        let offset = err.offset.expect("offset");
        assert!(offset >= 12 && offset <= text.len(), "offset {offset}");
    }

    #[test]
    fn non_string_exception_is_a_bad_value() {
        let text = r#"{"actions":[{"exception":5}]}"#;
        let err = parser().parse(text).unwrap_err();
        assert_eq!(err.code, TaskErrorCode::BadValue);
        assert_eq!(err.key.as_deref(), Some("actions[0].exception"));
    }

    #[test]
    fn empty_task_parses_to_no_actions() {
        let task = parser().parse("{}").expect("parse");
        assert!(task.actions.is_empty());
    }

    #[test]
    fn comment_is_preserved_opaquely() {
        let text = r#"{"actions":[{"comment":"duplex first, then simplex","streams":[]}]}"#;
        let task = parser().parse(text).expect("parse");
        assert_eq!(
            task.actions[0].header.comment.as_deref(),
            Some("duplex first, then simplex")
        );
    }
}
