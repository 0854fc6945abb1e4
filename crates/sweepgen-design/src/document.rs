//! Structured configuration documents and the edit operations applied to them.
//!
//! Documents are trees held as [`serde_json::Value`] with an object root:
//! objects are named nodes, scalar members are attributes, and object or
//! array members are children. A [`Delta`] is an ordered list of [`EditOp`]s
//! addressed by [`NodePath`]s relative to the document root.

use std::fmt::{self, Display};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sweepgen_core::errors::{ErrorInfo, SweepError};

/// On-disk encoding of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Detects the format from a file extension; `None` for non-documents.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Some(DocumentFormat::Json),
            Some("yaml") | Some("yml") => Some(DocumentFormat::Yaml),
            _ => None,
        }
    }

    /// File extension used for outputs in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentFormat::Json => "json",
            DocumentFormat::Yaml => "yaml",
        }
    }

    /// Parses a document whose root must be an object node.
    pub fn parse(&self, bytes: &[u8]) -> Result<Value, String> {
        let value: Value = match self {
            DocumentFormat::Json => serde_json::from_slice(bytes).map_err(|err| err.to_string())?,
            DocumentFormat::Yaml => serde_yaml::from_slice(bytes).map_err(|err| err.to_string())?,
        };
        if !value.is_object() {
            return Err("document root must be a mapping of named nodes".to_string());
        }
        Ok(value)
    }

    /// Encodes any serializable payload in this format.
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SweepError> {
        match self {
            DocumentFormat::Json => {
                let mut bytes = serde_json::to_vec_pretty(value).map_err(|err| {
                    SweepError::Serde(ErrorInfo::new("document.json_encode", err.to_string()))
                })?;
                bytes.push(b'\n');
                Ok(bytes)
            }
            DocumentFormat::Yaml => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|err| {
                    SweepError::Serde(ErrorInfo::new("document.yaml_encode", err.to_string()))
                }),
        }
    }
}

/// One step of a [`NodePath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

/// Location of a node relative to the document root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodePath(Vec<PathSegment>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Parses a slash separated pointer such as `/model/parameters/iseed`.
    ///
    /// Every segment is treated as an object key; `~1` and `~0` unescape to
    /// `/` and `~`.
    pub fn parse_pointer(pointer: &str) -> Self {
        let segments = pointer
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| PathSegment::Key(segment.replace("~1", "/").replace("~0", "~")))
            .collect();
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child_key(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self(segments)
    }

    pub fn child_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    fn split_last(&self) -> Option<(&[PathSegment], &PathSegment)> {
        self.0.split_last().map(|(last, parent)| (parent, last))
    }
}

impl Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.0 {
            match segment {
                PathSegment::Index(index) => write!(f, "/{index}")?,
                PathSegment::Key(key) => write!(f, "/{}", key.replace('~', "~0").replace('/', "~1"))?,
            }
        }
        Ok(())
    }
}

/// Closed set of structural edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum EditOp {
    /// Adds a node under an existing parent. Object parents are upserted.
    Insert { path: NodePath, value: Value },
    /// Overwrites an existing node.
    Replace { path: NodePath, value: Value },
    /// Removes an existing node.
    Delete { path: NodePath },
}

impl EditOp {
    pub fn path(&self) -> &NodePath {
        match self {
            EditOp::Insert { path, .. } | EditOp::Replace { path, .. } | EditOp::Delete { path } => {
                path
            }
        }
    }
}

/// Ordered edits transforming the base template into one variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta(Vec<EditOp>);

impl Delta {
    pub fn new(ops: Vec<EditOp>) -> Self {
        Self(ops)
    }

    pub fn ops(&self) -> &[EditOp] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Failure to apply an edit: the addressed location does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingLocation {
    pub path: NodePath,
    pub reason: &'static str,
}

/// Computes the lossless delta turning `base` into `fragment`.
///
/// `apply_delta(base, &diff(base, fragment))` reproduces `fragment` exactly.
pub fn diff(base: &Value, fragment: &Value) -> Delta {
    let mut ops = Vec::new();
    diff_into(&NodePath::root(), base, fragment, &mut ops);
    Delta(ops)
}

fn diff_into(path: &NodePath, base: &Value, fragment: &Value, ops: &mut Vec<EditOp>) {
    match (base, fragment) {
        (Value::Object(base_map), Value::Object(fragment_map)) => {
            for (key, base_value) in base_map {
                match fragment_map.get(key) {
                    Some(fragment_value) => {
                        diff_into(&path.child_key(key), base_value, fragment_value, ops)
                    }
                    None => ops.push(EditOp::Delete {
                        path: path.child_key(key),
                    }),
                }
            }
            for (key, fragment_value) in fragment_map {
                if !base_map.contains_key(key) {
                    ops.push(EditOp::Insert {
                        path: path.child_key(key),
                        value: fragment_value.clone(),
                    });
                }
            }
        }
        (Value::Array(base_items), Value::Array(fragment_items)) => {
            let shared = base_items.len().min(fragment_items.len());
            for index in 0..shared {
                diff_into(
                    &path.child_index(index),
                    &base_items[index],
                    &fragment_items[index],
                    ops,
                );
            }
            for (index, item) in fragment_items.iter().enumerate().skip(shared) {
                ops.push(EditOp::Insert {
                    path: path.child_index(index),
                    value: item.clone(),
                });
            }
            // Surplus items go from the back so earlier indices stay valid.
            for index in (shared..base_items.len()).rev() {
                ops.push(EditOp::Delete {
                    path: path.child_index(index),
                });
            }
        }
        _ if base == fragment => {}
        _ => ops.push(EditOp::Replace {
            path: path.clone(),
            value: fragment.clone(),
        }),
    }
}

/// Applies every edit of `delta` to `doc` in order.
pub fn apply_delta(doc: &mut Value, delta: &Delta) -> Result<(), MissingLocation> {
    for op in delta.ops() {
        apply_op(doc, op)?;
    }
    Ok(())
}

/// Applies a single edit; later edits to the same location overwrite earlier ones.
pub fn apply_op(doc: &mut Value, op: &EditOp) -> Result<(), MissingLocation> {
    let missing = |reason: &'static str| MissingLocation {
        path: op.path().clone(),
        reason,
    };
    match op {
        EditOp::Replace { path, value } => {
            let target = lookup_mut(doc, path.segments()).ok_or_else(|| missing("node not found"))?;
            *target = value.clone();
            Ok(())
        }
        EditOp::Insert { path, value } => {
            let (parent_path, last) = path
                .split_last()
                .ok_or_else(|| missing("cannot insert at the document root"))?;
            let parent = lookup_mut(doc, parent_path).ok_or_else(|| missing("parent not found"))?;
            match (parent, last) {
                (Value::Object(map), PathSegment::Key(key)) => {
                    map.insert(key.clone(), value.clone());
                    Ok(())
                }
                (Value::Array(items), PathSegment::Index(index)) if *index <= items.len() => {
                    items.insert(*index, value.clone());
                    Ok(())
                }
                (Value::Array(_), PathSegment::Index(_)) => Err(missing("index beyond end of list")),
                _ => Err(missing("parent kind does not match path segment")),
            }
        }
        EditOp::Delete { path } => {
            let (parent_path, last) = path
                .split_last()
                .ok_or_else(|| missing("cannot delete the document root"))?;
            let parent = lookup_mut(doc, parent_path).ok_or_else(|| missing("parent not found"))?;
            match (parent, last) {
                (Value::Object(map), PathSegment::Key(key)) => map
                    .shift_remove(key)
                    .map(|_| ())
                    .ok_or_else(|| missing("node not found")),
                (Value::Array(items), PathSegment::Index(index)) if *index < items.len() => {
                    items.remove(*index);
                    Ok(())
                }
                _ => Err(missing("node not found")),
            }
        }
    }
}

fn lookup_mut<'a>(doc: &'a mut Value, segments: &[PathSegment]) -> Option<&'a mut Value> {
    let mut current = doc;
    for segment in segments {
        current = match (current, segment) {
            (Value::Object(map), PathSegment::Key(key)) => map.get_mut(key)?,
            (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index)?,
            _ => return None,
        };
    }
    Some(current)
}
