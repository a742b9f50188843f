//! Node path helpers.
//!
//! A node path is a `/` separated key into a descriptor tree, e.g.
//! `100000000/info/bgm`. Lookups never fail: a missing segment simply resolves to
//! `None` so callers can probe optional fields without special cases.

use serde_json::{Map, Value};

/// Walks `tree` along `path`.
///
/// An empty path returns the tree itself. A segment is only looked up inside JSON
/// objects, so descending past a leaf yields `None`.
pub fn resolve<'a>(tree: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(tree);
    }
    path.split('/')
        .try_fold(tree, |node, segment| node.as_object()?.get(segment))
}

/// Splits a node path into its first segment and the remainder.
///
/// `"100000000/info/bgm"` gives `("100000000", "info/bgm")`, a path without `/` gives
/// an empty remainder.
pub fn split_first(path: &str) -> (&str, &str) {
    path.split_once('/').unwrap_or((path, ""))
}

/// Joins a root location and a relative path with exactly one `/`.
pub fn join_url(root: &str, path: &str) -> String {
    let root = root.strip_suffix('/').unwrap_or(root);
    let path = path.strip_prefix('/').unwrap_or(path);
    format!("{root}/{path}")
}

/// Inserts `value` into `tree` at `nodepath`, creating intermediate objects.
///
/// An intermediate node that is not an object is replaced by an empty object. An
/// empty nodepath replaces the whole tree.
pub fn graft(tree: &mut Value, nodepath: &str, value: Value) {
    if nodepath.is_empty() {
        *tree = value;
        return;
    }

    let mut node = tree;
    let mut segments = nodepath.split('/').peekable();
    while let Some(segment) = segments.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Some(map) = node.as_object_mut() else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
