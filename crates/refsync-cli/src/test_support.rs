use serde_json::Value;
use std::{fs, path::Path};
use tempfile::TempDir;

/// Fresh temp directory, removed when dropped.
pub(crate) fn scratch() -> TempDir {
    TempDir::new().expect("temp dir should be creatable")
}

/// Pretty-print `value` to `relative` under `root`, creating parents.
pub(crate) fn write(root: &Path, relative: &str, value: &Value) {
    let rendered = serde_json::to_string_pretty(value).expect("value should render");
    write_raw(root, relative, &rendered);
}

pub(crate) fn write_raw(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dir should be creatable");
    }
    fs::write(path, contents).expect("file should be writable");
}
