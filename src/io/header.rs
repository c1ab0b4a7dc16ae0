use crate::types::{CubeError, CubeResult};
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::Path;
use tempfile::NamedTempFile;

/// One parsed ENVI header value: a scalar or a brace-delimited list.
///
/// List elements are individually type-inferred (int, else float, else
/// verbatim text), so `{1, 1.5, VNIR}` keeps all three flavors.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<HeaderValue>),
}

impl HeaderValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view accepting both int and float scalars
    pub fn as_float(&self) -> Option<f64> {
        match self {
            HeaderValue::Int(v) => Some(*v as f64),
            HeaderValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[HeaderValue]> {
        match self {
            HeaderValue::List(v) => Some(v),
            _ => None,
        }
    }

    /// Infer a scalar value from raw header text
    fn infer_scalar(raw: &str) -> HeaderValue {
        let trimmed = raw.trim();
        if let Ok(v) = trimmed.parse::<i64>() {
            return HeaderValue::Int(v);
        }
        if let Ok(v) = trimmed.parse::<f64>() {
            return HeaderValue::Float(v);
        }
        HeaderValue::Text(trimmed.to_string())
    }

    fn serialize_into(&self, out: &mut String) {
        match self {
            HeaderValue::Int(v) => {
                let _ = write!(out, "{}", v);
            }
            HeaderValue::Float(v) => {
                // Keep a decimal point so the value re-parses as a float
                if v.fract() == 0.0 && v.is_finite() {
                    let _ = write!(out, "{:.1}", v);
                } else {
                    let _ = write!(out, "{}", v);
                }
            }
            HeaderValue::Text(v) => out.push_str(v),
            HeaderValue::List(items) => {
                out.push_str("{ ");
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.serialize_into(out);
                }
                out.push_str(" }");
            }
        }
    }
}

/// Ordered key/value view of an ENVI header sidecar.
///
/// Keys keep their on-disk spelling and order; lookups are
/// case-insensitive. Unrecognized keys pass through serialization
/// verbatim so a rewrite never loses information.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderDocument {
    entries: Vec<(String, HeaderValue)>,
}

impl HeaderDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        let wanted = key.to_lowercase();
        self.entries
            .iter()
            .find(|(k, _)| k.to_lowercase() == wanted)
            .map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Append or replace a key, preserving its existing position on replace
    pub fn set(&mut self, key: &str, value: HeaderValue) {
        let wanted = key.to_lowercase();
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|(k, _)| k.to_lowercase() == wanted)
        {
            slot.1 = value;
        } else {
            self.entries.push((key.to_string(), value));
        }
    }

    /// Remove a key; returns true when something was removed
    pub fn remove(&mut self, key: &str) -> bool {
        let wanted = key.to_lowercase();
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k.to_lowercase() != wanted);
        self.entries.len() != before
    }

    /// Insert a key after the last of the given anchor keys, or at the end
    /// when none of them is present. Replaces in place when the key exists.
    pub fn insert_near(&mut self, key: &str, value: HeaderValue, anchors: &[&str]) {
        let wanted = key.to_lowercase();
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|(k, _)| k.to_lowercase() == wanted)
        {
            slot.1 = value;
            return;
        }
        let mut insert_at = self.entries.len();
        for (i, (k, _)) in self.entries.iter().enumerate() {
            let lower = k.to_lowercase();
            if anchors.iter().any(|a| lower == *a) {
                insert_at = i + 1;
            }
        }
        self.entries.insert(insert_at, (key.to_string(), value));
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Documents are compared with case-insensitive keys so that
    /// serialization round trips are order- and case-faithful.
    pub fn semantically_equal(&self, other: &HeaderDocument) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|((ka, va), (kb, vb))| ka.to_lowercase() == kb.to_lowercase() && va == vb)
    }
}

/// Parser/serializer for the ENVI text sidecar (`key = value` plus
/// `key = { v1, v2, ... }` brace lists, possibly spanning lines).
pub struct HeaderCodec;

impl HeaderCodec {
    /// Parse header text into an ordered document
    pub fn parse(text: &str) -> CubeResult<HeaderDocument> {
        let mut doc = HeaderDocument::new();
        let mut lines = text.lines().peekable();

        // Leading magic line, written back by serialize
        if let Some(first) = lines.peek() {
            if first.trim().eq_ignore_ascii_case("ENVI") {
                lines.next();
            }
        }

        while let Some(line) = lines.next() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let Some(eq) = line.find('=') else {
                log::debug!("skipping header line without '=': {}", line);
                continue;
            };
            let key = line[..eq].trim().to_string();
            let mut raw_value = line[eq + 1..].trim().to_string();

            // Brace lists may continue over multiple lines
            if raw_value.starts_with('{') && !raw_value.contains('}') {
                for cont in lines.by_ref() {
                    raw_value.push(' ');
                    raw_value.push_str(cont.trim());
                    if cont.contains('}') {
                        break;
                    }
                }
                if !raw_value.contains('}') {
                    return Err(CubeError::InvalidHeaderField(format!(
                        "unterminated brace list for key '{}'",
                        key
                    )));
                }
            }

            doc.set(&key, Self::parse_value(&raw_value));
        }

        Ok(doc)
    }

    fn parse_value(raw: &str) -> HeaderValue {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') && trimmed.ends_with('}') {
            let inner = &trimmed[1..trimmed.len() - 1];
            let items = inner
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(HeaderValue::infer_scalar)
                .collect();
            HeaderValue::List(items)
        } else {
            HeaderValue::infer_scalar(trimmed)
        }
    }

    /// Serialize a document back to header text.
    ///
    /// Idempotent under re-parse: `parse(serialize(parse(x))) == parse(x)`.
    pub fn serialize(doc: &HeaderDocument) -> String {
        let mut out = String::from("ENVI\n");
        for (key, value) in &doc.entries {
            out.push_str(key);
            out.push_str(" = ");
            value.serialize_into(&mut out);
            out.push('\n');
        }
        out
    }

    /// Read and parse a header file
    pub fn read_file<P: AsRef<Path>>(path: P) -> CubeResult<HeaderDocument> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CubeError::FileNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Read-modify-write a single header field with an atomic replace.
    ///
    /// The on-disk content is re-read immediately before modification so a
    /// concurrent external edit of unrelated keys is not clobbered.
    /// `value = None` removes the key. The new content is written to a
    /// temp file in the same directory and persisted over the original, so
    /// a crash can never leave a truncated header behind.
    pub fn rewrite_field<P: AsRef<Path>>(
        path: P,
        key: &str,
        value: Option<HeaderValue>,
        anchors: &[&str],
    ) -> CubeResult<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CubeError::FileNotFound(path.to_path_buf()));
        }
        let metadata = fs::metadata(path)?;
        if metadata.permissions().readonly() {
            return Err(CubeError::HeaderNotWritable(format!(
                "{} is read-only",
                path.display()
            )));
        }

        let text = fs::read_to_string(path)?;
        let mut doc = Self::parse(&text)?;
        match value {
            Some(v) => {
                doc.insert_near(key, v, anchors);
                log::debug!("header rewrite: set '{}' in {}", key, path.display());
            }
            None => {
                doc.remove(key);
                log::debug!("header rewrite: removed '{}' from {}", key, path.display());
            }
        }

        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(Self::serialize(&doc).as_bytes())?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| {
            CubeError::HeaderNotWritable(format!(
                "failed to replace {}: {}",
                path.display(),
                e.error
            ))
        })?;

        Ok(())
    }
}
