//! `multipart/form-data` encoding for token endpoint requests
//!
//! Each request gets a fresh random boundary. Every field becomes its own
//! part:
//!
//! ```text
//! --<boundary>\r\n
//! Content-Disposition: form-data; name="<field>"\r\n
//! \r\n
//! <value>\r\n
//! ```
//!
//! and the body ends with `--<boundary>--\r\n`.

use uuid::Uuid;

/// An ordered set of text fields encoded as `multipart/form-data`.
#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    fields: Vec<(&'static str, String)>,
}

impl MultipartForm {
    /// Start an empty form with a random boundary.
    pub fn new() -> Self {
        Self::with_boundary(Uuid::new_v4().simple().to_string())
    }

    /// Start an empty form with a fixed boundary.
    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field. Fields are encoded in insertion order.
    pub fn field(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.fields.push((name, value.into()));
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!(
            "multipart/form-data; charset=utf-8; boundary={}",
            self.boundary
        )
    }

    /// Encode the body.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = String::new();
        for (name, value) in &self.fields {
            body.push_str("--");
            body.push_str(&self.boundary);
            body.push_str("\r\n");
            body.push_str("Content-Disposition: form-data; name=\"");
            body.push_str(name);
            body.push_str("\"\r\n\r\n");
            body.push_str(value);
            body.push_str("\r\n");
        }
        body.push_str("--");
        body.push_str(&self.boundary);
        body.push_str("--\r\n");
        body.into_bytes()
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}
