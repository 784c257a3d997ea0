//! Structural mismatch chains and their rendering into a single message.
//!
//! A [`Mismatch`] is the outermost failure ("body does not match schema for
//! ...") with a chain of nested causes. Causes produced by JSON Schema keyword
//! failures carry a [`Breadcrumb`] locating the offending value in the payload.

use std::fmt;

use thiserror::Error;

/// Separator placed between the parts of a rendered diagnostic.
pub const MESSAGE_DELIMITER: &str = " | ";

/// Ordered key/index path to a value inside a payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Breadcrumb(Vec<String>);

impl Breadcrumb {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    /// Build from a JSON Pointer (RFC 6901), e.g. `/items/0/id`.
    pub fn from_pointer(pointer: &str) -> Self {
        let path = pointer.trim_start_matches('#').trim_start_matches('/');
        if path.is_empty() {
            return Self::default();
        }
        Self(
            path.split('/')
                // Unescape JSON Pointer encoding (~1 = /, ~0 = ~)
                .map(|part| part.replace("~1", "/").replace("~0", "~"))
                .collect(),
        )
    }

    pub fn chain(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Breadcrumb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// A structural validation failure, possibly wrapping nested causes.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct Mismatch {
    message: String,
    breadcrumb: Option<Breadcrumb>,
    #[source]
    cause: Option<Box<Mismatch>>,
}

impl Mismatch {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            breadcrumb: None,
            cause: None,
        }
    }

    /// A keyword-level failure located at `breadcrumb`.
    pub fn keyword(message: impl Into<String>, breadcrumb: Breadcrumb) -> Self {
        Self {
            message: message.into(),
            breadcrumb: Some(breadcrumb),
            cause: None,
        }
    }

    /// Attach `cause` as the next link of the chain.
    pub fn caused_by(mut self, cause: Mismatch) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Wrap a list of sibling failures as a chain under this one.
    ///
    /// The first sibling becomes the direct cause, the second its cause, and so on.
    pub fn with_causes(self, causes: Vec<Mismatch>) -> Self {
        let chain = causes
            .into_iter()
            .rev()
            .fold(None, |inner: Option<Mismatch>, outer| {
                Some(match inner {
                    Some(inner) => outer.caused_by(inner),
                    None => outer,
                })
            });
        match chain {
            Some(chain) => self.caused_by(chain),
            None => self,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn breadcrumb(&self) -> Option<&Breadcrumb> {
        self.breadcrumb.as_ref()
    }

    pub fn cause(&self) -> Option<&Mismatch> {
        self.cause.as_deref()
    }

    /// Iterate the nested causes, outermost first (excluding `self`).
    pub fn causes(&self) -> impl Iterator<Item = &Mismatch> {
        std::iter::successors(self.cause(), |m| m.cause())
    }
}

/// Render a mismatch chain into one message, innermost cause first.
///
/// Collects the outer message, then every nested cause's message followed by
/// a `Field: a.b.c` line when that cause carries a non-empty breadcrumb. The
/// collected parts are reversed before joining, so the root cause reads first
/// and the outer summary last.
pub fn build_message(mismatch: &Mismatch) -> String {
    let mut parts = vec![mismatch.message().to_string()];

    for cause in mismatch.causes() {
        parts.push(cause.message().to_string());

        if let Some(breadcrumb) = cause.breadcrumb().filter(|b| !b.is_empty()) {
            parts.push(format!("Field: {}", breadcrumb));
        }
    }

    parts.reverse();
    parts.join(MESSAGE_DELIMITER)
}
