//! Inline reference expansion for prompt text.
//!
//! | Token           | Replaced with                                     |
//! |-----------------|---------------------------------------------------|
//! | `@file:<path>`  | canonical path followed by the file in a fence    |
//! | `@path:<path>`  | canonical path                                    |
//!
//! Paths resolve against the session's working directory. A reference that
//! escapes it, does not exist, or is too large to inline stays verbatim.

use std::path::Path;

use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::paths::resolve_within;
use crate::{AppError, Result};

/// Largest file inlined by `@file:`.
pub const MAX_INLINE_BYTES: u64 = 256 * 1024;

const REFERENCE_PATTERN: &str = r"@(file|path):([^\s]+)";

/// Expands `@file:` and `@path:` tokens in prompt text.
#[derive(Debug, Clone)]
pub struct ReferenceExpander {
    pattern: Regex,
    max_inline: u64,
}

impl ReferenceExpander {
    /// Compile the reference pattern.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the pattern fails to compile.
    pub fn new() -> Result<Self> {
        Self::with_max_inline(MAX_INLINE_BYTES)
    }

    /// Compile the reference pattern with a custom inline size limit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the pattern fails to compile.
    pub fn with_max_inline(max_inline: u64) -> Result<Self> {
        let pattern = Regex::new(REFERENCE_PATTERN)
            .map_err(|err| AppError::Config(format!("invalid reference pattern: {err}")))?;
        Ok(Self {
            pattern,
            max_inline,
        })
    }

    /// Expand every reference in `text` relative to `root`.
    #[must_use]
    pub fn expand(&self, root: &Path, text: &str) -> String {
        self.pattern
            .replace_all(text, |caps: &Captures<'_>| {
                let original = &caps[0];
                match self.substitute(root, &caps[1], &caps[2]) {
                    Ok(replacement) => replacement,
                    Err(err) => {
                        warn!(reference = original, %err, "leaving reference unexpanded");
                        original.to_owned()
                    }
                }
            })
            .into_owned()
    }

    fn substitute(&self, root: &Path, kind: &str, raw: &str) -> Result<String> {
        let path = resolve_within(root, raw)?;
        if !path.exists() {
            return Err(AppError::NotFound(format!("'{raw}' does not exist")));
        }

        if kind == "path" {
            return Ok(path.display().to_string());
        }

        let size = std::fs::metadata(&path)?.len();
        if size > self.max_inline {
            return Err(AppError::InvalidRequest(format!(
                "'{raw}' is {size} bytes, over the {} byte inline limit",
                self.max_inline
            )));
        }

        let contents = std::fs::read_to_string(&path)?;
        debug!(path = %path.display(), bytes = contents.len(), "inlined file reference");

        let mut block = format!("{}:\n```\n{contents}", path.display());
        if !contents.ends_with('\n') {
            block.push('\n');
        }
        block.push_str("```");
        Ok(block)
    }
}
