//! Output formats and per-service format sets

use std::fmt;

use crate::error::{Error, Result};

/// Output kind a renderer can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileFormat {
    Png,
    Svg,
    Jpeg,
    Pdf,
    Txt,
}

impl FileFormat {
    /// Every known format, in registry order
    pub const ALL: [FileFormat; 5] = [
        FileFormat::Png,
        FileFormat::Svg,
        FileFormat::Jpeg,
        FileFormat::Pdf,
        FileFormat::Txt,
    ];

    /// Look up a format by its canonical token (case-sensitive)
    pub fn get(token: &str) -> Option<FileFormat> {
        Self::ALL.into_iter().find(|format| format.name() == token)
    }

    /// Canonical token, also used when building renderer arguments
    pub fn name(self) -> &'static str {
        match self {
            FileFormat::Png => "png",
            FileFormat::Svg => "svg",
            FileFormat::Jpeg => "jpeg",
            FileFormat::Pdf => "pdf",
            FileFormat::Txt => "txt",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            FileFormat::Png => "image/png",
            FileFormat::Svg => "image/svg+xml",
            FileFormat::Jpeg => "image/jpeg",
            FileFormat::Pdf => "application/pdf",
            FileFormat::Txt => "text/plain; charset=utf-8",
        }
    }

    pub fn is_binary(self) -> bool {
        matches!(self, FileFormat::Png | FileFormat::Jpeg | FileFormat::Pdf)
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered set of formats supported by one service
///
/// Built once at startup and never mutated. The accepted-token list used in
/// error messages is precomputed so rejecting a format allocates only the
/// error itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatSet {
    formats: Vec<FileFormat>,
    listing: String,
}

impl FormatSet {
    /// Create a set, keeping declaration order and dropping duplicates
    pub fn new(formats: impl IntoIterator<Item = FileFormat>) -> Self {
        let mut unique: Vec<FileFormat> = Vec::new();
        for format in formats {
            if !unique.contains(&format) {
                unique.push(format);
            }
        }
        let listing = unique
            .iter()
            .map(|format| format.name())
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            formats: unique,
            listing,
        }
    }

    pub fn supports(&self, format: FileFormat) -> bool {
        self.formats.contains(&format)
    }

    /// Resolve a client token against this set
    ///
    /// Unknown tokens and known tokens outside the set are reported the same way.
    pub fn resolve(&self, token: &str) -> Result<FileFormat> {
        match FileFormat::get(token) {
            Some(format) if self.supports(format) => Ok(format),
            _ => Err(Error::UnsupportedFormat {
                token: token.to_string(),
                supported: self.listing.clone(),
            }),
        }
    }

    /// Comma-separated accepted tokens, e.g. `png, svg, jpeg`
    pub fn stringify(&self) -> &str {
        &self.listing
    }

    pub fn iter(&self) -> impl Iterator<Item = FileFormat> + '_ {
        self.formats.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}
