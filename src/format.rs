//! Format resolution: filename → input format → default output format.
//!
//! Everything here is a pure lookup over two tables built once at first use:
//!
//! * the extension table, mapping a lowercase dot-extension to an
//!   [`InputFormat`] (`avifs` and `azw` are aliases), and
//! * the [`SupportedConversion`] table, giving each input format its
//!   [`Category`], its default [`OutputFormat`] and the outputs a user may
//!   pick explicitly.
//!
//! An unrecognised extension is a normal outcome (`None`), not an error.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// The two families of files the front end accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    Image,
    Ebook,
}

impl Category {
    /// Display list used in validation messages and help text.
    pub fn accepted_formats(&self) -> &'static str {
        match self {
            Category::Image => "CR2, AVIF, WebP, HEIC, HEIF",
            Category::Ebook => "EPUB, MOBI, PDF",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Image => "image",
            Category::Ebook => "ebook",
        })
    }
}

/// Canonical input format tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    Cr2,
    Avif,
    Webp,
    Heic,
    Heif,
    Epub,
    Mobi,
    Pdf,
}

impl InputFormat {
    pub const ALL: [InputFormat; 8] = [
        InputFormat::Cr2,
        InputFormat::Avif,
        InputFormat::Webp,
        InputFormat::Heic,
        InputFormat::Heif,
        InputFormat::Epub,
        InputFormat::Mobi,
        InputFormat::Pdf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::Cr2 => "cr2",
            InputFormat::Avif => "avif",
            InputFormat::Webp => "webp",
            InputFormat::Heic => "heic",
            InputFormat::Heif => "heif",
            InputFormat::Epub => "epub",
            InputFormat::Mobi => "mobi",
            InputFormat::Pdf => "pdf",
        }
    }

    /// MIME type sent with uploads of this format.
    pub fn mime_type(&self) -> &'static str {
        match self {
            InputFormat::Cr2 => "image/x-canon-cr2",
            InputFormat::Avif => "image/avif",
            InputFormat::Webp => "image/webp",
            InputFormat::Heic => "image/heic",
            InputFormat::Heif => "image/heif",
            InputFormat::Epub => "application/epub+zip",
            InputFormat::Mobi => "application/x-mobipocket-ebook",
            InputFormat::Pdf => "application/pdf",
        }
    }

    pub fn category(&self) -> Category {
        supported_conversion(*self)
            .map(|c| c.category)
            .unwrap_or_default()
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format the conversion backend is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Jpg,
    Webp,
    Azw3,
}

impl OutputFormat {
    /// Tag sent as the `output_format` request parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpg => "jpg",
            OutputFormat::Webp => "webp",
            OutputFormat::Azw3 => "azw3",
        }
    }

    /// File extension of the downloaded result (same as the tag).
    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Content type assumed when the backend omits one.
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpg => "image/jpeg",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Azw3 => "application/vnd.amazon.ebook",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            "webp" => Ok(OutputFormat::Webp),
            "azw3" => Ok(OutputFormat::Azw3),
            other => Err(format!(
                "unknown output format '{other}' (expected png, jpg, webp or azw3)"
            )),
        }
    }
}

/// One row of the static conversion table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedConversion {
    pub input: InputFormat,
    pub category: Category,
    pub default_output: OutputFormat,
    /// Outputs a user may choose explicitly. Always contains `default_output`.
    pub allowed_outputs: &'static [OutputFormat],
}

impl SupportedConversion {
    pub fn allows(&self, output: OutputFormat) -> bool {
        self.allowed_outputs.contains(&output)
    }
}

const RASTER_OUTPUTS: &[OutputFormat] = &[OutputFormat::Png, OutputFormat::Jpg, OutputFormat::Webp];
const EBOOK_OUTPUTS: &[OutputFormat] = &[OutputFormat::Azw3];

static EXTENSIONS: Lazy<HashMap<&'static str, InputFormat>> = Lazy::new(|| {
    HashMap::from([
        ("cr2", InputFormat::Cr2),
        ("avif", InputFormat::Avif),
        ("avifs", InputFormat::Avif),
        ("webp", InputFormat::Webp),
        ("heic", InputFormat::Heic),
        ("heif", InputFormat::Heif),
        ("epub", InputFormat::Epub),
        ("mobi", InputFormat::Mobi),
        ("azw", InputFormat::Mobi),
        ("pdf", InputFormat::Pdf),
    ])
});

static CONVERSIONS: Lazy<HashMap<InputFormat, SupportedConversion>> = Lazy::new(|| {
    use Category::{Ebook, Image};
    use OutputFormat::{Azw3, Jpg, Png};

    [
        (InputFormat::Cr2, Image, Jpg, RASTER_OUTPUTS),
        (InputFormat::Avif, Image, Png, RASTER_OUTPUTS),
        (InputFormat::Webp, Image, Png, RASTER_OUTPUTS),
        (InputFormat::Heic, Image, Jpg, RASTER_OUTPUTS),
        (InputFormat::Heif, Image, Jpg, RASTER_OUTPUTS),
        (InputFormat::Epub, Ebook, Azw3, EBOOK_OUTPUTS),
        (InputFormat::Mobi, Ebook, Azw3, EBOOK_OUTPUTS),
        (InputFormat::Pdf, Ebook, Azw3, EBOOK_OUTPUTS),
    ]
    .into_iter()
    .map(|(input, category, default_output, allowed_outputs)| {
        (
            input,
            SupportedConversion {
                input,
                category,
                default_output,
                allowed_outputs,
            },
        )
    })
    .collect()
});

/// Lowercase extension after the last dot, if any.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// Map a filename's extension to its canonical input format.
///
/// Returns `None` for unrecognised or missing extensions.
pub fn detect_input_format(filename: &str) -> Option<InputFormat> {
    extension_of(filename).and_then(|ext| EXTENSIONS.get(ext.as_str()).copied())
}

/// Fallback detection from a declared MIME type, restricted to one category.
///
/// Browsers and HTTP clients sometimes hand over a file whose name lost its
/// extension but whose MIME type still names the format (`image/avif`).
pub fn detect_from_mime(content_type: &str, category: Category) -> Option<InputFormat> {
    let ct = content_type.to_ascii_lowercase();
    let candidates: &[(&str, InputFormat)] = match category {
        Category::Image => &[
            ("avif", InputFormat::Avif),
            ("webp", InputFormat::Webp),
            ("cr2", InputFormat::Cr2),
            ("heic", InputFormat::Heic),
            ("heif", InputFormat::Heif),
        ],
        Category::Ebook => &[
            ("epub", InputFormat::Epub),
            ("mobi", InputFormat::Mobi),
            ("pdf", InputFormat::Pdf),
        ],
    };
    candidates
        .iter()
        .find(|(needle, _)| ct.contains(needle))
        .map(|(_, fmt)| *fmt)
}

/// Table row for `input`.
pub fn supported_conversion(input: InputFormat) -> Option<&'static SupportedConversion> {
    CONVERSIONS.get(&input)
}

/// Default output for an input format; `png` when the table has no row.
pub fn default_output_format(input: InputFormat) -> OutputFormat {
    supported_conversion(input)
        .map(|c| c.default_output)
        .unwrap_or(OutputFormat::Png)
}

/// Default output for a raw format tag such as `"heic"`; `png` for unknown tags.
pub fn default_output_for_tag(tag: &str) -> OutputFormat {
    EXTENSIONS
        .get(tag.trim().to_ascii_lowercase().as_str())
        .map(|f| default_output_format(*f))
        .unwrap_or(OutputFormat::Png)
}

/// Name offered for the downloaded result: the source stem with the output
/// extension, or `converted.<ext>` when there is no usable source name.
pub fn download_filename(source: Option<&str>, output: OutputFormat) -> String {
    let stem = source
        .and_then(|name| Path::new(name).file_stem())
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("converted");
    format!("{stem}.{}", output.extension())
}

/// `512 B`, `12.50 KB`, `3.10 MB`.
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    if bytes < KB {
        format!("{bytes} B")
    } else if bytes < MB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    }
}
