//! Local validation of a selected file.
//!
//! Runs in a fixed order so the user sees the most fundamental problem first:
//! format, category, size ceiling, emptiness, then the requested output. None
//! of these checks touches the network.

use crate::config::ClientConfig;
use crate::error::ConvertError;
use crate::format::{
    default_output_format, detect_from_mime, detect_input_format, supported_conversion, Category,
    OutputFormat,
};
use crate::state::{ConversionRequest, SourceFile};
use crate::transport::check_size;

/// Validate `file` for `category` and resolve its output format.
///
/// `output` is the user's explicit choice; `None` picks the input format's
/// default. An explicit choice must appear in the format's allowed outputs
/// (ebooks only allow their default).
pub fn validate(
    file: SourceFile,
    category: Category,
    output: Option<OutputFormat>,
    config: &ClientConfig,
) -> Result<ConversionRequest, ConvertError> {
    let input = detect_input_format(&file.name)
        .or_else(|| detect_from_mime(&file.content_type, category))
        .ok_or_else(|| ConvertError::UnsupportedFormat {
            filename: file.name.clone(),
            category,
        })?;

    let found = input.category();
    if found != category {
        return Err(ConvertError::CategoryMismatch {
            filename: file.name.clone(),
            expected: category,
            found,
        });
    }

    check_size(input, file.size(), config)?;

    if file.size() == 0 {
        return Err(ConvertError::EmptyFile {
            filename: file.name.clone(),
        });
    }

    let output = match output {
        None => default_output_format(input),
        Some(chosen) => {
            let allowed = supported_conversion(input).is_some_and(|row| row.allows(chosen));
            if !allowed {
                return Err(ConvertError::OutputNotAllowed {
                    input,
                    output: chosen,
                });
            }
            chosen
        }
    };

    Ok(ConversionRequest {
        file,
        input,
        output,
    })
}
