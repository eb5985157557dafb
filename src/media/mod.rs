//! Asset classification
//!
//! Turns a `Content-Type` header into the canonical asset type, the file
//! extension used when persisting the asset, and the declared text encoding.

use mime::Mime;

/// Extension used when the media type is unknown
pub const FALLBACK_EXTENSION: &str = ".html";

/// Asset type recorded when the response carries no content type
pub const UNKNOWN_TYPE: &str = "unknown";

/// Result of classifying a fetched resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetClass {
    /// `main/sub`, lowercased, parameters stripped
    pub asset_type: String,
    /// Dotted extension, e.g. `.png`
    pub extension: Option<String>,
    /// `charset` parameter of the content type, if declared
    pub encoding: Option<String>,
}

impl AssetClass {
    /// Extension to persist the content under
    pub fn extension_or_fallback(&self) -> &str {
        self.extension.as_deref().unwrap_or(FALLBACK_EXTENSION)
    }
}

/// Classifies a resource by its `Content-Type` header
///
/// # Examples
///
/// ```
/// use web_archiver::media::classify;
///
/// let class = classify(Some("text/css; charset=UTF-8"));
/// assert_eq!(class.asset_type, "text/css");
/// assert_eq!(class.extension.as_deref(), Some(".css"));
/// assert_eq!(class.encoding.as_deref(), Some("utf-8"));
/// ```
pub fn classify(content_type: Option<&str>) -> AssetClass {
    let Some(header) = content_type.map(str::trim).filter(|h| !h.is_empty()) else {
        return AssetClass {
            asset_type: UNKNOWN_TYPE.to_string(),
            extension: None,
            encoding: None,
        };
    };

    let Ok(parsed) = header.parse::<Mime>() else {
        tracing::debug!("Unparseable content type {:?}", header);
        return AssetClass {
            asset_type: header.to_lowercase(),
            extension: None,
            encoding: None,
        };
    };

    AssetClass {
        asset_type: parsed.essence_str().to_lowercase(),
        extension: lookup_extension(parsed.type_().as_str(), parsed.subtype().as_str()),
        encoding: parsed
            .get_param(mime::CHARSET)
            .map(|charset| charset.as_str().to_lowercase()),
    }
}

/// Looks up the dotted file extension for a media type
///
/// Prefers the extension spelled like the subtype (`image/jpeg` gives
/// `.jpeg`), otherwise the first one registered for the type.
///
/// # Examples
///
/// ```
/// use web_archiver::media::lookup_extension;
///
/// assert_eq!(lookup_extension("image", "png").as_deref(), Some(".png"));
/// assert_eq!(lookup_extension("IMAGE", "JPEG").as_deref(), Some(".jpeg"));
/// assert_eq!(lookup_extension("application", "x-made-up"), None);
/// ```
pub fn lookup_extension(main_type: &str, sub_type: &str) -> Option<String> {
    let essence = format!("{}/{}", main_type, sub_type).to_lowercase();
    let extensions = mime_guess::get_mime_extensions_str(&essence)?;

    let subtype = sub_type.to_lowercase();
    extensions
        .iter()
        .find(|extension| **extension == subtype)
        .or_else(|| extensions.first())
        .map(|extension| format!(".{}", extension))
}
