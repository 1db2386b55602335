use serde::{Deserialize, Serialize};

pub const MIME_IPYNB: &str = "application/x-ipynb+json";
pub const MIME_CSV: &str = "text/csv";

/// Content class a preview request is dispatched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentFormat {
    Json,
    Image,
    Text,
}

/// Final extension of a file name, without the dot. Multi-dot names yield the
/// last segment ("archive.tar.gz" -> "gz"); names without a dot yield "".
pub fn extension_of(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext,
        _ => "",
    }
}

/// Mimetype from the fixed extension table. Unknown extensions map to "".
pub fn mime_for(name: &str) -> &'static str {
    match extension_of(name) {
        "txt" => "text/plain",
        "sh" => "application/x-sh",
        "js" => "text/javascript",
        "md" => "text/markdown",
        "py" => "text/x-python",
        "csv" => MIME_CSV,
        "tsv" => MIME_CSV,
        "html" => "text/html",
        "r" => "text/x-rsrc",
        "yaml" => "text/x-yaml",
        "yml" => "text/yaml",
        "json" => "application/json",
        "ipynb" => MIME_IPYNB,
        "pdf" => "application/pdf",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "zip" => "application/x-zip-compressed",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "tiff" => "image/tiff",
        "bmp" => "image/bmp",
        _ => "",
    }
}

/// Content class for a mimetype: notebooks are structured JSON, raster images
/// are base64 payloads, everything else previews as text.
pub fn format_for(mime: &str) -> ContentFormat {
    match mime {
        MIME_IPYNB => ContentFormat::Json,
        "image/gif" | "image/jpeg" | "image/png" => ContentFormat::Image,
        _ => ContentFormat::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_handling() {
        assert_eq!(extension_of("report.txt"), "txt");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
        assert_eq!(extension_of("Makefile"), "");
        assert_eq!(extension_of(".bashrc"), "");
    }

    #[test]
    fn table_lookup() {
        assert_eq!(mime_for("a.ipynb"), MIME_IPYNB);
        assert_eq!(mime_for("a.tsv"), MIME_CSV);
        assert_eq!(mime_for("a.unknownext"), "");
    }

    #[test]
    fn classification() {
        assert_eq!(format_for(MIME_IPYNB), ContentFormat::Json);
        assert_eq!(format_for("image/png"), ContentFormat::Image);
        assert_eq!(format_for("image/svg+xml"), ContentFormat::Text);
        assert_eq!(format_for(""), ContentFormat::Text);
    }
}
