//! Asset model and the naming rules of the content-addressed store.
//!
//! A remote asset is addressed locally by its remote-reported checksum:
//! the base64 checksum is decoded and re-encoded URL-safe (no padding) so
//! it is filesystem-clean, then suffixed with an extension derived from the
//! closed UTI table below. The remote `modified` timestamp becomes the
//! file's mtime, which makes the filesystem the complete record of state.

use base64::Engine;

/// Which rendition of the media this asset is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetOrigin {
    Original,
    Edit,
    Live,
}

impl AssetOrigin {
    /// Suffix appended to the pretty (album link) filename.
    pub fn suffix(self) -> &'static str {
        match self {
            AssetOrigin::Original => "",
            AssetOrigin::Edit => "-edited",
            AssetOrigin::Live => "-live",
        }
    }
}

/// Closed UTI → extension table. Anything outside it is skipped with a
/// warning rather than guessed at.
pub fn ext_for_file_type(uti: &str) -> Option<&'static str> {
    match uti {
        "public.jpeg" => Some("jpg"),
        "public.png" => Some("png"),
        "public.heic" => Some("heic"),
        "public.heif" => Some("heif"),
        "public.tiff" => Some("tiff"),
        "com.compuserve.gif" => Some("gif"),
        "com.apple.quicktime-movie" => Some("mov"),
        "public.mpeg-4" => Some("mp4"),
        "com.adobe.raw-image" => Some("dng"),
        "com.canon.cr2-raw-image" => Some("cr2"),
        "com.canon.cr3-raw-image" => Some("cr3"),
        "com.canon.crw-raw-image" => Some("crw"),
        "com.sony.arw-raw-image" => Some("arw"),
        "com.fuji.raw-image" => Some("raf"),
        "com.panasonic.rw2-raw-image" => Some("rw2"),
        "com.nikon.nrw-raw-image" => Some("nrw"),
        "com.nikon.raw-image" => Some("nef"),
        "com.pentax.raw-image" => Some("pef"),
        "com.olympus.or-raw-image" => Some("orf"),
        "com.olympus.raw-image" => Some("orf"),
        _ => None,
    }
}

/// One original-or-edited media file as reported by the remote library.
#[derive(Debug, Clone)]
pub struct Asset {
    /// Stable remote record ID (of the CPLMaster record).
    pub record_name: String,
    /// Checksum as reported by the remote, standard base64.
    pub file_checksum: String,
    pub size: u64,
    /// Unix milliseconds; copied to the file's mtime after download.
    pub modified: i64,
    /// Extension from the closed UTI table.
    pub ext: &'static str,
    /// Original filename as kept by the remote (e.g. `IMG_1234.HEIC`).
    pub remote_filename: String,
    pub wrapping_key: Option<String>,
    pub reference_checksum: Option<String>,
    /// Short-lived signed URL; refreshed by re-fetching the record.
    pub download_url: Option<String>,
    pub origin: AssetOrigin,
    pub favorite: bool,
}

impl Asset {
    /// Content-addressed filename inside `_All-Photos/`:
    /// `base64url(checksum bytes).ext`, stable across runs.
    pub fn asset_filename(&self) -> Result<String, super::error::LibraryError> {
        let stem = checksum_stem(&self.file_checksum)
            .ok_or_else(|| super::error::LibraryError::InvalidChecksum(self.file_checksum.clone()))?;
        Ok(format!("{}.{}", stem, self.ext))
    }

    /// User-facing name of the link inside an album directory:
    /// remote stem + origin suffix + extension, cleaned of characters that
    /// are hostile to common filesystems.
    pub fn pretty_filename(&self) -> String {
        let stem = match self.remote_filename.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => self.remote_filename.as_str(),
        };
        format!(
            "{}{}.{}",
            clean_filename(stem),
            self.origin.suffix(),
            self.ext
        )
    }
}

/// Decode the remote base64 checksum and re-encode it URL-safe without
/// padding. `None` when the input is not valid base64.
pub fn checksum_stem(checksum_b64: &str) -> Option<String> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(checksum_b64)
        .ok()?;
    Some(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw))
}

/// Strip characters invalid on common filesystems:
/// `/ \ : * ? " < > |`.
pub fn clean_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect()
}

/// An asset as found on disk during load. Everything we know about it is
/// encoded in its name, size, and mtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAsset {
    /// `<checksum stem>.<ext>`
    pub filename: String,
    pub size: u64,
    /// Unix milliseconds, from the file's mtime.
    pub modified: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(origin: AssetOrigin) -> Asset {
        Asset {
            record_name: "REC1".into(),
            // base64 of the bytes 0x00 0x01 0xfe 0xff
            file_checksum: "AAH+/w==".into(),
            size: 10,
            modified: 1_000,
            ext: "jpg",
            remote_filename: "IMG_0001.JPG".into(),
            wrapping_key: None,
            reference_checksum: None,
            download_url: None,
            origin,
            favorite: false,
        }
    }

    #[test]
    fn asset_filename_is_urlsafe_and_stable() {
        let a = asset(AssetOrigin::Original);
        let name = a.asset_filename().unwrap();
        // 0x00 0x01 0xfe 0xff → "AAH-_w" URL-safe, no padding
        assert_eq!(name, "AAH-_w.jpg");
        assert_eq!(a.asset_filename().unwrap(), name);
        assert!(!name.contains('/') && !name.contains('+') && !name.contains('='));
    }

    #[test]
    fn invalid_checksum_is_rejected() {
        let mut a = asset(AssetOrigin::Original);
        a.file_checksum = "!!not base64!!".into();
        assert!(a.asset_filename().is_err());
    }

    #[test]
    fn pretty_filename_appends_origin_suffix() {
        assert_eq!(asset(AssetOrigin::Original).pretty_filename(), "IMG_0001.jpg");
        assert_eq!(asset(AssetOrigin::Edit).pretty_filename(), "IMG_0001-edited.jpg");
        assert_eq!(asset(AssetOrigin::Live).pretty_filename(), "IMG_0001-live.jpg");
    }

    #[test]
    fn pretty_filename_without_remote_extension() {
        let mut a = asset(AssetOrigin::Original);
        a.remote_filename = "scan".into();
        assert_eq!(a.pretty_filename(), "scan.jpg");
    }

    #[test]
    fn clean_filename_strips_hostile_characters() {
        assert_eq!(clean_filename("a/b\\c:d*e?f\"g<h>i|j"), "abcdefghij");
        assert_eq!(clean_filename("Düsseldorf 2024"), "Düsseldorf 2024");
    }

    #[test]
    fn ext_table_is_closed() {
        assert_eq!(ext_for_file_type("public.jpeg"), Some("jpg"));
        assert_eq!(ext_for_file_type("com.apple.quicktime-movie"), Some("mov"));
        assert_eq!(ext_for_file_type("application/octet-stream"), None);
    }
}
