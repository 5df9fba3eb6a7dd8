//! Parsing of CloudKit photo records into the local asset/album model.
//!
//! A media item arrives as a `CPLMaster` (the immutable upload) joined with
//! a `CPLAsset` (the user-visible state, including adjustments). One joined
//! pair yields up to three local assets: the original, an edited rendition,
//! and the video complement of a live photo.

use base64::Engine;
use serde_json::Value;

use crate::library::asset::{ext_for_file_type, Asset, AssetOrigin};

/// Remote record pair for one media item.
#[derive(Debug, Clone)]
pub struct CplRecordPair {
    pub master: Value,
    pub asset: Value,
}

/// Remote album node as parsed from a `CPLAlbum` record.
#[derive(Debug, Clone)]
pub struct RemoteAlbum {
    pub uuid: String,
    pub display_name: String,
    /// `None` for a child of the root folder.
    pub parent_uuid: Option<String>,
    pub folder: bool,
    /// Record names of contained assets; filled in per-album for non-folders.
    pub asset_record_names: Vec<String>,
}

/// CloudKit album type discriminants.
const ALBUM_TYPE_ALBUM: i64 = 0;
const ALBUM_TYPE_FOLDER: i64 = 3;

/// The synthetic root folder record; never materialized locally.
pub const ROOT_FOLDER: &str = "----Root-Folder----";
pub const PROJECT_ROOT_FOLDER: &str = "----Project-Root-Folder----";

/// Resource prefixes per origin: where in the record pair each rendition's
/// resource and file type live.
const VERSION_LOOKUP: &[(AssetOrigin, &str, RecordSide)] = &[
    (AssetOrigin::Original, "resOriginal", RecordSide::Master),
    (AssetOrigin::Edit, "resJPEGFull", RecordSide::Asset),
    (AssetOrigin::Edit, "resVidFull", RecordSide::Asset),
    (AssetOrigin::Live, "resOriginalVidCompl", RecordSide::Master),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordSide {
    Master,
    Asset,
}

fn field_str<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    record["fields"][field]["value"].as_str()
}

fn decode_b64_field(record: &Value, field: &str) -> Option<String> {
    let enc = field_str(record, field)?;
    let decoded = base64::engine::general_purpose::STANDARD.decode(enc).ok()?;
    String::from_utf8(decoded).ok()
}

/// Expand one record pair into its downloadable assets. Records with an
/// unknown file type or a missing resource are skipped, reported through
/// `skipped`.
pub fn assets_from_pair(pair: &CplRecordPair, skipped: &mut Vec<String>) -> Vec<Asset> {
    let record_name = pair.master["recordName"].as_str().unwrap_or_default();
    if record_name.is_empty() {
        skipped.push("<missing recordName>".to_string());
        return Vec::new();
    }

    let remote_filename = match decode_b64_field(&pair.master, "filenameEnc") {
        Some(name) => name,
        None => {
            skipped.push(record_name.to_string());
            return Vec::new();
        }
    };

    let modified = pair.asset["fields"]["assetDate"]["value"]
        .as_i64()
        .or_else(|| pair.master["fields"]["addedDate"]["value"].as_i64())
        .unwrap_or(0);
    let favorite = pair.asset["fields"]["isFavorite"]["value"]
        .as_i64()
        .unwrap_or(0)
        == 1;
    let adjusted = !pair.asset["fields"]["adjustmentType"]["value"].is_null();

    let mut out = Vec::new();
    let mut seen_edit = false;
    for &(origin, prefix, side) in VERSION_LOOKUP {
        if origin == AssetOrigin::Edit && (!adjusted || seen_edit) {
            continue;
        }
        let record = match side {
            RecordSide::Master => &pair.master,
            RecordSide::Asset => &pair.asset,
        };
        let res = &record["fields"][format!("{prefix}Res")]["value"];
        if res.is_null() {
            continue;
        }
        let file_type = field_str(record, &format!("{prefix}FileType")).unwrap_or_default();
        let ext = match ext_for_file_type(file_type) {
            Some(ext) => ext,
            None => {
                tracing::warn!(
                    "Skipping {} rendition of {}: unknown file type '{}'",
                    prefix,
                    record_name,
                    file_type
                );
                skipped.push(record_name.to_string());
                continue;
            }
        };
        let checksum = match res["fileChecksum"].as_str() {
            Some(c) => c.to_string(),
            None => {
                skipped.push(record_name.to_string());
                continue;
            }
        };

        out.push(Asset {
            record_name: record_name.to_string(),
            file_checksum: checksum,
            size: res["size"].as_u64().unwrap_or(0),
            modified,
            ext,
            remote_filename: remote_filename.clone(),
            wrapping_key: res["wrappingKey"].as_str().map(str::to_string),
            reference_checksum: res["referenceChecksum"].as_str().map(str::to_string),
            download_url: res["downloadURL"].as_str().map(str::to_string),
            origin,
            favorite,
        });

        if origin == AssetOrigin::Edit {
            // A pair carries at most one edited rendition (photo or video).
            seen_edit = true;
        }
    }
    out
}

/// Join a flat record list into master/asset pairs keyed by the master's
/// record name, the way the query layer receives them.
pub fn join_records(records: Vec<Value>) -> Vec<CplRecordPair> {
    let mut asset_by_master: std::collections::HashMap<String, Value> =
        std::collections::HashMap::new();
    let mut masters: Vec<Value> = Vec::new();

    for record in records {
        match record["recordType"].as_str() {
            Some("CPLAsset") => {
                if let Some(master_id) = record["fields"]["masterRef"]["value"]["recordName"]
                    .as_str()
                    .map(str::to_string)
                {
                    asset_by_master.insert(master_id, record);
                }
            }
            Some("CPLMaster") => masters.push(record),
            _ => {}
        }
    }

    masters
        .into_iter()
        .filter_map(|master| {
            let name = master["recordName"].as_str()?.to_string();
            let asset = asset_by_master.remove(&name)?;
            Some(CplRecordPair { master, asset })
        })
        .collect()
}

/// Parse one `CPLAlbum` record. Deleted albums and the synthetic roots
/// return `None`.
pub fn album_from_record(record: &Value) -> Option<RemoteAlbum> {
    let uuid = record["recordName"].as_str()?.to_string();
    if uuid == ROOT_FOLDER || uuid == PROJECT_ROOT_FOLDER {
        return None;
    }
    if record["fields"]["isDeleted"]["value"].as_bool().unwrap_or(false)
        || record["fields"]["isDeleted"]["value"].as_i64().unwrap_or(0) == 1
    {
        return None;
    }

    let album_type = record["fields"]["albumType"]["value"].as_i64()?;
    let folder = match album_type {
        ALBUM_TYPE_ALBUM => false,
        ALBUM_TYPE_FOLDER => true,
        other => {
            tracing::debug!("Ignoring album {} of unsupported type {}", uuid, other);
            return None;
        }
    };

    let display_name = decode_b64_field(record, "albumNameEnc").unwrap_or_else(|| uuid.clone());
    let parent_uuid = field_str(record, "parentId")
        .filter(|p| !p.is_empty() && *p != ROOT_FOLDER && *p != PROJECT_ROOT_FOLDER)
        .map(str::to_string);

    Some(RemoteAlbum {
        uuid,
        display_name,
        parent_uuid,
        folder,
        asset_record_names: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    fn pair(adjusted: bool, live: bool) -> CplRecordPair {
        let mut master_fields = json!({
            "filenameEnc": {"value": b64("IMG_0001.HEIC"), "type": "ENCRYPTED_BYTES"},
            "resOriginalRes": {"value": {
                "size": 1000,
                "fileChecksum": "YWFh",
                "wrappingKey": "a2V5",
                "referenceChecksum": "cmVm",
                "downloadURL": "https://cvws.icloud-content.com/x",
            }},
            "resOriginalFileType": {"value": "public.heic"},
        });
        if live {
            master_fields["resOriginalVidComplRes"] = json!({"value": {
                "size": 500,
                "fileChecksum": "bGl2",
                "downloadURL": "https://cvws.icloud-content.com/live",
            }});
            master_fields["resOriginalVidComplFileType"] = json!({"value": "com.apple.quicktime-movie"});
        }

        let mut asset_fields = json!({
            "assetDate": {"value": 1_600_000_000_000i64},
            "isFavorite": {"value": 1},
            "masterRef": {"value": {"recordName": "REC1"}},
        });
        if adjusted {
            asset_fields["adjustmentType"] = json!({"value": "com.apple.photo"});
            asset_fields["resJPEGFullRes"] = json!({"value": {
                "size": 800,
                "fileChecksum": "ZWRt",
                "downloadURL": "https://cvws.icloud-content.com/edit",
            }});
            asset_fields["resJPEGFullFileType"] = json!({"value": "public.jpeg"});
        }

        CplRecordPair {
            master: json!({"recordName": "REC1", "recordType": "CPLMaster", "fields": master_fields}),
            asset: json!({"recordName": "A-REC1", "recordType": "CPLAsset", "fields": asset_fields}),
        }
    }

    #[test]
    fn plain_pair_yields_one_original() {
        let mut skipped = Vec::new();
        let assets = assets_from_pair(&pair(false, false), &mut skipped);
        assert_eq!(assets.len(), 1);
        let a = &assets[0];
        assert_eq!(a.origin, AssetOrigin::Original);
        assert_eq!(a.record_name, "REC1");
        assert_eq!(a.ext, "heic");
        assert_eq!(a.remote_filename, "IMG_0001.HEIC");
        assert_eq!(a.size, 1000);
        assert_eq!(a.modified, 1_600_000_000_000);
        assert!(a.favorite);
        assert!(skipped.is_empty());
    }

    #[test]
    fn adjusted_pair_adds_edit_rendition() {
        let mut skipped = Vec::new();
        let assets = assets_from_pair(&pair(true, false), &mut skipped);
        assert_eq!(assets.len(), 2);
        let edit = assets.iter().find(|a| a.origin == AssetOrigin::Edit).unwrap();
        assert_eq!(edit.ext, "jpg");
        assert_eq!(edit.file_checksum, "ZWRt");
        assert_eq!(edit.size, 800);
    }

    #[test]
    fn live_pair_adds_video_complement() {
        let mut skipped = Vec::new();
        let assets = assets_from_pair(&pair(false, true), &mut skipped);
        assert_eq!(assets.len(), 2);
        let live = assets.iter().find(|a| a.origin == AssetOrigin::Live).unwrap();
        assert_eq!(live.ext, "mov");
        assert_eq!(live.file_checksum, "bGl2");
    }

    #[test]
    fn unknown_file_type_is_skipped_not_fatal() {
        let mut p = pair(false, false);
        p.master["fields"]["resOriginalFileType"]["value"] = json!("public.unheard-of");
        let mut skipped = Vec::new();
        let assets = assets_from_pair(&p, &mut skipped);
        assert!(assets.is_empty());
        assert_eq!(skipped, vec!["REC1".to_string()]);
    }

    #[test]
    fn join_matches_asset_to_master() {
        let p = pair(false, false);
        let records = vec![p.asset.clone(), p.master.clone()];
        let joined = join_records(records);
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].master["recordName"], "REC1");

        // A master without its asset record is dropped.
        let lonely = vec![pair(false, false).master];
        assert!(join_records(lonely).is_empty());
    }

    fn album_record(uuid: &str, name: &str, album_type: i64, parent: Option<&str>) -> Value {
        let mut fields = json!({
            "albumNameEnc": {"value": b64(name)},
            "albumType": {"value": album_type},
        });
        if let Some(p) = parent {
            fields["parentId"] = json!({"value": p});
        }
        json!({"recordName": uuid, "recordType": "CPLAlbum", "fields": fields})
    }

    #[test]
    fn album_parsing_maps_types_and_parent() {
        let album = album_from_record(&album_record("U1", "Family", 0, Some("U2"))).unwrap();
        assert!(!album.folder);
        assert_eq!(album.display_name, "Family");
        assert_eq!(album.parent_uuid.as_deref(), Some("U2"));

        let folder = album_from_record(&album_record("U2", "People", 3, None)).unwrap();
        assert!(folder.folder);
        assert_eq!(folder.parent_uuid, None);
    }

    #[test]
    fn root_parent_is_normalized_to_none() {
        let album =
            album_from_record(&album_record("U1", "Family", 0, Some(ROOT_FOLDER))).unwrap();
        assert_eq!(album.parent_uuid, None);
    }

    #[test]
    fn deleted_and_root_records_are_ignored() {
        let mut deleted = album_record("U1", "Family", 0, None);
        deleted["fields"]["isDeleted"] = json!({"value": 1});
        assert!(album_from_record(&deleted).is_none());
        assert!(album_from_record(&album_record(ROOT_FOLDER, "root", 3, None)).is_none());
    }

    #[test]
    fn unsupported_album_type_is_ignored()  {
        assert!(album_from_record(&album_record("U9", "Smart", 6, None)).is_none());
    }
}
