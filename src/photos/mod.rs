//! Typed query layer over the private CloudKit-style photos API.
//!
//! All queries go to `<photosDomain>/database/1/com.apple.photos.cloud/
//! production/private` against the `PrimarySync` zone, paginated with the
//! server's continuation marker. The server enforces a hard per-query
//! record ceiling; listings that approach it are sharded by album UUID
//! instead of trusting pagination alone.

pub mod error;
pub mod records;

use std::borrow::Cow;
use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::events::{EventSink, Report};
use crate::library::asset::Asset;
use error::QueryError;
use records::{album_from_record, assets_from_pair, join_records, RemoteAlbum};

/// Page size for record queries.
const PAGE_SIZE: usize = 200;

/// Observed server-side ceiling on records returned by one logical query.
pub const RECORD_QUERY_CEILING: u64 = 66_000;

/// Desired keys for asset listings. Only the fields the sync engine
/// consumes; the private API returns everything otherwise.
const ASSET_DESIRED_KEYS: &[&str] = &[
    "recordName",
    "recordType",
    "recordChangeTag",
    "masterRef",
    "filenameEnc",
    "assetDate",
    "addedDate",
    "isFavorite",
    "isDeleted",
    "isExpunged",
    "adjustmentType",
    "resOriginalRes",
    "resOriginalFileType",
    "resOriginalVidComplRes",
    "resOriginalVidComplFileType",
    "resJPEGFullRes",
    "resJPEGFullFileType",
    "resVidFullRes",
    "resVidFullFileType",
];

const MEMBERSHIP_DESIRED_KEYS: &[&str] = &["recordName", "recordType", "masterRef"];

/// Hook the query layer pulls when a request comes back 401: the auth
/// machine re-authenticates and hands back a client with fresh cookies.
#[async_trait]
pub trait Reauthenticate: Send + Sync {
    async fn refresh_session(&self) -> Result<reqwest::Client, String>;
}

/// Everything one remote enumeration yields: the downloadable assets plus
/// the per-item handles needed for remote deletion and URL refresh.
#[derive(Debug, Default)]
pub struct AssetFetch {
    pub assets: Vec<Asset>,
    /// master record name → (CPLAsset record name, change tag).
    pub handles: HashMap<String, AssetHandle>,
}

#[derive(Debug, Clone)]
pub struct AssetHandle {
    pub asset_record_name: String,
    pub change_tag: String,
}

pub struct PhotosClient {
    client: RwLock<reqwest::Client>,
    endpoint: String,
    params: HashMap<String, Value>,
    reauth: Option<std::sync::Arc<dyn Reauthenticate>>,
}

impl PhotosClient {
    /// `photos_url` is the per-user service root discovered during setup.
    pub fn new(
        photos_url: &str,
        client: reqwest::Client,
        dsid: Option<String>,
        reauth: Option<std::sync::Arc<dyn Reauthenticate>>,
    ) -> Self {
        let mut params = HashMap::new();
        params.insert(
            "clientBuildNumber".to_string(),
            Value::String("2522Project44".to_string()),
        );
        params.insert(
            "clientMasteringNumber".to_string(),
            Value::String("2522B2".to_string()),
        );
        params.insert("remapEnums".to_string(), Value::Bool(true));
        params.insert("getCurrentSyncToken".to_string(), Value::Bool(true));
        if let Some(dsid) = dsid {
            params.insert("dsid".to_string(), Value::String(dsid));
        }

        Self {
            client: RwLock::new(client),
            endpoint: format!(
                "{}/database/1/com.apple.photos.cloud/production/private",
                photos_url.trim_end_matches('/')
            ),
            params,
            reauth,
        }
    }

    fn zone_id() -> Value {
        json!({"zoneName": "PrimarySync"})
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}?{}", self.endpoint, path, encode_params(&self.params))
    }

    /// POST a JSON body, re-authenticating and retrying once on a 401.
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, QueryError> {
        let url = self.url(path);
        for attempt in 0..2 {
            let client = self.client.read().await.clone();
            tracing::debug!("POST {}", url);
            let response = client
                .post(&url)
                .header("Content-Type", "text/plain")
                .body(body.to_string())
                .send()
                .await?;

            let status = response.status().as_u16();
            if status == 401 {
                match (&self.reauth, attempt) {
                    (Some(reauth), 0) => {
                        tracing::warn!("Photos session expired, re-authenticating");
                        let fresh = reauth
                            .refresh_session()
                            .await
                            .map_err(QueryError::Reauth)?;
                        *self.client.write().await = fresh;
                        continue;
                    }
                    _ => return Err(QueryError::Unauthorized),
                }
            }
            if !(200..300).contains(&status) {
                return Err(QueryError::HttpStatus(status));
            }
            let text = response.text().await?;
            return Ok(serde_json::from_str(&text)?);
        }
        unreachable!("second attempt always returns")
    }

    /// Warm-up query gating READY: the remote index must be built before
    /// any listing is trustworthy.
    pub async fn check_indexing_state(&self) -> Result<(), QueryError> {
        let body = json!({
            "query": {"recordType": "CheckIndexingState"},
            "zoneID": Self::zone_id(),
        });
        let response = self.post_json("records/query", &body).await?;
        let state = response["records"][0]["fields"]["state"]["value"]
            .as_str()
            .ok_or_else(|| {
                QueryError::UnexpectedResponse("CheckIndexingState without state".into())
            })?;
        if state != "FINISHED" {
            return Err(QueryError::IndexingInProgress);
        }
        Ok(())
    }

    /// One logical record query, paginated via the continuation marker
    /// until the server stops returning one.
    pub async fn query(
        &self,
        record_type: &str,
        filter_by: Option<Value>,
        desired_keys: Option<&[&str]>,
    ) -> Result<Vec<Value>, QueryError> {
        let mut out: Vec<Value> = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = json!({"recordType": record_type});
            if let Some(filter) = &filter_by {
                query["filterBy"] = filter.clone();
            }
            let mut body = json!({
                "query": query,
                "resultsLimit": PAGE_SIZE,
                "zoneID": Self::zone_id(),
            });
            if let Some(keys) = desired_keys {
                body["desiredKeys"] = json!(keys);
            }
            if let Some(marker) = &continuation {
                body["continuationMarker"] = json!(marker);
            }

            let mut response = self.post_json("records/query", &body).await?;
            let records = match response.get_mut("records").and_then(|r| r.as_array_mut()) {
                Some(r) => std::mem::take(r),
                None => break,
            };
            if records.is_empty() {
                break;
            }
            out.extend(records);

            continuation = response["continuationMarker"]
                .as_str()
                .map(str::to_string);
            if continuation.is_none() {
                break;
            }
            if out.len() as u64 >= RECORD_QUERY_CEILING {
                tracing::warn!(
                    "Query {} hit the {} record ceiling; results may be truncated",
                    record_type,
                    RECORD_QUERY_CEILING
                );
                break;
            }
        }
        tracing::debug!("Query {} returned {} records", record_type, out.len());
        Ok(out)
    }

    /// Server-side item count for an indexed object type, via the batch
    /// lookup endpoint.
    pub async fn indexed_count(&self, obj_type: &str) -> Result<u64, QueryError> {
        let body = json!({
            "batch": [{
                "resultsLimit": 1,
                "query": {
                    "filterBy": {
                        "fieldName": "indexCountID",
                        "fieldValue": {"type": "STRING_LIST", "value": [obj_type]},
                        "comparator": "IN",
                    },
                    "recordType": "HyperionIndexCountLookup",
                },
                "zoneWide": true,
                "zoneID": Self::zone_id(),
            }]
        });
        let response = self.post_json("internal/records/query/batch", &body).await?;
        Ok(
            response["batch"][0]["records"][0]["fields"]["itemCount"]["value"]
                .as_u64()
                .unwrap_or(0),
        )
    }

    /// Enumerate every asset in the library: the full listing joined with
    /// the expunged list, sharded per album when the indexed count
    /// approaches the record ceiling.
    pub async fn fetch_all_assets(
        &self,
        albums: &[RemoteAlbum],
        events: &EventSink,
    ) -> Result<AssetFetch, QueryError> {
        let count = self
            .indexed_count("CPLAssetByAssetDateWithoutHiddenOrDeleted")
            .await
            .unwrap_or(0);

        let (mut listed, deleted) = tokio::try_join!(
            self.query(
                "CPLAssetAndMasterInSmartAlbumByAssetDate",
                None,
                Some(ASSET_DESIRED_KEYS),
            ),
            self.query("CPLAssetDeletedByExpungedDate", None, None),
        )?;

        if count >= RECORD_QUERY_CEILING {
            events.warn(
                Report::new("ICLOUD_WARNING", "Library exceeds the per-query record ceiling, sharding by album")
                    .with("count", count),
            );
            for album in albums.iter().filter(|a| !a.folder) {
                let shard = self
                    .query(
                        "CPLContainerRelationLiveByAssetDate",
                        Some(parent_filter(&album.uuid)),
                        Some(ASSET_DESIRED_KEYS),
                    )
                    .await?;
                listed.extend(shard);
            }
        }

        let expunged: HashSet<String> = deleted
            .iter()
            .filter_map(|r| r["recordName"].as_str().map(str::to_string))
            .collect();

        let mut fetch = AssetFetch::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut skipped = Vec::new();
        for pair in join_records(listed) {
            let master_name = pair.master["recordName"].as_str().unwrap_or_default();
            if master_name.is_empty() || !seen.insert(master_name.to_string()) {
                continue;
            }
            if expunged.contains(master_name) {
                continue;
            }
            if let (Some(name), Some(tag)) = (
                pair.asset["recordName"].as_str(),
                pair.asset["recordChangeTag"].as_str(),
            ) {
                fetch.handles.insert(
                    master_name.to_string(),
                    AssetHandle {
                        asset_record_name: name.to_string(),
                        change_tag: tag.to_string(),
                    },
                );
            }
            fetch.assets.extend(assets_from_pair(&pair, &mut skipped));
        }

        for record_name in skipped {
            events.warn(
                Report::new("ICLOUD_WARNING", "Skipped unparsable asset record")
                    .with("recordName", record_name),
            );
        }

        tracing::info!("Remote library lists {} assets", fetch.assets.len());
        Ok(fetch)
    }

    /// Enumerate the album hierarchy, depth-first from the root folder,
    /// with a visited set against accidental cycles. Fills in each plain
    /// album's asset membership.
    pub async fn fetch_all_albums(&self, events: &EventSink) -> Result<Vec<RemoteAlbum>, QueryError> {
        let raw = self.query("CPLAlbumByPositionLive", None, None).await?;

        let mut parsed: Vec<RemoteAlbum> = raw.iter().filter_map(album_from_record).collect();
        let mut by_parent: HashMap<Option<String>, Vec<usize>> = HashMap::new();
        for (idx, album) in parsed.iter().enumerate() {
            by_parent
                .entry(album.parent_uuid.clone())
                .or_default()
                .push(idx);
        }

        // Depth-first from the root, dropping nodes never reached (their
        // parent chain is broken or cyclic).
        let mut visited: HashSet<String> = HashSet::new();
        let mut order: Vec<usize> = Vec::new();
        let mut stack: VecDeque<Option<String>> = VecDeque::new();
        stack.push_back(None);
        while let Some(parent) = stack.pop_back() {
            for &idx in by_parent.get(&parent).into_iter().flatten() {
                let uuid = parsed[idx].uuid.clone();
                if !visited.insert(uuid.clone()) {
                    events.warn(
                        Report::new("ICLOUD_WARNING", "Cycle in remote album hierarchy, skipping repeat visit")
                            .with("uuid", &uuid),
                    );
                    continue;
                }
                order.push(idx);
                stack.push_back(Some(uuid));
            }
        }

        if order.len() < parsed.len() {
            events.warn(
                Report::new("ICLOUD_WARNING", "Unreachable albums in remote hierarchy")
                    .with("total", parsed.len())
                    .with("reachable", order.len()),
            );
        }

        for idx in &order {
            if parsed[*idx].folder {
                continue;
            }
            let uuid = parsed[*idx].uuid.clone();
            let members = self
                .query(
                    "CPLContainerRelationLiveByAssetDate",
                    Some(parent_filter(&uuid)),
                    Some(MEMBERSHIP_DESIRED_KEYS),
                )
                .await?;
            parsed[*idx].asset_record_names = members
                .iter()
                .filter(|r| r["recordType"] == "CPLMaster")
                .filter_map(|r| r["recordName"].as_str().map(str::to_string))
                .collect();
        }

        let albums: Vec<RemoteAlbum> = {
            let mut keep: Vec<Option<RemoteAlbum>> = parsed.into_iter().map(Some).collect();
            order.iter().filter_map(|idx| keep[*idx].take()).collect()
        };
        tracing::info!("Remote library lists {} albums", albums.len());
        Ok(albums)
    }

    /// Re-fetch one logical asset to refresh its short-lived download URLs.
    pub async fn refetch_asset(
        &self,
        master_record_name: &str,
        handle: Option<&AssetHandle>,
    ) -> Result<Vec<Asset>, QueryError> {
        let mut lookup = vec![json!({"recordName": master_record_name})];
        if let Some(h) = handle {
            lookup.push(json!({"recordName": h.asset_record_name}));
        }
        let body = json!({
            "records": lookup,
            "zoneID": Self::zone_id(),
        });
        let response = self.post_json("records/lookup", &body).await?;
        let records = response["records"].as_array().cloned().unwrap_or_default();
        let mut skipped = Vec::new();
        let assets = join_records(records)
            .iter()
            .flat_map(|pair| assets_from_pair(pair, &mut skipped))
            .collect();
        Ok(assets)
    }

    /// Stream the bytes of one asset. Returns the raw response; the sync
    /// engine consumes it into the store.
    pub async fn download_asset(&self, url: &str) -> Result<reqwest::Response, QueryError> {
        let client = self.client.read().await.clone();
        let response = client.get(url).send().await?;
        let status = response.status().as_u16();
        match status {
            200..=299 => Ok(response),
            401 => Err(QueryError::Unauthorized),
            n => Err(QueryError::HttpStatus(n)),
        }
    }

    /// Refresh the session eagerly, e.g. between whole-sync retry
    /// attempts. A no-op without a re-auth hook.
    pub async fn force_reauth(&self) -> Result<(), QueryError> {
        if let Some(reauth) = &self.reauth {
            let fresh = reauth.refresh_session().await.map_err(QueryError::Reauth)?;
            *self.client.write().await = fresh;
        }
        Ok(())
    }

    /// Mark the given logical assets deleted remotely (archive opt-in).
    pub async fn delete_assets(&self, handles: &[AssetHandle]) -> Result<(), QueryError> {
        if handles.is_empty() {
            return Ok(());
        }
        let operations: Vec<Value> = handles
            .iter()
            .map(|h| {
                json!({
                    "operationType": "update",
                    "record": {
                        "recordName": h.asset_record_name,
                        "recordType": "CPLAsset",
                        "recordChangeTag": h.change_tag,
                        "fields": {"isDeleted": {"value": 1}},
                    },
                })
            })
            .collect();
        let body = json!({
            "operations": operations,
            "zoneID": Self::zone_id(),
            "atomic": true,
        });
        let response = self.post_json("records/modify", &body).await?;
        // Per-record failures come back inline with 200.
        if let Some(records) = response["records"].as_array() {
            for record in records {
                if let Some(reason) = record["serverErrorCode"].as_str() {
                    return Err(QueryError::UnexpectedResponse(format!(
                        "Delete of {} rejected: {}",
                        record["recordName"].as_str().unwrap_or("?"),
                        reason
                    )));
                }
            }
        }
        tracing::info!("Deleted {} remote assets", handles.len());
        Ok(())
    }
}

fn parent_filter(parent_uuid: &str) -> Value {
    json!([{
        "fieldName": "parentId",
        "comparator": "EQUALS",
        "fieldValue": {"type": "STRING", "value": parent_uuid},
    }])
}

fn encode_params(params: &HashMap<String, Value>) -> String {
    let mut pairs: Vec<String> = params
        .iter()
        .map(|(k, v)| {
            let val: Cow<'_, str> = match v {
                Value::String(s) => Cow::Borrowed(s.as_str()),
                other => Cow::Owned(other.to_string()),
            };
            format!("{}={}", urlencoding::encode(k), urlencoding::encode(&val))
        })
        .collect();
    pairs.sort();
    pairs.join("&")
}
