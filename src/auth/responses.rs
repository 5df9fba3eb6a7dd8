//! Typed views of the account setup response. Only the fields the client
//! consumes; Apple sends far more.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupResponse {
    pub ds_info: Option<DsInfo>,
    pub webservices: Option<Webservices>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DsInfo {
    /// Directory-services ID; arrives as a string or a number depending on
    /// the endpoint.
    pub dsid: Option<serde_json::Value>,
}

impl DsInfo {
    pub fn dsid_string(&self) -> Option<String> {
        match &self.dsid {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webservices {
    pub ckdatabasews: Option<ServiceEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceEndpoint {
    pub url: String,
    pub status: Option<String>,
}

impl SetupResponse {
    /// The per-user photos service root, when the account has one.
    pub fn photos_url(&self) -> Option<&str> {
        self.webservices
            .as_ref()
            .and_then(|ws| ws.ckdatabasews.as_ref())
            .map(|ep| ep.url.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_fields_we_need() {
        let body = serde_json::json!({
            "dsInfo": {"dsid": "123456", "fullName": "A User"},
            "webservices": {
                "ckdatabasews": {
                    "url": "https://p42-ckdatabasews.icloud.com:443",
                    "status": "active",
                },
                "docws": {"url": "https://p42-docws.icloud.com:443"},
            },
            "requestInfo": {"country": "DE"},
        });
        let parsed: SetupResponse = serde_json::from_value(body).unwrap();
        assert_eq!(
            parsed.photos_url(),
            Some("https://p42-ckdatabasews.icloud.com:443")
        );
        assert_eq!(
            parsed.ds_info.as_ref().unwrap().dsid_string().as_deref(),
            Some("123456")
        );
    }

    #[test]
    fn numeric_dsid_is_normalized() {
        let parsed: SetupResponse =
            serde_json::from_value(serde_json::json!({"dsInfo": {"dsid": 99}})).unwrap();
        assert_eq!(
            parsed.ds_info.as_ref().unwrap().dsid_string().as_deref(),
            Some("99")
        );
    }

    #[test]
    fn missing_photos_service_is_none() {
        let parsed: SetupResponse =
            serde_json::from_value(serde_json::json!({"webservices": {}})).unwrap();
        assert!(parsed.photos_url().is_none());
    }
}
