/// Apple account endpoint constants. The photos endpoint is not listed
/// here; it is user-specific and discovered during setup.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub auth: &'static str,
    pub home: &'static str,
    pub setup: &'static str,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth: "https://idmsa.apple.com/appleauth/auth",
            home: "https://www.icloud.com",
            setup: "https://setup.icloud.com/setup/ws/1",
        }
    }
}
