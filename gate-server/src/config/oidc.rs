//! OpenID Connect provider configuration

use crate::clients::ClientConfiguration;
use confique::Config;

/// OpenID Connect provider configuration
#[derive(Debug, Config, Clone)]
pub struct OidcConfig {
    /// Login portal path the browser is sent to for re-authentication (default: /)
    #[config(env = "GATE_OIDC_PORTAL_PATH", default = "/")]
    pub portal_path: String,

    /// Consent page path (default: /consent)
    #[config(env = "GATE_OIDC_CONSENT_PATH", default = "/consent")]
    pub consent_path: String,

    /// Authorization code lifetime in seconds (default: 600 = 10 minutes)
    #[config(env = "GATE_OIDC_CODE_TTL", default = 600)]
    pub code_ttl: u64,

    /// Registered clients, read from the configuration file only
    #[config(default = [])]
    pub clients: Vec<ClientConfiguration>,
}
