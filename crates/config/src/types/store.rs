use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// `trustee` from spec.md §6: connection details for the secret broker.
#[derive(Debug, Clone, Deserialize)]
pub struct TrusteeConfig {
    pub internal_url: String,
    pub username: String,
    pub password: String,
}

/// `mongo` from spec.md §6. The persistent document store is out of scope (spec.md §1); this
/// struct exists so the configuration surface round-trips a real deployment's config file, but
/// `cc_store`'s in-memory gateway never reads it. See DESIGN.md.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct MongoConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db: String,
    pub username: String,
    pub password: String,
}
