//! OAuth2 / OpenID Connect protocol constants
//!
//! Parameter values and header values shared by the grant functions and the
//! flow orchestrator. Nothing here is client specific; client identifiers and
//! endpoint paths live in `OAuthConfig`.

/// Storage key used for the persisted token when none is configured
pub const DEFAULT_STORAGE_KEY: &str = "token";

/// Scope applied by discovery when the config carries none
pub const DEFAULT_OPENID_SCOPE: &str = "openid";

/// Well-known discovery document path, appended to `issuer_path`
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Content type of every grant POST body
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Content type of requests made through the authorized client
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// `grant_type` values sent to the token endpoint
pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_PASSWORD: &str = "password";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";

/// `response_type` values accepted by the authorization endpoint
pub const RESPONSE_TYPE_CODE: &str = "code";
pub const RESPONSE_TYPE_TOKEN: &str = "token";

/// PKCE challenge method advertised in the authorization URL
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// Length of the random nonce bound to OpenID authentication requests
pub const NONCE_LENGTH: usize = 10;

/// Length of the PKCE code verifier (RFC 7636 allows 43-128)
pub const VERIFIER_LENGTH: usize = 48;

/// Error written into the token when the `id_token` nonce does not match
pub const INVALID_NONCE: &str = "Invalid nonce";

/// Error written into the token when a 401 carries no OAuth error body
pub const UNAUTHORIZED: &str = "unauthorized";
