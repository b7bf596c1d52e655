// user agent used for outgoing HTTP(s) requests to upstream tool servers
pub const REQUEST_USER_AGENT: &str = "toolgate/1";

// default bind address for the gateway listener
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8000";

// key_name under which tenant bearer credentials are stored
pub const CREDENTIAL_KEY_BEARER: &str = "bearer";

// constants used to build the emitted OpenAPI document
pub const OPENAPI_INFO_TITLE: &str = "Toolgate";
pub const OPENAPI_INFO_VERSION: &str = env!("CARGO_PKG_VERSION");

// meta-tools search bounds
pub const SEARCH_DEFAULT_TOP_K: usize = 10;
pub const SEARCH_MAX_TOP_K: usize = 50;
