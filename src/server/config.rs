use super::RequestsLoggingLevel;

#[derive(Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// First path segment of download URLs; the segment after it is the
    /// token.
    pub download_route_prefix: String,
    /// Where the browser is sent when a gated download has no session.
    pub login_path: String,
    /// Path to the frontend directory to be statically served.
    pub frontend_dir_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3001,
            download_route_prefix: "secure-download".to_owned(),
            login_path: "/login".to_owned(),
            frontend_dir_path: None,
        }
    }
}
