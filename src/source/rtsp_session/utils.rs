use url::Url;

use super::SessionError;

pub struct SessionUrlBuilder {
    host: String,
    port: u16,
    path: String,
}

impl SessionUrlBuilder {
    pub fn with_host(mut self, val: String) -> Self {
        self.host = val;
        self
    }
    pub fn with_port(mut self, val: u16) -> Self {
        self.port = val;
        self
    }
    pub fn with_path(mut self, val: String) -> Self {
        self.path = val;
        self
    }

    pub fn build(self) -> Result<Url, SessionError> {
        if self.host.is_empty() {
            return Err(SessionError::UnsetParameter(
                "Necessary parameter unset: host".to_string(),
            ));
        }
        let path = self.path.trim_start_matches('/');

        Url::parse(&format!("rtsp://{}:{}/{}", self.host, self.port, path))
            .map_err(|_| SessionError::UrlParseError)
    }
}

impl Default for SessionUrlBuilder {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 554,
            path: String::new(),
        }
    }
}
