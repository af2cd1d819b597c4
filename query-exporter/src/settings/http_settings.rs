use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for HttpServerSettings {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 9161 }
    }
}

impl HttpServerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
