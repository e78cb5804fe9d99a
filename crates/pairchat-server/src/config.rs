use std::path::PathBuf;

use pairchat_engine::activity::DEFAULT_ACTIVITY_CAPACITY;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Static site root (index.html, chat.html, setup.html, assets).
    pub public_dir: PathBuf,
    /// Where uploaded media is written and served from under `/uploads`.
    pub uploads_dir: PathBuf,
    pub max_upload_bytes: usize,
    /// Outbound frames buffered per socket before new ones are dropped.
    pub max_send_queue: usize,
    /// Disconnect records kept for `/user-activity`.
    pub activity_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            public_dir: PathBuf::from("public"),
            uploads_dir: PathBuf::from("public").join("uploads"),
            max_upload_bytes: 10 * 1024 * 1024,
            max_send_queue: 256,
            activity_capacity: DEFAULT_ACTIVITY_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
