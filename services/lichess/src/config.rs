use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LichessConfig {
    pub server: Server,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub socket_path: String,
    pub frame_payload_cap: u16,
    pub api_base_url: String,
}

impl Default for LichessConfig {
    fn default() -> LichessConfig {
        LichessConfig {
            server: Server {
                socket_path: "/run/uzenet/lichess.sock".to_string(),
                frame_payload_cap: 256,
                api_base_url: "https://lichess.org".to_string(),
            },
        }
    }
}

impl LichessConfig {
    pub fn load(path: &str) -> Result<LichessConfig, serdeconv::Error> {
        serdeconv::from_toml_file(path)
    }
}
