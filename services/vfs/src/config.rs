use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VfsConfig {
    pub server: Server,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub socket_path: String,
    pub quota_root: String,
    pub frame_payload_cap: u16,
}

impl Default for VfsConfig {
    fn default() -> VfsConfig {
        VfsConfig {
            server: Server {
                socket_path: "/run/uzenet/fatfs.sock".to_string(),
                quota_root: "/var/lib/uzenet/vfs".to_string(),
                frame_payload_cap: 256,
            },
        }
    }
}

impl VfsConfig {
    pub fn load(path: &str) -> Result<VfsConfig, serdeconv::Error> {
        serdeconv::from_toml_file(path)
    }
}
