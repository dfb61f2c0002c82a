use serde_derive::{Deserialize, Serialize};
use serdeconv;
use std::path::Path;

pub const DEFAULT_GAME_PORT: u16 = 28008;
pub const DEFAULT_TELNET_PORT: u16 = 23;

#[derive(Serialize, Deserialize)]
pub struct Server {
    pub game_address: String,
    pub telnet_address: String,
    pub max_clients: u16,
    pub tick_hz: u32,
}

#[derive(Serialize, Deserialize)]
pub struct Services {
    pub identity_socket: String,
    pub users_csv: String,
    pub backend_sockets: Vec<(String, String)>,
}

#[derive(Serialize, Deserialize)]
pub struct RoomConfig {
    pub server: Server,
    pub services: Services,
}

impl Default for RoomConfig {
    fn default() -> RoomConfig {
        RoomConfig {
            server: Server {
                game_address: format!("0.0.0.0:{}", DEFAULT_GAME_PORT),
                telnet_address: format!("0.0.0.0:{}", DEFAULT_TELNET_PORT),
                max_clients: 256,
                tick_hz: 20,
            },
            services: Services {
                identity_socket: "/run/uzenet/identity.sock".to_string(),
                users_csv: "/var/lib/uzenet/users.csv".to_string(),
                backend_sockets: vec![
                    ("fatfs".to_string(), "/run/uzenet/fatfs.sock".to_string()),
                    ("lichess".to_string(), "/run/uzenet/lichess.sock".to_string()),
                ],
            },
        }
    }
}

impl RoomConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> RoomConfig {
        serdeconv::from_toml_file(path).expect("Error loading room server configuration file")
    }
}
