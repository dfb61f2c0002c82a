//! Prints a default TOML config skeleton for one of the Uzenet service
//! binaries, so an operator can redirect it to a file and edit from there
//! instead of hand-writing the table layout.

use clap::{App, Arg};
use serdeconv;

use uzenet_lichess::config::LichessConfig;
use uzenet_room_core::RoomConfig;
use uzenet_vfs::config::VfsConfig;

fn main() {
    let matches = App::new("Config Skeleton")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Prints a default TOML config for a Uzenet service.")
        .arg(
            Arg::with_name("SERVICE")
                .help("room, vfs, or lichess")
                .required(true),
        )
        .get_matches();

    let service = matches.value_of("SERVICE").unwrap();

    let toml = match service {
        "room" => serdeconv::to_toml_string(&RoomConfig::default()),
        "vfs" => serdeconv::to_toml_string(&VfsConfig::default()),
        "lichess" => serdeconv::to_toml_string(&LichessConfig::default()),
        other => {
            eprintln!("unknown service `{}`; expected room, vfs, or lichess", other);
            std::process::exit(1);
        }
    };

    println!("{}", toml.expect("failed to serialize default config"));
}
