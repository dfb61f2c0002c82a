use serdeconv;
use uzenet_room_core::RoomConfig;

fn main() {
    let config = serdeconv::to_toml_string(&RoomConfig::default()).expect("Failed to generate config file");

    println!("{}", config);
}
