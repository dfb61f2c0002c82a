//! Scaffolds a `users.csv` with synthetic rows for local testing.

use clap::{App, Arg};
use rand::distributions::Uniform;
use rand::prelude::*;
use std::fs::OpenOptions;
use std::io::Write;

const ALLOWED_CHARS: [char; 35] = [
    '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l',
    'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

fn make_name(rng: &mut ThreadRng, len: usize) -> String {
    rng.sample_iter(&Uniform::new(0, ALLOWED_CHARS.len()))
        .take(len)
        .map(|sample| ALLOWED_CHARS[sample])
        .collect()
}

fn main() {
    let matches = App::new("Identity CSV Generator")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Appends synthetic user rows to a users.csv file.")
        .arg(
            Arg::with_name("USER_FILE")
                .help("Path to the users.csv file (created if missing)")
                .required(true),
        )
        .arg(
            Arg::with_name("NUSERS")
                .help("Number of new user rows to generate")
                .required(true),
        )
        .arg(
            Arg::with_name("START_ID")
                .help("First id to assign")
                .default_value("1"),
        )
        .get_matches();

    let user_file_path = matches.value_of("USER_FILE").unwrap();
    let count: u32 = matches.value_of("NUSERS").unwrap().parse().expect("NUSERS must be an integer");
    let start_id: u32 = matches.value_of("START_ID").unwrap().parse().expect("START_ID must be an integer");

    let mut rng = thread_rng();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(user_file_path)
        .expect("failed to open users.csv for appending");

    for id in start_id..(start_id + count) {
        let name13 = make_name(&mut rng, 13);
        let name8 = make_name(&mut rng, 8);
        let name6 = make_name(&mut rng, 6);
        let hash = make_name(&mut rng, 16);
        writeln!(file, "{},{},{},{},{},0", id, name13, name8, name6, hash)
            .expect("failed to write user row");
    }

    println!("Appended {} user rows to {}", count, user_file_path);
}
