//! Example Producer (Participant side)
//!
//! Attaches to a running authority and sweeps one channel from 0 to 49,
//! rescaled from a 0..100 range onto the 12-bit device range.
//!
//! Usage: producer [name] [channel]

use shared_channels::{Channel, ChannelError, ChannelSpec, TableConfig};
use std::thread;
use std::time::Duration;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(name) => TableConfig::named(name),
        None => TableConfig::default(),
    };
    let index = args.next().and_then(|s| s.parse().ok()).unwrap_or(0);

    let spec = ChannelSpec::default().normalized(0.0, 100.0);
    let mut channel = match Channel::connect(&config, index, spec) {
        Ok(c) => c,
        Err(e @ ChannelError::NoAuthority { .. }) => {
            eprintln!("[Producer] {} (start the authority first)", e);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("[Producer] Failed to connect: {}", e);
            std::process::exit(1);
        }
    };

    for i in 0..50 {
        thread::sleep(Duration::from_millis(100));
        match channel.write(i) {
            Ok(stored) => println!("[Producer] {} -> {}", i, stored),
            Err(ChannelError::AuthorityDown) => {
                eprintln!("[Producer] Authority went away, stopping");
                break;
            }
            Err(e) => {
                eprintln!("[Producer] Write failed: {}", e);
                break;
            }
        }
    }

    channel.close();
}
