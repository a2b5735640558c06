//! Example Authority (Forwarder side)
//!
//! Creates the channel table, reclaiming a stale segment left by a crashed
//! run, and logs every change producers make to the channels. A real
//! forwarder would relay each change to the device instead of logging it.
//!
//! Usage: authority [name] [seconds]

use shared_channels::{Role, Table, TableConfig};
use std::thread;
use std::time::{Duration, Instant};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(name) => TableConfig::named(name),
        None => TableConfig::default(),
    };
    let run_for = args
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs);

    println!("[Authority] Starting with namespace: {}", config.name);

    let mut table = match Table::open_with(&config, Role::Authority, true) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("[Authority] Failed to create table: {}", e);
            std::process::exit(1);
        }
    };

    println!(
        "[Authority] {} channels ready, waiting for producers... (Ctrl+C to quit)",
        table.channel_count()
    );

    let start = Instant::now();
    let mut last = vec![0; table.channel_count()];

    while run_for.map_or(true, |d| start.elapsed() < d) {
        let current = match table.channels() {
            Ok(v) => v,
            Err(e) => {
                eprintln!("[Authority] {}", e);
                break;
            }
        };

        if current == last {
            thread::sleep(Duration::from_micros(100));
            continue;
        }

        for (ch, (old, new)) in last.iter().zip(&current).enumerate() {
            if old != new {
                println!("[Authority] ch:{}, val:{}", ch, new);
            }
        }
        last = current;
    }

    println!(
        "[Authority] Shutting down, {} clients still attached",
        table.client_count()
    );
    if let Err(e) = table.close() {
        eprintln!("[Authority] Close failed: {}", e);
    }
}
