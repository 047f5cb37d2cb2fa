//! Fake rtl_433: prints random WS90 readings as JSON lines.
//!
//! Handy for running the exporter without a radio:
//!
//! ```bash
//! ws90-exporter --cmd "ws90-fake --id 100 --interval 5"
//! ```

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use ws90_types::{DeviceId, WS90_MODEL};

/// Fake data generator for the WS90 exporter
#[derive(Parser, Debug)]
#[command(name = "ws90-fake", version, about, long_about = None)]
struct Args {
    /// Device id to generate readings for, decimal or 0x-hex (repeatable).
    /// Without any, every reading gets a random id.
    #[arg(long = "id", value_name = "ID")]
    ids: Vec<DeviceId>,

    /// Seconds between readings
    #[arg(long, default_value = "2")]
    interval: f64,

    /// Number of readings to print, 0 for no limit
    #[arg(long, default_value = "0")]
    count: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let interval = Duration::try_from_secs_f64(args.interval)
        .context("--interval must be a non-negative number of seconds")?;

    let mut rng = rand::thread_rng();
    let stdout = io::stdout();
    let mut printed = 0;

    while args.count == 0 || printed < args.count {
        let reading = random_reading(&mut rng, &args.ids);

        let mut out = stdout.lock();
        writeln!(out, "{}", reading)?;
        out.flush()?;
        drop(out);

        printed += 1;
        if args.count == 0 || printed < args.count {
            std::thread::sleep(interval);
        }
    }

    Ok(())
}

fn random_reading<R: Rng>(rng: &mut R, ids: &[DeviceId]) -> Value {
    let id = ids
        .choose(rng)
        .copied()
        .unwrap_or_else(|| DeviceId::new(rng.gen_range(0..=0xff_ffff)));
    let battery_mv: u32 = rng.gen_range(1000..=3000);

    json!({
        "time": Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        "model": WS90_MODEL,
        "id": id.get(),
        "battery_mV": battery_mv,
        "battery_ok": battery_ok(battery_mv),
        "temperature_C": round1(rng.gen_range(-40.0..=60.0)),
        "humidity": rng.gen_range(1..=100),
        "wind_dir_deg": rng.gen_range(0..=360),
        "wind_avg_m_s": round1(rng.gen_range(0.0..=40.0)),
        "wind_max_m_s": round1(rng.gen_range(0.0..=40.0)),
        "uvi": rng.gen_range(1..=16),
        "light_lux": round1(rng.gen_range(0.0..=200.0)),
        "flags": rng.gen_range(0..=0xff),
        "rain_mm": rng.gen_range(0.0_f64..=10000.0).round(),
        "supercap_V": round1(f64::from(rng.gen_range(0..=0x3f_u8)) / 10.0),
        "firmware": "126",
        "data": "3fff000000------0000fe8fde0000",
        "mic": "CRC",
    })
}

/// Battery level as rtl_433 derives it: 1400 mV is empty, 3000 mV is full.
fn battery_ok(millivolts: u32) -> f64 {
    let percent = (f64::from(millivolts) - 1400.0).max(0.0) / 16.0;
    round1(percent / 100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
