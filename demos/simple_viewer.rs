//! Print depth frames from a simulated device.
//!
//! Usage: cargo run --example simple_viewer [--color]
//! Press Ctrl+C to stop.

use framehub::sim::{SimConfig, SimPlugin};
use framehub::{
    ColorFrame, ColorStream, DepthFrame, Host, Sensors, StreamDescription, StreamType,
};
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();

    let with_color = std::env::args().any(|a| a == "--color");

    let mut host = Host::new();
    let plugin = SimPlugin::new("sim0", SimConfig::streaming(Sensors::all(), 30));
    if let Err(e) = host.register_plugin(Box::new(plugin)) {
        eprintln!("Failed to register plugin: {}", e);
        std::process::exit(1);
    }

    let handle = match host.find_stream_set("sim0") {
        Some(h) => h,
        None => {
            eprintln!("Simulated device did not register");
            std::process::exit(1);
        }
    };

    let depth = StreamDescription::of(StreamType::Depth);
    let color = StreamDescription::of(StreamType::Color);

    {
        let set = match host.stream_set_mut(handle) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        };
        if let Err(e) = set.open() {
            eprintln!("Failed to open device: {}", e);
            std::process::exit(1);
        }
        if let Err(e) = set.start_stream(depth) {
            eprintln!("Failed to start depth: {}", e);
            std::process::exit(1);
        }
        if with_color {
            if let Err(e) = set.start_stream(color) {
                eprintln!("Failed to start color: {}", e);
            }
            if let Some(stream) = set.stream_mut(color) {
                let mut params = ColorStream::new(stream);
                match (params.horizontal_fov(), params.vertical_fov()) {
                    (Ok(h), Ok(v)) => println!("Color FOV: {:.3} x {:.3} rad", h, v),
                    _ => println!("Color FOV unavailable"),
                }
            }
        }
    }

    println!("Streaming (Ctrl+C to stop)...");

    let start = Instant::now();
    let mut frames: u64 = 0;
    let mut last_report = Instant::now();

    loop {
        if host.read_all() == 0 {
            continue;
        }

        let set = match host.stream_set(handle) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Error: {}", e);
                break;
            }
        };
        let reader = set.reader_frame();

        let depth_frame = DepthFrame::new(Some(&reader));
        if let (Ok(index), Ok(w), Ok(h)) = (
            depth_frame.frame_index(),
            depth_frame.width(),
            depth_frame.height(),
        ) {
            frames += 1;
            if frames % 30 == 1 {
                let center = depth_frame.sample(w / 2, h / 2).unwrap_or(0);
                println!("index: {:<8} center depth: {} mm", index, center);
            }
        }

        let color_frame = ColorFrame::new(Some(&reader));
        if let (Ok(index), Ok(len)) = (color_frame.frame_index(), color_frame.length()) {
            if index % 30 == 1 {
                println!("index: {:<8} color bytes: {}", index, len);
            }
        }

        let now = Instant::now();
        if now.duration_since(last_report) >= Duration::from_secs(3) {
            let elapsed = start.elapsed().as_secs_f64();
            println!(
                "--- {} depth frames in {:.1}s ({:.1} Hz) ---",
                frames,
                elapsed,
                frames as f64 / elapsed
            );
            last_report = now;
        }
    }
}
