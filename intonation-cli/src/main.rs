//! # Intonation CLI
//!
//! Minimal terminal front-end for the intonation engine: runs a timed
//! practice take against the default input device, feeds every pitch
//! detection into one analyzer instance, and prints the session report
//! as JSON when the take ends.
//!
//! Usage: `intonation-cli [SECONDS] [--record]`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use intonation_core::analyzer::IntonationAnalyzer;
use intonation_core::audio::{CaptureConfig, CapturePipeline};

fn main() -> Result<()> {
    let mut seconds = 10u64;
    let mut record = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--record" => record = true,
            value => {
                seconds = value
                    .parse()
                    .context("duration must be a whole number of seconds")?;
            }
        }
    }

    eprintln!("[CLI] starting a {seconds}s practice take...");
    let mut pipeline = CapturePipeline::initialize(CaptureConfig::default())?;

    let analyzer = Arc::new(Mutex::new(IntonationAnalyzer::new()));
    let sink = Arc::clone(&analyzer);
    pipeline.start_pitch_detection(move |detection| {
        if let Some(found) = detection {
            if let Ok(mut analyzer) = sink.lock() {
                analyzer.add_sample(found.frequency, found.amplitude);
            }
        }
    });
    if record {
        pipeline.start_recording();
    }

    for elapsed in 1..=seconds {
        std::thread::sleep(Duration::from_secs(1));
        eprintln!("[CLI] {elapsed:>3}s  level {:.3}", pipeline.get_volume());
    }

    pipeline.stop_pitch_detection();
    if record {
        match pipeline.stop_recording() {
            Some(recording) => {
                std::fs::write("take.wav", &recording.wav_bytes)?;
                eprintln!("[CLI] wrote take.wav ({:.1}s)", recording.duration_secs);
            }
            None => eprintln!("[CLI] nothing was recorded"),
        }
    }
    pipeline.dispose();

    let report = analyzer
        .lock()
        .map_err(|_| anyhow!("analyzer lock poisoned"))?
        .analysis();
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
