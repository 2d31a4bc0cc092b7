use bankedge::capture::{MicrophoneSource, PulseMicrophoneSource};
use bankedge::device;
use bankedge::events::{self, SessionEvent};
use bankedge::speaker::{PulseSpeakerSource, SpeakerSource};
use std::error::Error;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const APP_NAME: &str = "bankedge-mic-check";

/// Open a microphone, capture one chunk and report its level.
fn try_capture(source: &PulseMicrophoneSource) -> Result<f32, Box<dyn Error>> {
    let mut mic = source.acquire()?;
    let (tx, mut rx) = events::channel();
    mic.start(1, tx)?;

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let level = loop {
        match rx.try_recv() {
            Ok(SessionEvent::InputChunk { samples, .. }) => {
                break samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
            }
            Ok(SessionEvent::DeviceLost { error, .. }) => {
                mic.stop();
                return Err(error.into());
            }
            Ok(_) => {}
            Err(_) if std::time::Instant::now() > deadline => {
                mic.stop();
                return Err("no audio within 2s".into());
            }
            Err(_) => std::thread::sleep(Duration::from_millis(20)),
        }
    };
    mic.stop();
    Ok(level)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    println!("Available microphones:");
    let devices = match device::list_input_devices() {
        Ok(devices) => devices,
        Err(e) => {
            println!("Error listing devices: {}", e);
            Vec::new()
        }
    };
    if devices.is_empty() {
        println!("No microphones found!");
    }
    for (i, d) in devices.iter().enumerate() {
        println!("{}: {}", i + 1, d.description);
        println!("   Name: {}", d.name);
        println!("   Rate: {} Hz, Channels: {}", d.sample_rate, d.channels);
    }

    println!("\nDefault microphone:");
    match try_capture(&PulseMicrophoneSource::new(APP_NAME)) {
        Ok(peak) => println!("  ✅ captured one chunk, peak level {:.3}", peak),
        Err(e) => println!("  ❌ {}", e),
    }

    println!("\nTrying each microphone at 16 kHz mono:");
    for d in &devices {
        let source = PulseMicrophoneSource::new(APP_NAME).with_device(Some(d.name.clone()));
        match try_capture(&source) {
            Ok(peak) => println!("  ✅ {} (peak {:.3})", d.description, peak),
            Err(e) => println!("  ❌ {}: {}", d.description, e),
        }
    }

    println!("\nOpening playback at 24 kHz:");
    let (tx, _rx) = events::channel();
    match PulseSpeakerSource::new(APP_NAME).open(0, tx) {
        Ok(mut speaker) => {
            speaker.close();
            println!("  ✅ ok");
        }
        Err(e) => println!("  ❌ {}", e),
    }

    println!("\nMicrophone check complete!");
    Ok(())
}
