//! Microphone capture
//!
//! Acquiring the microphone opens a PulseAudio record stream on a dedicated
//! thread (mono, float32, 16 kHz). The thread parks until the session goes live,
//! then posts one `InputChunk` per capture callback until it is stopped.

use crate::device::{self, InputDevice};
use crate::error::DeviceError;
use crate::events::{Epoch, EventSender, SessionEvent};
use crate::pcm;
use libpulse_binding::error::{Code, PAErr};
use libpulse_binding::sample::{Format, Spec};
use libpulse_binding::stream::Direction;
use libpulse_simple_binding::Simple;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error, info, warn};

/// Human-readable text for a PulseAudio error.
pub fn pa_detail(err: PAErr) -> String {
    let text = format!("{err}");
    if text.is_empty() {
        format!("{err:?}")
    } else {
        text
    }
}

/// Map a PulseAudio error onto the device error taxonomy.
pub fn classify_pa_error(err: PAErr) -> DeviceError {
    let detail = pa_detail(err);
    // The simple API reports positive codes, the context API negative ones.
    match Code::try_from(PAErr(-err.0.abs())) {
        Ok(Code::Access) => DeviceError::PermissionDenied,
        Ok(Code::NoEntity) => DeviceError::NoDevice,
        Ok(Code::Busy) => DeviceError::DeviceBusy,
        Ok(Code::NotSupported | Code::Invalid) => DeviceError::ConstraintsUnsatisfiable(detail),
        Ok(Code::ConnectionRefused) => DeviceError::Other(format!("sound server unreachable: {detail}")),
        _ => DeviceError::Other(detail),
    }
}

/// Join an audio thread without stalling a multi-threaded tokio runtime.
pub(crate) fn join_audio_thread(handle: JoinHandle<()>, label: &str) {
    let join = move || handle.join();
    let result = match Handle::try_current() {
        Ok(rt) if rt.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(join)
        }
        _ => join(),
    };
    if result.is_err() {
        error!("{} thread panicked", label);
    }
}

/// Without an explicit device the server falls back to its default source,
/// which is a monitor when no microphone is plugged in.
fn ensure_microphone_present(
    device: Option<&str>,
    lister: fn() -> Result<Vec<InputDevice>, DeviceError>,
) -> Result<(), DeviceError> {
    if device.is_some() {
        return Ok(());
    }
    let devices = lister()?;
    if devices.is_empty() {
        warn!("No microphone among the sound server's input sources");
        return Err(DeviceError::NoDevice);
    }
    debug!("{} microphone(s) available", devices.len());
    Ok(())
}

/// A granted microphone, not yet streaming.
pub trait Microphone: Send {
    /// Begin posting `InputChunk`s tagged with `epoch`.
    fn start(&mut self, epoch: Epoch, events: EventSender) -> Result<(), DeviceError>;

    /// Stop capturing and release the device. Safe to call more than once.
    fn stop(&mut self);
}

/// Grants microphones; one call per session.
pub trait MicrophoneSource: Send {
    fn acquire(&self) -> Result<Box<dyn Microphone>, DeviceError>;
}

/// Microphone source backed by PulseAudio's simple API.
#[derive(Debug, Clone)]
pub struct PulseMicrophoneSource {
    app_name: String,
    device: Option<String>,
    chunk_samples: usize,
    lister: fn() -> Result<Vec<InputDevice>, DeviceError>,
}

impl PulseMicrophoneSource {
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            device: None,
            chunk_samples: pcm::CAPTURE_CHUNK_SAMPLES,
            lister: device::list_input_devices,
        }
    }

    /// Record from a specific PulseAudio source instead of the default.
    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }
}

impl MicrophoneSource for PulseMicrophoneSource {
    fn acquire(&self) -> Result<Box<dyn Microphone>, DeviceError> {
        ensure_microphone_present(self.device.as_deref(), self.lister)?;

        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let (start_tx, start_rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let source = self.clone();
        let thread_shutdown = shutdown.clone();
        let handle = std::thread::Builder::new()
            .name("bankedge-mic".to_string())
            .spawn(move || run_capture(source, ready_tx, start_rx, thread_shutdown))
            .map_err(|e| DeviceError::Other(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!(
                    "Microphone granted ({})",
                    self.device.as_deref().unwrap_or("default source")
                );
                Ok(Box::new(PulseMicrophone {
                    start_tx: Some(start_tx),
                    shutdown,
                    handle: Some(handle),
                }))
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(DeviceError::Other("capture thread exited during open".to_string()))
            }
        }
    }
}

struct StartCapture {
    epoch: Epoch,
    events: EventSender,
}

fn run_capture(
    source: PulseMicrophoneSource,
    ready: mpsc::SyncSender<Result<(), DeviceError>>,
    start: mpsc::Receiver<StartCapture>,
    shutdown: Arc<AtomicBool>,
) {
    let spec = Spec {
        format: Format::F32le,
        channels: 1,
        rate: pcm::INPUT_SAMPLE_RATE,
    };

    let simple = match Simple::new(
        None,
        &source.app_name,
        Direction::Record,
        source.device.as_deref(),
        "microphone",
        &spec,
        None,
        None,
    ) {
        Ok(simple) => simple,
        Err(e) => {
            warn!("Failed to open microphone: {:?}", e);
            let _ = ready.send(Err(classify_pa_error(e)));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // Parked until the session goes live; a dropped sender means released unused.
    let Ok(StartCapture { epoch, events }) = start.recv() else {
        debug!("Microphone released before capture started");
        return;
    };
    info!("Capture started: {} samples per chunk", source.chunk_samples);

    let mut bytes = vec![0u8; source.chunk_samples * 4];
    while !shutdown.load(Ordering::Relaxed) {
        if let Err(e) = simple.read(&mut bytes) {
            if !shutdown.load(Ordering::Relaxed) {
                error!("Microphone read failed: {:?}", e);
                let _ = events.send(SessionEvent::DeviceLost {
                    epoch,
                    error: DeviceError::Disconnected(pa_detail(e)),
                });
            }
            break;
        }
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let samples: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        if events.send(SessionEvent::InputChunk { epoch, samples }).is_err() {
            break;
        }
    }
    info!("Capture stopped");
}

/// Handle on the capture thread.
pub struct PulseMicrophone {
    start_tx: Option<mpsc::Sender<StartCapture>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Microphone for PulseMicrophone {
    fn start(&mut self, epoch: Epoch, events: EventSender) -> Result<(), DeviceError> {
        let start_tx = self
            .start_tx
            .take()
            .ok_or_else(|| DeviceError::Other("microphone already started or released".to_string()))?;
        start_tx
            .send(StartCapture { epoch, events })
            .map_err(|_| DeviceError::Disconnected("capture thread is gone".to_string()))
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.start_tx.take();
        if let Some(handle) = self.handle.take() {
            // Bounded by one chunk read.
            join_audio_thread(handle, "Capture");
        }
    }
}

impl Drop for PulseMicrophone {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulse_errors_map_to_taxonomy() {
        assert_eq!(classify_pa_error(PAErr(1)), DeviceError::PermissionDenied);
        assert_eq!(classify_pa_error(PAErr::from(Code::Access)), DeviceError::PermissionDenied);
        assert_eq!(classify_pa_error(PAErr::from(Code::NoEntity)), DeviceError::NoDevice);
        assert_eq!(classify_pa_error(PAErr(26)), DeviceError::DeviceBusy);
        assert!(matches!(
            classify_pa_error(PAErr::from(Code::NotSupported)),
            DeviceError::ConstraintsUnsatisfiable(_)
        ));
        assert!(matches!(
            classify_pa_error(PAErr(3)),
            DeviceError::ConstraintsUnsatisfiable(_)
        ));
        assert!(matches!(classify_pa_error(PAErr(6)), DeviceError::Other(_)));
        assert!(matches!(classify_pa_error(PAErr::from(Code::IO)), DeviceError::Other(_)));
        assert!(matches!(classify_pa_error(PAErr(9999)), DeviceError::Other(_)));
    }

    #[test]
    fn error_detail_is_never_empty() {
        assert!(!pa_detail(PAErr::from(Code::Busy)).is_empty());
        assert!(!pa_detail(PAErr(9999)).is_empty());
    }

    fn no_inputs() -> Result<Vec<InputDevice>, DeviceError> {
        Ok(Vec::new())
    }

    fn one_input() -> Result<Vec<InputDevice>, DeviceError> {
        Ok(vec![InputDevice {
            name: "alsa_input.usb-mic".to_string(),
            description: "USB Microphone".to_string(),
            sample_rate: 48_000,
            channels: 1,
        }])
    }

    fn server_down() -> Result<Vec<InputDevice>, DeviceError> {
        Err(DeviceError::Other("sound server unreachable".to_string()))
    }

    #[test]
    fn default_source_without_microphones_is_no_device() {
        assert_eq!(ensure_microphone_present(None, no_inputs), Err(DeviceError::NoDevice));
        assert_eq!(ensure_microphone_present(None, one_input), Ok(()));
        assert!(matches!(
            ensure_microphone_present(None, server_down),
            Err(DeviceError::Other(_))
        ));
    }

    #[test]
    fn explicit_device_skips_the_listing() {
        assert_eq!(ensure_microphone_present(Some("alsa_input.usb-mic"), server_down), Ok(()));
    }

    #[test]
    fn acquire_fails_fast_when_no_microphone_is_present() {
        let mut source = PulseMicrophoneSource::new("bankedge-test");
        source.lister = no_inputs;
        assert!(matches!(source.acquire(), Err(DeviceError::NoDevice)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn joining_inside_the_runtime_keeps_other_tasks_running() {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let worker = std::thread::spawn(move || {
            let _ = release_rx.recv();
        });

        // The only worker runs the join; the releaser needs it handed off.
        let joiner = tokio::spawn(async move { join_audio_thread(worker, "Test") });
        let releaser = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            release_tx.send(()).unwrap();
        });

        tokio::time::timeout(std::time::Duration::from_secs(5), joiner)
            .await
            .expect("join stalled the runtime")
            .unwrap();
        releaser.await.unwrap();
    }

    #[test]
    fn joining_outside_a_runtime_waits_for_the_thread() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        let worker = std::thread::spawn(move || flag.store(true, Ordering::SeqCst));
        join_audio_thread(worker, "Test");
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_thread_is_joined_without_propagating() {
        let worker = std::thread::spawn(|| panic!("device vanished"));
        join_audio_thread(worker, "Test");
    }

    #[test]
    fn error_messages_are_user_facing() {
        assert_eq!(DeviceError::PermissionDenied.to_string(), "microphone access was denied");
        assert_eq!(DeviceError::NoDevice.to_string(), "no audio device found");
        assert_eq!(DeviceError::DeviceBusy.to_string(), "audio device is busy");
    }
}
