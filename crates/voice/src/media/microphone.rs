//! Microphone capture using cpal, Opus-encoded into a WebRTC sample track

use super::{LocalStream, LocalTrack, MediaDevice};
use crate::config::AudioCaptureConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

const MAX_PACKET_SIZE: usize = 4000;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default input device of the default cpal host
#[derive(Debug, Clone)]
pub struct MicrophoneDevice {
    config: AudioCaptureConfig,
}

impl MicrophoneDevice {
    pub fn new(config: AudioCaptureConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl MediaDevice for MicrophoneDevice {
    async fn acquire(&self) -> Result<LocalStream> {
        let config = self.config;
        let stream_id = format!("mic-{}", uuid::Uuid::new_v4().simple());

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: config.channels,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
                rtcp_feedback: vec![],
            },
            "audio".to_owned(),
            stream_id.clone(),
        ));
        let stream = LocalStream::new(stream_id, vec![Arc::clone(&track) as LocalTrack]);

        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let released = stream.release_flag();

        std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || capture_thread(config, released, packet_tx, ready_tx))?;

        ready_rx
            .await
            .map_err(|_| Error::MediaUnavailable("capture thread exited".to_string()))??;

        tokio::spawn(writer_task(track, packet_rx, config.frame_duration_ms));
        Ok(stream)
    }
}

/// Writes encoded frames to the track until the capture thread stops
async fn writer_task(
    track: Arc<TrackLocalStaticSample>,
    mut packets: mpsc::UnboundedReceiver<Vec<u8>>,
    frame_duration_ms: u32,
) {
    let duration = Duration::from_millis(frame_duration_ms as u64);
    while let Some(packet) = packets.recv().await {
        let sample = Sample {
            data: Bytes::from(packet),
            duration,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            debug!("Failed to write audio sample: {}", e);
        }
    }
    debug!("Microphone writer task terminated");
}

fn open_input(config: &AudioCaptureConfig) -> Result<(cpal::Stream, std_mpsc::Receiver<Vec<f32>>)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::MediaUnavailable("No default input device available".to_string()))?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::MediaUnavailable(format!("Cannot query '{}': {}", device_name, e)))?
        .find(|c| {
            c.channels() == config.channels
                && c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate().0 <= config.sample_rate
                && c.max_sample_rate().0 >= config.sample_rate
        })
        .ok_or_else(|| {
            Error::MediaUnavailable(format!(
                "Device '{}' doesn't support {} channel(s) at {}Hz",
                device_name, config.channels, config.sample_rate
            ))
        })?
        .with_sample_rate(cpal::SampleRate(config.sample_rate));

    let (tx, rx) = std_mpsc::channel();
    let stream = device
        .build_input_stream(
            &supported.into(),
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let _ = tx.send(data.to_vec());
            },
            |err| {
                error!("Audio capture error: {}", err);
            },
            None,
        )
        .map_err(|e| Error::MediaUnavailable(format!("Cannot open '{}': {}", device_name, e)))?;

    stream
        .play()
        .map_err(|e| Error::MediaUnavailable(format!("Cannot start '{}': {}", device_name, e)))?;

    info!(
        "Capturing from '{}' ({}Hz, {} ch)",
        device_name, config.sample_rate, config.channels
    );
    Ok((stream, rx))
}

fn open_encoder(config: &AudioCaptureConfig) -> Result<opus::Encoder> {
    let channels = match config.channels {
        1 => opus::Channels::Mono,
        2 => opus::Channels::Stereo,
        other => {
            return Err(Error::InvalidConfig(format!(
                "Opus supports 1 or 2 channels, got {}",
                other
            )))
        }
    };
    opus::Encoder::new(config.sample_rate, channels, opus::Application::Voip)
        .map_err(|e| Error::MediaTrackError(format!("Failed to create Opus encoder: {:?}", e)))
}

/// Owns the cpal stream, which must stay on the thread that built it
fn capture_thread(
    config: AudioCaptureConfig,
    released: Arc<AtomicBool>,
    packets: mpsc::UnboundedSender<Vec<u8>>,
    ready: oneshot::Sender<Result<()>>,
) {
    let opened = open_encoder(&config).and_then(|encoder| Ok((encoder, open_input(&config)?)));
    let (mut encoder, (stream, samples)) = match opened {
        Ok(opened) => {
            let _ = ready.send(Ok(()));
            opened
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    let frame_len = config.frame_samples() * config.channels as usize;
    let mut buffered: Vec<f32> = Vec::with_capacity(frame_len * 2);

    while !released.load(Ordering::SeqCst) {
        match samples.recv_timeout(POLL_INTERVAL) {
            Ok(chunk) => buffered.extend_from_slice(&chunk),
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }

        while buffered.len() >= frame_len {
            let frame: Vec<f32> = buffered.drain(..frame_len).collect();
            match encoder.encode_vec_float(&frame, MAX_PACKET_SIZE) {
                Ok(packet) => {
                    if packets.send(packet).is_err() {
                        warn!("Microphone writer is gone, stopping capture");
                        return;
                    }
                }
                Err(e) => warn!("Opus encoding failed: {}", e),
            }
        }
    }

    drop(stream);
    debug!("Microphone capture stopped");
}
