//! Output through the default CPAL device.
//!
//! The stream lives on a dedicated thread so that the engine itself stays `Send + Sync`.
//! The device callback renders straight from the shared [`Renderer`]; if a caller
//! thread happens to hold it (flushing a full command ring), that callback plays silence.

use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::graph::Renderer;

pub(crate) struct OutputDevice {
    stop: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl OutputDevice {
    /// Open the default output device and start pulling from `renderer`.
    pub(crate) fn open(renderer: Arc<Mutex<Renderer>>, sample_rate: u32, channels: usize) -> Result<Self> {
        let (ready_tx, ready_rx) = bounded::<Result<String>>(1);
        let (stop, stop_rx) = bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("klangraum-output".into())
            .spawn(move || {
                let stream = match build_stream(renderer, sample_rate, channels) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // the stream plays until this thread lets go of it
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

        let name = ready_rx
            .recv()
            .map_err(|_| Error::DeviceUnavailable("output thread exited".into()))??;
        debug!(device = %name, sample_rate, channels, "output device opened");
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("output device closed");
    }
}

fn build_stream(renderer: Arc<Mutex<Renderer>>, sample_rate: u32, channels: usize) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::DeviceUnavailable("no default output device".into()))?;
    let name = device.name().unwrap_or_else(|_| "Unknown".into());
    let format = device
        .default_output_config()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?
        .sample_format();
    let config = StreamConfig {
        channels: channels as u16,
        sample_rate: SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let on_error = |err: cpal::StreamError| warn!(error = ?err, "output stream error");

    let stream = match format {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _| match renderer.try_lock() {
                Some(mut renderer) => renderer.render(data),
                None => data.fill(0.0),
            },
            on_error,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _| {
                    // grows once to the device's callback size
                    scratch.resize(data.len(), 0.0f32);
                    match renderer.try_lock() {
                        Some(mut renderer) => renderer.render(&mut scratch),
                        None => scratch.fill(0.0),
                    }
                    for (out, s) in data.iter_mut().zip(scratch.iter()) {
                        *out = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    }
                },
                on_error,
                None,
            )
        }
        other => {
            return Err(Error::DeviceUnavailable(format!("unsupported sample format {other:?}")));
        }
    }
    .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;

    stream.play().map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
    Ok((stream, name))
}
