use super::AudioEngine;
use anyhow::{Context, Result};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub struct RodioEngine {
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
    sink: Option<Sink>,
    volume: f32,
}

impl RodioEngine {
    pub fn new() -> Result<Self> {
        let (stream, stream_handle) = OutputStream::try_default()?;

        Ok(Self {
            _stream: stream,
            stream_handle,
            sink: None,
            volume: 1.0,
        })
    }
}

impl AudioEngine for RodioEngine {
    fn load(&mut self, path: &Path) -> Result<()> {
        // Replacing the sink drops the previous one and stops its playback.
        let sink = Sink::try_new(&self.stream_handle)?;
        sink.set_volume(self.volume);

        let file = File::open(path)
            .with_context(|| format!("Failed to open audio file {}", path.display()))?;
        let source = Decoder::new(BufReader::new(file))
            .with_context(|| format!("Failed to decode audio file {}", path.display()))?;

        sink.append(source);
        sink.play();
        self.sink = Some(sink);

        Ok(())
    }

    fn pause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.pause();
        }
    }

    fn unpause(&mut self) {
        if let Some(sink) = &self.sink {
            sink.play();
        }
    }

    fn is_busy(&self) -> bool {
        self.sink.as_ref().map(|s| !s.empty()).unwrap_or(false)
    }

    fn position_millis(&self) -> u64 {
        self.sink
            .as_ref()
            .map(|s| s.get_pos().as_millis() as u64)
            .unwrap_or(0)
    }

    fn set_volume(&mut self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        self.volume = clamped;

        if let Some(sink) = &self.sink {
            sink.set_volume(clamped);
        }
    }
}
