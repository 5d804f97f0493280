mod common;

use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Weak};

use klangnetz::codec::{AudioDecoder, AudioEncoder, CodecParams, DecoderInit};
use klangnetz::nodes::{FixedSampleSource, SampleBucket};
use klangnetz::{
    connect, AudioError, AudioFormat, AudioGraph, AudioNode, AudioSource, AudioTarget, InputPort,
    NodeCore, OutputPort, ReadResult, Result,
};
use parking_lot::Mutex;

const MAGIC: &[u8; 4] = b"PCM1";

/// Byte sink the test can look into afterwards.
#[derive(Clone, Default)]
struct SharedBytes(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBytes {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Raw little-endian `f32` frames behind a magic header.
struct PcmEncoder {
    core: NodeCore,
    input: InputPort,
    sink: Mutex<Option<Box<dyn Write + Send>>>,
}

impl PcmEncoder {
    fn new(graph: &Arc<AudioGraph>, format: AudioFormat) -> Arc<Self> {
        let core = NodeCore::new(graph, "pcm-enc", format).unwrap();
        Arc::new_cyclic(|me: &Weak<Self>| {
            let owner: Weak<dyn AudioTarget> = me.clone();
            Self {
                core,
                input: InputPort::new(owner),
                sink: Mutex::new(None),
            }
        })
    }
}

fn io_error(err: io::Error) -> AudioError {
    AudioError::Upstream(err.to_string())
}

impl AudioNode for PcmEncoder {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_target(&self) -> Option<&dyn AudioTarget> {
        Some(self)
    }
}

impl AudioTarget for PcmEncoder {
    fn input(&self) -> &InputPort {
        &self.input
    }

    fn write_samples(&self, buffer: &[f32]) -> Result<usize> {
        let mut sink = self.sink.lock();
        let sink = sink
            .as_mut()
            .ok_or_else(|| AudioError::InvalidState("encoder not initialized".into()))?;
        for sample in buffer {
            sink.write_all(&sample.to_le_bytes()).map_err(io_error)?;
        }
        Ok(buffer.len() / self.core.channels())
    }
}

impl AudioEncoder for PcmEncoder {
    fn codec_name(&self) -> &str {
        "pcm-f32le"
    }

    fn codec_params(&self) -> CodecParams {
        CodecParams::from_format(&self.core.format()).with("framesize", 4)
    }

    fn initialize(&self, mut sink: Box<dyn Write + Send>) -> Result<()> {
        sink.write_all(MAGIC).map_err(io_error)?;
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if let Some(mut sink) = self.sink.lock().take() {
            sink.flush().map_err(io_error)?;
        }
        Ok(())
    }
}

struct PcmDecoder {
    core: NodeCore,
    output: OutputPort,
    stream: Mutex<Option<Box<dyn Read + Send>>>,
}

impl PcmDecoder {
    fn new(graph: &Arc<AudioGraph>, format: AudioFormat) -> Arc<Self> {
        let core = NodeCore::new(graph, "pcm-dec", format).unwrap();
        Arc::new_cyclic(|me: &Weak<Self>| {
            let owner: Weak<dyn AudioSource> = me.clone();
            Self {
                core,
                output: OutputPort::new(owner),
                stream: Mutex::new(None),
            }
        })
    }
}

impl AudioNode for PcmDecoder {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn as_source(&self) -> Option<&dyn AudioSource> {
        Some(self)
    }
}

impl AudioSource for PcmDecoder {
    fn output(&self) -> &OutputPort {
        &self.output
    }

    fn read_samples(&self, buffer: &mut [f32]) -> Result<ReadResult> {
        let mut stream = self.stream.lock();
        let Some(stream) = stream.as_mut() else {
            return Ok(ReadResult::Empty);
        };
        let channels = self.core.channels();
        let mut bytes = [0u8; 4];
        let mut samples = 0;
        while samples < buffer.len() {
            match stream.read_exact(&mut bytes) {
                Ok(()) => {
                    buffer[samples] = f32::from_le_bytes(bytes);
                    samples += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(io_error(err)),
            }
        }
        let frames = samples / channels;
        if frames == 0 {
            Ok(ReadResult::Finished)
        } else {
            Ok(ReadResult::Read(frames))
        }
    }
}

impl AudioDecoder for PcmDecoder {
    fn codec_name(&self) -> &str {
        "pcm-f32le"
    }

    fn initialize(&self, mut stream: Box<dyn Read + Send>, params: &CodecParams) -> Result<DecoderInit> {
        let format = params.format().map_err(|e| AudioError::CodecInit(e.to_string()))?;
        if format != self.core.format() {
            return Err(AudioError::CodecInit(format!(
                "stream is {}, decoder is {}",
                format,
                self.core.format()
            )));
        }

        // zero padding may precede the header
        let mut skipped_bytes = 0;
        let mut byte = [0u8; 1];
        loop {
            stream
                .read_exact(&mut byte)
                .map_err(|e| AudioError::CodecInit(e.to_string()))?;
            if byte[0] != 0 {
                break;
            }
            skipped_bytes += 1;
        }
        let mut rest = [0u8; 3];
        stream
            .read_exact(&mut rest)
            .map_err(|e| AudioError::CodecInit(e.to_string()))?;
        if byte[0] != MAGIC[0] || rest != MAGIC[1..] {
            return Err(AudioError::CodecInit("missing PCM1 header".into()));
        }

        *self.stream.lock() = Some(stream);
        Ok(DecoderInit {
            format,
            skipped_bytes,
        })
    }
}

fn encode(graph: &Arc<AudioGraph>, format: AudioFormat, samples: Vec<f32>) -> (Vec<u8>, CodecParams) {
    let source = FixedSampleSource::new(graph, "src", format, samples).unwrap();
    let encoder = PcmEncoder::new(graph, format);
    connect(&*source, &*encoder).unwrap();
    let bytes = SharedBytes::default();
    encoder.initialize(Box::new(bytes.clone())).unwrap();
    while source.push_to_output(3).unwrap() != ReadResult::Finished {}
    encoder.finish().unwrap();
    let encoded = bytes.0.lock().clone();
    (encoded, encoder.codec_params())
}

#[test]
fn encoded_stream_decodes_back() {
    common::init_tracing();
    let graph = AudioGraph::builder().build();
    let format = AudioFormat::stereo(48000);
    let samples: Vec<f32> = (0..40).map(|i| i as f32 / 40.0).collect();
    let (bytes, params) = encode(&graph, format, samples.clone());
    assert_eq!(
        params.to_string(),
        "samplerate=48000 channels=2 layout=2 framesize=4"
    );

    // the transport prepends padding
    let mut padded = vec![0u8; 7];
    padded.extend_from_slice(&bytes);
    let decoder = PcmDecoder::new(&graph, format);
    let parsed: CodecParams = params.to_string().parse().unwrap();
    let init = decoder
        .initialize(Box::new(Cursor::new(padded)), &parsed)
        .unwrap();
    assert_eq!(init.skipped_bytes, 7);
    assert_eq!(init.format, format);

    let bucket = SampleBucket::new(&graph, "bucket", format).unwrap();
    connect(&*decoder, &*bucket).unwrap();
    while bucket.read_from_input(5).unwrap() != ReadResult::Finished {}
    assert_eq!(bucket.take_all(), samples);
}

#[test]
fn decoder_init_failures_are_codec_errors() {
    let graph = AudioGraph::builder().build();
    let format = AudioFormat::mono(16000);
    let decoder = PcmDecoder::new(&graph, format);

    let wrong_rate: CodecParams = "samplerate=8000 channels=1".parse().unwrap();
    let err = decoder
        .initialize(Box::new(Cursor::new(b"PCM1".to_vec())), &wrong_rate)
        .unwrap_err();
    assert!(matches!(err, AudioError::CodecInit(_)), "got {err}");

    let params = CodecParams::from_format(&format);
    let err = decoder
        .initialize(Box::new(Cursor::new(b"\0\0OGG".to_vec())), &params)
        .unwrap_err();
    assert!(matches!(err, AudioError::CodecInit(_)), "got {err}");

    let err = decoder
        .initialize(Box::new(Cursor::new(Vec::new())), &params)
        .unwrap_err();
    assert!(matches!(err, AudioError::CodecInit(_)), "got {err}");

    // a decoder that never initialized has nothing yet, which is not an error
    let mut buffer = [0.0; 4];
    assert_eq!(decoder.read(&mut buffer).unwrap(), ReadResult::Empty);
}
