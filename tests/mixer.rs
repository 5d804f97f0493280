mod common;

use std::sync::Arc;

use common::UnreliableSource;
use klangnetz::nodes::{
    ChannelFaninMixer, ChannelToken, FixedSampleSource, LinearMixerAutoConforming, Passthrough,
    SampleBucket, SilenceSource, SineSource,
};
use klangnetz::{connect, AudioError, AudioFormat, AudioGraph, AudioNode, AudioSource, ReadResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const RATE: u32 = 8000;

fn mono() -> AudioFormat {
    AudioFormat::mono(RATE)
}

#[test]
fn mix_ends_once_every_input_is_exhausted() {
    common::init_tracing();
    let graph = AudioGraph::builder().build();
    let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
    let long = FixedSampleSource::new(&graph, "long", mono(), vec![0.25; 100]).unwrap();
    let short = FixedSampleSource::new(&graph, "short", mono(), vec![0.5; 50]).unwrap();
    mixer.add_input(long, None, true).unwrap();
    mixer.add_input(short, None, true).unwrap();

    let out = common::read_to_end(&*mixer, 32, 10_000);
    assert_eq!(out.len(), 100);
    assert!(out[..50].iter().all(|s| *s == 0.75));
    assert!(out[50..].iter().all(|s| *s == 0.25));
    assert!(mixer.is_finished());
    assert_eq!(mixer.input_count(), 0);

    let mut buffer = [0.0; 8];
    assert_eq!(mixer.read(&mut buffer).unwrap(), ReadResult::Finished);
}

#[test]
fn read_forever_pads_with_silence() {
    let graph = AudioGraph::builder().build();
    let mixer = ChannelFaninMixer::new(&graph, "mix", mono())
        .unwrap()
        .with_read_forever(true);
    let input = FixedSampleSource::new(&graph, "in", mono(), vec![0.5; 10]).unwrap();
    mixer.add_input(input, None, true).unwrap();

    let mut buffer = [1.0; 16];
    assert_eq!(mixer.read(&mut buffer).unwrap(), ReadResult::Read(16));
    assert!(buffer[..10].iter().all(|s| *s == 0.5));
    assert!(buffer[10..].iter().all(|s| *s == 0.0));
    for _ in 0..5 {
        buffer.fill(1.0);
        assert_eq!(mixer.read(&mut buffer).unwrap(), ReadResult::Read(16));
        assert_eq!(buffer, [0.0; 16]);
    }
    assert!(!mixer.is_finished());

    // still accepting inputs
    let late = FixedSampleSource::new(&graph, "late", mono(), vec![0.25; 4]).unwrap();
    mixer.add_input(late, None, true).unwrap();
    assert_eq!(mixer.read(&mut buffer).unwrap(), ReadResult::Read(16));
    assert_eq!(buffer[3], 0.25);
}

#[test]
fn no_inputs_ever_is_empty_not_finished() {
    let graph = AudioGraph::builder().build();
    let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
    let mut buffer = [0.0; 8];
    for _ in 0..3 {
        assert_eq!(mixer.read(&mut buffer).unwrap(), ReadResult::Empty);
    }
}

#[test]
fn owned_inputs_are_disposed_when_they_finish() {
    let graph = AudioGraph::builder().build();
    let mixer = ChannelFaninMixer::new(&graph, "mix", mono())
        .unwrap()
        .with_read_forever(true);
    let owned = FixedSampleSource::new(&graph, "owned", mono(), vec![0.1; 4]).unwrap();
    let borrowed = FixedSampleSource::new(&graph, "borrowed", mono(), vec![0.1; 4]).unwrap();
    mixer.add_input(owned.clone(), None, true).unwrap();
    mixer.add_input(borrowed.clone(), None, false).unwrap();

    let mut buffer = [0.0; 8];
    mixer.read(&mut buffer).unwrap();

    assert!(owned.is_disposed());
    assert!(matches!(owned.read(&mut buffer), Err(AudioError::Disposed(_))));
    assert!(!borrowed.is_disposed());
    assert!(!borrowed.output().is_connected());
}

#[test]
fn clear_and_dispose_release_owned_inputs() {
    let graph = AudioGraph::builder().build();
    let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
    let a = SilenceSource::new(&graph, "a", mono()).unwrap();
    let b = SilenceSource::new(&graph, "b", mono()).unwrap();
    mixer.add_input(a.clone(), None, true).unwrap();
    mixer.add_input(b.clone(), None, false).unwrap();

    mixer.clear();
    assert_eq!(mixer.input_count(), 0);
    assert!(a.is_disposed());
    assert!(!b.is_disposed());

    let c = SilenceSource::new(&graph, "c", mono()).unwrap();
    mixer.add_input(c.clone(), None, true).unwrap();
    mixer.dispose();
    assert!(c.is_disposed());
    // slot targets are gone; mix, a, b and c are still held here
    assert_eq!(graph.node_names(), vec!["a", "b", "c", "mix"]);
    assert!(matches!(
        mixer.add_input(b, None, false),
        Err(AudioError::Disposed(_))
    ));
}

#[test]
fn finished_inputs_publish_their_token() {
    let graph = AudioGraph::builder().build();
    let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
    let mut events = mixer.channel_finished_events(8);
    let a = FixedSampleSource::new(&graph, "a", mono(), vec![0.1; 4]).unwrap();
    let b = FixedSampleSource::new(&graph, "b", mono(), vec![0.1; 8]).unwrap();
    let c = FixedSampleSource::new(&graph, "c", mono(), vec![0.1; 2]).unwrap();
    let slot_a = mixer.add_input(a, Some(ChannelToken::new("voice-a")), true).unwrap();
    let slot_b = mixer.add_input(b, Some("voice-b".into()), true).unwrap();
    mixer.add_input(c, None, true).unwrap();

    let mut buffer = [0.0; 6];
    mixer.read(&mut buffer).unwrap();
    let first = events.pop().unwrap();
    assert_eq!(first.token.as_str(), "voice-a");
    assert_eq!(first.slot, slot_a);
    assert!(events.pop().is_err());

    common::read_to_end(&*mixer, 6, 100);
    let second = events.pop().unwrap();
    assert_eq!(second.token, ChannelToken::from("voice-b"));
    assert_eq!(second.slot, slot_b);
    assert!(events.pop().is_err());
}

#[test]
fn unreliable_inputs_lose_nothing() {
    common::init_tracing();
    let graph = AudioGraph::builder().build();
    let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
    let mut rng = StdRng::seed_from_u64(3);

    let mut expected = 0.0f64;
    for i in 0..4 {
        let samples: Vec<f32> = (0..2000).map(|_| rng.gen_range(0.0..0.25)).collect();
        expected += samples.iter().map(|s| *s as f64).sum::<f64>();
        let input = UnreliableSource::new(&graph, &format!("flaky{i}"), mono(), samples, i);
        mixer.add_input(input, None, true).unwrap();
    }

    let out = common::read_to_end(&*mixer, 128, 100_000);
    let total: f64 = out.iter().map(|s| *s as f64).sum();
    assert!((total - expected).abs() < 1e-2, "{total} vs {expected}");
    assert!(mixer.is_finished());
}

#[test]
fn pushed_inputs_are_aligned_before_emitting() {
    let graph = AudioGraph::builder().build();
    let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
    let bucket = SampleBucket::new(&graph, "bucket", mono()).unwrap();
    connect(&*mixer, &*bucket).unwrap();
    let a = FixedSampleSource::new(&graph, "a", mono(), vec![1.0; 10]).unwrap();
    let b = FixedSampleSource::new(&graph, "b", mono(), vec![2.0; 6]).unwrap();
    mixer.add_input(a.clone(), None, true).unwrap();
    mixer.add_input(b.clone(), None, true).unwrap();

    a.push_to_output(10).unwrap();
    assert_eq!(bucket.frames_buffered(), 0);

    b.push_to_output(10).unwrap();
    assert_eq!(bucket.take_all(), vec![3.0; 6]);

    mixer.flush().unwrap();
    assert_eq!(bucket.take_all(), vec![1.0; 4]);
    assert!(!bucket.is_upstream_finished());
}

#[test]
fn pushed_end_of_stream_reaches_downstream() {
    let graph = AudioGraph::builder().build();
    let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
    let mut events = mixer.channel_finished_events(4);
    let bucket = SampleBucket::new(&graph, "bucket", mono()).unwrap();
    connect(&*mixer, &*bucket).unwrap();
    let a = FixedSampleSource::new(&graph, "a", mono(), vec![1.0; 4]).unwrap();
    let b = FixedSampleSource::new(&graph, "b", mono(), vec![2.0; 4]).unwrap();
    mixer.add_input(a.clone(), Some("a".into()), true).unwrap();
    mixer.add_input(b.clone(), Some("b".into()), true).unwrap();

    assert_eq!(a.push_to_output(8).unwrap(), ReadResult::Read(4));
    assert_eq!(a.push_to_output(8).unwrap(), ReadResult::Finished);
    assert_eq!(bucket.frames_buffered(), 0);

    // a is done, so only b gates emission now
    assert_eq!(b.push_to_output(8).unwrap(), ReadResult::Read(4));
    assert_eq!(bucket.take_all(), vec![3.0; 4]);
    assert_eq!(events.pop().unwrap().token.as_str(), "a");

    assert_eq!(b.push_to_output(8).unwrap(), ReadResult::Finished);
    assert_eq!(events.pop().unwrap().token.as_str(), "b");
    assert!(bucket.is_upstream_finished());
    assert!(mixer.is_finished());
    assert!(a.is_disposed() && b.is_disposed());
}

#[test]
fn staged_frames_survive_a_refused_emission() {
    let graph = AudioGraph::builder().build();
    let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
    let a = FixedSampleSource::new(&graph, "a", mono(), vec![0.25; 4]).unwrap();
    let b = FixedSampleSource::new(&graph, "b", mono(), vec![0.5; 4]).unwrap();
    mixer.add_input(a.clone(), None, true).unwrap();
    mixer.add_input(b.clone(), None, true).unwrap();
    // the mixer is connected, but nothing past the pipe is
    let pipe = Passthrough::new(&graph, "pipe", mono()).unwrap();
    connect(&*mixer, &*pipe).unwrap();

    assert_eq!(a.push_to_output(4).unwrap(), ReadResult::Read(4));
    let err = b.push_to_output(4).unwrap_err();
    assert!(matches!(err, AudioError::InvalidState(_)), "got {err}");

    let bucket = SampleBucket::new(&graph, "bucket", mono()).unwrap();
    connect(&*pipe, &*bucket).unwrap();
    mixer.flush().unwrap();
    assert_eq!(bucket.take_all(), vec![0.75; 4]);
}

#[test]
fn runaway_pushed_input_is_relieved() {
    let graph = AudioGraph::builder().build();
    let mixer = ChannelFaninMixer::new(&graph, "mix", mono())
        .unwrap()
        .with_max_staged_frames(4);
    let bucket = SampleBucket::new(&graph, "bucket", mono()).unwrap();
    connect(&*mixer, &*bucket).unwrap();
    let busy = FixedSampleSource::new(&graph, "busy", mono(), vec![1.0; 10]).unwrap();
    let idle = SilenceSource::new(&graph, "idle", mono()).unwrap();
    mixer.add_input(busy.clone(), None, true).unwrap();
    mixer.add_input(idle, None, true).unwrap();

    busy.push_to_output(10).unwrap();
    assert_eq!(bucket.take_all(), vec![1.0; 6]);
}

#[test]
fn pulled_mixer_drains_pushed_inputs() {
    let graph = AudioGraph::builder().build();
    let mixer = ChannelFaninMixer::new(&graph, "mix", mono()).unwrap();
    let a = FixedSampleSource::new(&graph, "a", mono(), vec![0.5; 6]).unwrap();
    mixer.add_input(a.clone(), None, true).unwrap();

    // output unconnected: pushed frames wait for a reader
    a.push_to_output(4).unwrap();
    let mut buffer = [0.0; 8];
    assert_eq!(mixer.read(&mut buffer).unwrap(), ReadResult::Read(6));
    assert_eq!(&buffer[..6], &[0.5; 6]);
}

#[test]
fn auto_conforming_mixer_accepts_any_format() {
    common::init_tracing();
    let graph = AudioGraph::builder().build();
    let stereo = AudioFormat::stereo(48000);
    let mixer = LinearMixerAutoConforming::new(&graph, "mix", stereo).unwrap();
    let voice = SineSource::new(&graph, "voice", AudioFormat::mono(24000), 300.0)
        .unwrap()
        .with_duration(2400);
    let music = SineSource::new(&graph, "music", AudioFormat::stereo(44100), 500.0)
        .unwrap()
        .with_duration(4410);
    let native = FixedSampleSource::new(&graph, "native", stereo, vec![0.0; 2 * 480]).unwrap();
    mixer.add_input(voice, Some("voice".into()), true).unwrap();
    mixer.add_input(music, Some("music".into()), true).unwrap();
    mixer.add_input(native, None, true).unwrap();
    assert_eq!(mixer.input_count(), 3);

    let out = common::read_to_end(&*mixer, 256, 1_000_000);
    let frames = out.len() / 2;
    // 100ms at 48kHz, give or take interpolation edges
    assert!((4795..=4805).contains(&frames), "got {frames}");
    assert!(out.iter().all(|s| s.abs() <= 0.5 + 1e-6));
    assert!(mixer.is_finished());
    // only the mixer itself is left
    assert_eq!(graph.node_count(), 1);
}

#[test]
fn shared_mixer_across_threads() {
    let graph = AudioGraph::builder().concurrent(true).build();
    let mixer = ChannelFaninMixer::new(&graph, "mix", mono())
        .unwrap()
        .with_read_forever(true);
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let mixer: Arc<dyn AudioSource> = mixer.clone();
            std::thread::spawn(move || {
                let mut buffer = [0.0; 64];
                for _ in 0..200 {
                    mixer.read(&mut buffer).unwrap();
                }
            })
        })
        .collect();
    for i in 0..50 {
        let input = FixedSampleSource::new(&graph, &format!("in{i}"), mono(), vec![0.01; 32]).unwrap();
        mixer.add_input(input, None, true).unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }
    let mut buffer = [0.0; 4096];
    mixer.read(&mut buffer).unwrap();
    assert_eq!(mixer.input_count(), 0);
}
