//! Mix three sines of different formats and stream them through a delay
//!
//! Run with: cargo run --example mix_sines
//!
//! A pump pushes the mix into a floating delay that wanders between 20ms and
//! 60ms; the result is captured in a bucket and summarized at the end.

use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use klangnetz::nodes::{FloatingDelayBuffer, LinearMixerAutoConforming, SampleBucket, SineSource};
use klangnetz::pump::{ActivePump, RealTimeProvider};
use klangnetz::{AudioFormat, AudioGraph};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    let graph = AudioGraph::builder().name("mix_sines").concurrent(true).build();
    let output = AudioFormat::stereo(48000);

    let mixer = LinearMixerAutoConforming::new(&graph, "mix", output)?;
    let voices = [
        (220.0, AudioFormat::mono(16000)),
        (330.0, AudioFormat::mono(44100)),
        (440.0, AudioFormat::stereo(48000)),
    ];
    for (i, (frequency, format)) in voices.into_iter().enumerate() {
        let sine = SineSource::new(&graph, &format!("sine{}", i), format, frequency)?
            .with_amplitude(0.2)
            .with_duration(format.duration_to_frames(Duration::from_secs(2 + i as u64)));
        mixer.add_input(sine, Some(format!("voice{}", i).into()), true)?;
    }
    let mut finished = mixer.channel_finished_events(8);

    let delay = FloatingDelayBuffer::new(&graph, "wander", output, Duration::from_millis(20))?;
    let bucket = SampleBucket::new(&graph, "capture", output)?;
    klangnetz::connect(&*mixer, &*delay)?;
    klangnetz::connect(&*delay, &*bucket)?;

    let pump = ActivePump::new(Arc::new(RealTimeProvider::new()))
        .with_frames_per_tick(480)
        .with_interval(Duration::from_millis(10))
        .push_from(mixer.clone())?;

    let start = Instant::now();
    while pump.is_running() {
        let elapsed = start.elapsed().as_secs_f64();
        let wander = 40.0 + 20.0 * (elapsed * std::f64::consts::PI).sin();
        delay.set_target_delay(Duration::from_secs_f64(wander / 1000.0))?;

        while let Ok(event) = finished.pop() {
            println!("{} finished after {:.2}s", event.token, elapsed);
        }
        sleep(Duration::from_millis(50));
    }
    pump.stop()?;

    let captured = bucket.take_all();
    let peak = captured.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    println!(
        "captured {} frames, peak {:.3}, delay settled at {:.1}ms",
        captured.len() / output.channels(),
        peak,
        delay.current_delay().as_secs_f64() * 1000.0
    );
    Ok(())
}
