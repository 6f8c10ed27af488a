//! Command-line front-end: load a `.mod` file from disk and stream it
//! to the default audio output device.

use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;

use clap::Parser;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use modplayer::Context;

#[derive(Parser, Debug)]
#[command(name = "modplay", about = "Play a ProTracker/SoundTracker .mod file")]
struct Args {
    /// Path to the .mod file to play.
    path: PathBuf,

    /// Stop after this many full song loops.
    #[arg(short, long, default_value_t = 1)]
    loops: i32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    // Leaked once for the process lifetime: cpal's output callback
    // must be 'static, and Context borrows the module bytes rather
    // than copying them.
    let data: &'static [u8] = fs::read(&args.path)?.leak();

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow::anyhow!("no output device available"))?;
    let config = device.default_output_config()?;
    let sample_rate = config.sample_rate().0 as i32;
    let channels = config.channels() as usize;

    tracing::info!(path = %args.path.display(), sample_rate, channels, "opening module");

    let mut ctx = Context::init(data, sample_rate)
        .ok_or_else(|| anyhow::anyhow!("{} is not a recognized MOD file", args.path.display()))?;

    let (tx, rx) = mpsc::sync_channel::<bool>(1);
    let target_loops = args.loops;

    let stream = device.build_output_stream(
        &config.into(),
        move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
            let frames = data.len() / channels;
            let mut stereo = vec![0.0f32; frames * 2];
            ctx.render(&mut stereo);

            for (frame_idx, frame) in data.chunks_mut(channels).enumerate() {
                let left = stereo[frame_idx * 2];
                let right = stereo[frame_idx * 2 + 1];
                for (ch_idx, sample) in frame.iter_mut().enumerate() {
                    *sample = if ch_idx % 2 == 0 { left } else { right };
                }
            }

            if ctx.loop_count() >= target_loops {
                let _ = tx.try_send(true);
            }
        },
        move |err| tracing::warn!(%err, "audio stream error"),
        None,
    )?;

    stream.play()?;
    rx.recv()?;

    Ok(())
}
