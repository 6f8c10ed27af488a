//! Public surface: [`Context::init`], [`Context::render`], and
//! [`Context::loop_count`].

use crate::channel::Channel;
use crate::loader::{self, Song};
use crate::MAX_CHANNELS;

/// A fully loaded, ready-to-render MOD playback session.
///
/// `Context` owns no heap allocations: the channel register file and
/// sample-slot table are fixed-size arrays sized by [`MAX_CHANNELS`]
/// and `MAX_SAMPLES`, and the song data itself is borrowed from the
/// caller's buffer for the lifetime `'a`. A single `Context` is not
/// `Sync`-usable from two threads at once, but independent contexts
/// are fully independent — there is no shared global state.
pub struct Context<'a> {
    pub(crate) song: Song<'a>,
    pub(crate) channels: [Channel; MAX_CHANNELS],

    pub(crate) samples_per_second: i32,
    pub(crate) ticks_per_line: i32,
    pub(crate) samples_per_tick: f32,

    pub(crate) visited: [u8; 16],
    pub(crate) loop_count: i32,

    pub(crate) pattern_delay: u8,
    pub(crate) lfo_rng: u32,

    pub(crate) pattern: i8,
    pub(crate) line: i8,
    pub(crate) tick: i16,
    pub(crate) sample: f32,
}

/// ProTracker's default "LRRL" stereo spread for channel `i` (0-based).
fn default_balance(i: usize) -> u8 {
    let right = (((i + 1) >> 1) & 1) != 0;
    if right {
        0x80 + 0x20
    } else {
        0x80 - 0x20
    }
}

impl<'a> Context<'a> {
    /// Identify, validate, and bind a MOD file, returning a context
    /// ready to [`render`](Context::render) from the start of the
    /// song. Returns `None` on any malformed input — there is no
    /// partial recovery, and the caller must not retain or reuse a
    /// `data` buffer it cannot keep alive for `'a`.
    pub fn init(data: &'a [u8], rate: i32) -> Option<Self> {
        let song = match loader::load(data, rate) {
            Ok(song) => song,
            Err(err) => {
                tracing::warn!(%err, "MOD load rejected");
                return None;
            }
        };

        let mut channels = [Channel::new(0x80); MAX_CHANNELS];
        for (i, ch) in channels.iter_mut().take(song.num_channels as usize).enumerate() {
            *ch = Channel::new(default_balance(i));
        }

        let mut ctx = Context {
            song,
            channels,
            samples_per_second: rate,
            ticks_per_line: 6,
            samples_per_tick: rate as f32 / 50.0,
            visited: [0; 16],
            loop_count: 0,
            pattern_delay: 0,
            lfo_rng: 0x0bad_c0de,
            pattern: 0,
            line: -1,
            tick: 0,
            sample: 0.0,
        };
        ctx.tick = (ctx.ticks_per_line - 1) as i16;

        // Prime playback so the first rendered sample lands on line 0,
        // tick 0.
        ctx.next_tick();

        Some(ctx)
    }

    /// Render up to `buffer.len() / 2` interleaved stereo frames into
    /// `buffer`, returning the number of frames actually written.
    /// Short writes happen exactly at a detected song-loop boundary,
    /// giving the caller a chance to stop between loops.
    pub fn render(&mut self, buffer: &mut [f32]) -> usize {
        let frames_requested = buffer.len() / 2;
        if frames_requested == 0 {
            return 0;
        }

        let mut frames_written = 0;
        for frame in buffer[..frames_requested * 2].chunks_exact_mut(2) {
            let mut out = [0.0f32; 2];
            let pattern_changed = self.next_sample(&mut out);
            frame[0] = out[0];
            frame[1] = out[1];
            frames_written += 1;

            if pattern_changed {
                let pattern = self.pattern as usize;
                if self.visited[pattern >> 3] & (1 << (pattern & 7)) != 0 {
                    self.visited = [0; 16];
                    self.loop_count += 1;
                    tracing::trace!(loop_count = self.loop_count, "song loop detected");
                    break;
                }
            }
        }
        frames_written
    }

    /// Monotonically non-decreasing count of completed song loops.
    pub fn loop_count(&self) -> i32 {
        self.loop_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent_one_channel_mod(length: u8) -> Vec<u8> {
        let mut data = vec![0u8; 1084 + 256];
        data[1080..1084].copy_from_slice(b"1CHN");
        data[950] = length;
        data
    }

    #[test]
    fn init_rejects_empty_and_zero_rate() {
        assert!(Context::init(&[], 44100).is_none());
        let data = silent_one_channel_mod(1);
        assert!(Context::init(&data, 0).is_none());
    }

    #[test]
    fn silent_mod_renders_zeros() {
        let data = silent_one_channel_mod(1);
        let mut ctx = Context::init(&data, 44100).unwrap();
        let mut buffer = vec![0.0f32; 4410 * 2];
        let written = ctx.render(&mut buffer);
        assert_eq!(written, 4410);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn loop_count_increments_after_one_pass() {
        let data = silent_one_channel_mod(1);
        let mut ctx = Context::init(&data, 8000).unwrap();
        let mut buffer = vec![0.0f32; 2];
        // Ticks per line 6, samples per tick = 160; one line = 960
        // samples, one pattern = 64 lines = 61440 samples. Render past
        // that in a loop until the short write shows up.
        let mut total = 0usize;
        let mut saw_short_write = false;
        for _ in 0..200_000 {
            let n = ctx.render(&mut buffer);
            total += n;
            if n == 0 {
                saw_short_write = true;
                break;
            }
        }
        assert!(saw_short_write, "rendered {total} frames without a loop boundary");
        assert_eq!(ctx.loop_count(), 1);
    }

    #[test]
    fn render_splitting_matches_single_call() {
        let data = silent_one_channel_mod(2);
        let mut a = Context::init(&data, 44100).unwrap();
        let mut b = Context::init(&data, 44100).unwrap();

        let mut whole = vec![0.0f32; 2000 * 2];
        a.render(&mut whole);

        let mut split = vec![0.0f32; 2000 * 2];
        b.render(&mut split[..700 * 2]);
        b.render(&mut split[700 * 2..1300 * 2]);
        b.render(&mut split[1300 * 2..]);

        assert_eq!(whole, split);
    }

    #[test]
    fn init_twice_is_deterministic() {
        let data = silent_one_channel_mod(1);
        let mut a = Context::init(&data, 44100).unwrap();
        let mut b = Context::init(&data, 44100).unwrap();
        let mut out_a = vec![0.0f32; 2000];
        let mut out_b = vec![0.0f32; 2000];
        a.render(&mut out_a);
        b.render(&mut out_b);
        assert_eq!(out_a, out_b);
    }
}
