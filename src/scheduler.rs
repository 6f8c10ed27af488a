//! Line and tick advance: pattern order traversal, effect-parameter
//! decode at line entry, and the per-tick effect dispatch table.

use crate::channel::{self, effect, Channel, DIRTY_PITCH, DIRTY_VOLUME};
use crate::context::Context;
use crate::tables;
use crate::MAX_SAMPLES;

impl Context<'_> {
    /// Advance to the next line of the current pattern (or jump
    /// pattern/order position per a position jump, pattern break, or
    /// pattern loop carried on the line just decoded), then apply every
    /// channel's line-entry effect rules for the freshly entered line.
    ///
    /// Only called when no pattern delay is outstanding; `next_tick`
    /// owns that decision.
    pub(crate) fn next_line(&mut self) {
        // Mark the order position we are about to leave as visited,
        // exactly when its first line has just finished playing.
        if self.line == 0 {
            let pattern = self.pattern as usize;
            self.visited[pattern >> 3] |= 1 << (pattern & 7);
        }

        self.line += 1;
        if self.line as usize == 64 {
            self.pattern = self.advance_pattern();
            self.line = 0;
        }

        let pattern = self.pattern as u8;
        let line = self.line as u8;
        let cells = self.song.line(pattern, line);
        let num_channels = self.song.num_channels as usize;

        let mut pattern_break: Option<i32> = None;

        for i in 0..num_channels {
            let cell = &cells[i * 4..i * 4 + 4];
            let sample = (cell[0] & 0xf0) | (cell[2] >> 4);
            let period = (((cell[0] & 0x0f) as u16) << 8) | cell[1] as u16;
            let raw_effect = cell[2] & 0x0f;
            let param = cell[3];
            let effect_id = if raw_effect == 0xe { 0xe0 | (param >> 4) } else { raw_effect };

            let ch = &mut self.channels[i];
            ch.effect = effect_id;
            ch.param = if raw_effect == 0xe { param & 0x0f } else { param };

            // Set sample.
            if sample != 0 {
                if sample as usize <= MAX_SAMPLES {
                    ch.sample = sample;
                    let slot = &self.song.samples[sample as usize - 1];
                    ch.finetune = slot.finetune;
                    if ch.effect != effect::NOTE_DELAY {
                        ch.volume = slot.default_volume;
                        ch.dirty |= DIRTY_VOLUME;
                    }
                } else {
                    ch.sample = 0;
                }
            }

            // Set note. `finetuned_period` mirrors the reference's reuse
            // of the local `period` variable: it carries the
            // finetune-adjusted period only when a note was actually
            // decoded this line, and 0 otherwise, so the memorize below
            // leaves `ch.target` untouched on lines with no note.
            let finetuned_period = if period != 0 {
                let note_period = tables::finetune_period(period, ch.finetune);
                if ch.effect != effect::TONE_PORTA {
                    if ch.effect != effect::NOTE_DELAY {
                        ch.position = 0.0;
                    }
                    ch.dirty |= DIRTY_PITCH;
                    ch.period = note_period;
                    ch.lfo_step = 0;
                }
                note_period
            } else {
                0
            };

            match effect_id {
                effect::TONE_PORTA => {
                    channel::memorize_byte(&mut ch.param3, ch.param);
                    channel::memorize_u16(&mut ch.target, finetuned_period);
                }
                effect::TONE_PORTA_VOL_SLIDE => {
                    channel::memorize_u16(&mut ch.target, finetuned_period);
                }
                effect::VIBRATO | effect::VIBRATO_VOL_SLIDE => {
                    channel::memorize_nibbles(&mut ch.param4, ch.param);
                }
                effect::TREMOLO => {
                    channel::memorize_nibbles(&mut ch.param7, ch.param);
                }
                effect::FINE_PORTA_UP => {
                    channel::memorize_byte(&mut ch.param_e1, ch.param);
                }
                effect::FINE_PORTA_DOWN => {
                    channel::memorize_byte(&mut ch.param_e2, ch.param);
                }
                effect::FINE_VOLUME_UP => {
                    channel::memorize_byte(&mut ch.param_ea, ch.param);
                }
                effect::FINE_VOLUME_DOWN => {
                    channel::memorize_byte(&mut ch.param_eb, ch.param);
                }
                effect::SET_BALANCE => {
                    ch.balance = ch.param;
                }
                effect::SAMPLE_OFFSET => {
                    if period != 0 || sample != 0 {
                        channel::memorize_byte(&mut ch.param9, ch.param);
                        ch.position = (ch.param9 as f32) * 256.0;
                    }
                }
                effect::POSITION_JUMP => {
                    self.pattern = if ch.param < self.song.length { ch.param as i8 } else { 0 };
                    self.line = -1;
                }
                effect::SET_VOLUME => {
                    ch.volume = channel::clamp_volume(ch.param as i32);
                    ch.dirty |= DIRTY_VOLUME;
                }
                effect::PATTERN_BREAK => {
                    let next = (ch.param >> 4) * 10 + (ch.param & 0x0f);
                    pattern_break = Some(next as i32);
                }
                effect::SET_VIBRATO_WAVEFORM => {
                    ch.lfo_type[0] = ch.param;
                }
                effect::SET_FINETUNE => {
                    ch.finetune = ch.param;
                    ch.dirty |= DIRTY_PITCH;
                }
                effect::PATTERN_LOOP => {
                    if ch.param != 0 {
                        if ch.loop_count == 0 {
                            ch.loop_count = ch.param;
                            self.line = ch.loop_line as i8;
                        } else {
                            ch.loop_count -= 1;
                            if ch.loop_count != 0 {
                                self.line = ch.loop_line as i8;
                            }
                        }
                    } else {
                        ch.loop_line = (self.line - 1) as u8;
                    }
                }
                effect::SET_TREMOLO_WAVEFORM => {
                    ch.lfo_type[1] = ch.param;
                }
                effect::SET_BALANCE_FINE => {
                    ch.balance = ch.param << 4;
                }
                effect::PATTERN_DELAY => {
                    self.pattern_delay = ch.param;
                }
                effect::SPEED => {
                    if ch.param != 0 {
                        if ch.param < 0x20 {
                            self.ticks_per_line = ch.param as i32;
                        } else {
                            self.samples_per_tick =
                                self.samples_per_second as f32 / (0.4 * ch.param as f32);
                        }
                    }
                }
                _ => {}
            }
        }

        // Pattern breaks are resolved here so that only one jump happens
        // even when multiple Dxy commands appear on the same line. This
        // is applied on top of whatever a same-line Bxx already set
        // `self.pattern` to.
        if let Some(target) = pattern_break {
            self.line = (if target < 64 { target } else { 0 }) as i8 - 1;
            self.pattern = self.advance_pattern();
        }
    }

    /// `self.pattern + 1`, wrapping to `reset` at `length`, without
    /// overflowing `i8` when `pattern == length - 1 == 127` (a
    /// `length == 128` song played to its last order entry).
    fn advance_pattern(&self) -> i8 {
        let next = self.pattern as i16 + 1;
        if next as usize == self.song.length as usize {
            self.song.reset as i8
        } else {
            next as i8
        }
    }

    /// Advance one tick within the current line. Calls `next_line` when
    /// the tick count wraps (unless a pattern delay is outstanding), then
    /// re-evaluates every channel's per-tick effect and lazily
    /// recomputes pitch/volume for channels marked dirty.
    pub(crate) fn next_tick(&mut self) {
        self.tick += 1;
        if self.tick as i32 >= self.ticks_per_line {
            if self.pattern_delay > 0 {
                self.pattern_delay -= 1;
            } else {
                self.next_line();
            }
            self.tick = 0;
        }

        let num_channels = self.song.num_channels as usize;
        let tick = self.tick as i32;
        for i in 0..num_channels {
            self.lfo_rng = self.lfo_rng.wrapping_mul(0x0019_660d).wrapping_add(0x3c6e_f35f);
            let sample_default_volume = {
                let ch = &self.channels[i];
                (ch.sample != 0)
                    .then(|| self.song.samples[ch.sample as usize - 1].default_volume)
            };
            apply_tick_effect(&mut self.channels[i], tick, sample_default_volume);
        }

        let lfo_rng = self.lfo_rng;
        let samples_per_second = self.samples_per_second;
        for ch in self.channels.iter_mut().take(num_channels) {
            if ch.dirty & DIRTY_VOLUME != 0 {
                channel::update_volume(ch, lfo_rng);
            }
            if ch.dirty & DIRTY_PITCH != 0 {
                channel::update_pitch(ch, tick, lfo_rng, samples_per_second);
            }
        }
    }
}

/// Dispatch one channel's per-tick effect update: first the handful of
/// effects that fire on every tick of a line (arpeggio, retrigger, note
/// cut, note delay), then either the first-tick-only fine slides or the
/// non-first-tick continuous effects, matching the historical engine's
/// two-pass split.
fn apply_tick_effect(ch: &mut Channel, tick: i32, sample_default_volume: Option<u8>) {
    let param = ch.param;

    match ch.effect {
        effect::ARPEGGIO => {
            ch.dirty |= DIRTY_PITCH;
        }
        effect::RETRIGGER => {
            if param == 0 || tick % param as i32 == 0 {
                ch.position = 0.0;
                ch.lfo_step = 0;
            }
        }
        effect::NOTE_CUT => {
            if tick == param as i32 {
                ch.volume = 0;
                ch.dirty |= DIRTY_VOLUME;
            }
        }
        effect::NOTE_DELAY => {
            if tick == param as i32 {
                if let Some(default_volume) = sample_default_volume {
                    ch.volume = default_volume;
                    ch.dirty |= DIRTY_VOLUME;
                    ch.position = 0.0;
                    ch.lfo_step = 0;
                }
            }
        }
        _ => {}
    }

    if tick == 0 {
        match ch.effect {
            effect::FINE_PORTA_UP => channel::pitch_slide(ch, -(ch.param_e1 as i32)),
            effect::FINE_PORTA_DOWN => channel::pitch_slide(ch, ch.param_e2 as i32),
            effect::FINE_VOLUME_UP => channel::volume_slide(ch, ch.param_ea << 4),
            effect::FINE_VOLUME_DOWN => channel::volume_slide(ch, ch.param_eb & 0x0f),
            _ => {}
        }
    } else {
        match ch.effect {
            effect::PORTA_UP => {
                channel::pitch_slide(ch, -(param as i32));
            }
            effect::PORTA_DOWN => {
                channel::pitch_slide(ch, param as i32);
            }
            effect::TONE_PORTA | effect::TONE_PORTA_VOL_SLIDE => {
                if ch.effect == effect::TONE_PORTA_VOL_SLIDE {
                    channel::volume_slide(ch, param);
                }
                let rate = ch.param3 as i32;
                let order = (ch.period as i32) < (ch.target as i32);
                let closer = ch.period as i32 + if order { rate } else { -rate };
                let new_order = closer < ch.target as i32;
                ch.period = if new_order == order {
                    closer.clamp(0, u16::MAX as i32) as u16
                } else {
                    ch.target
                };
                ch.dirty |= DIRTY_PITCH;
            }
            effect::VIBRATO | effect::VIBRATO_VOL_SLIDE => {
                if ch.effect == effect::VIBRATO_VOL_SLIDE {
                    channel::volume_slide(ch, param);
                }
                ch.lfo_step = ch.lfo_step.wrapping_add(1);
                ch.dirty |= DIRTY_PITCH;
            }
            effect::TREMOLO => {
                ch.lfo_step = ch.lfo_step.wrapping_add(1);
                ch.dirty |= DIRTY_VOLUME;
            }
            effect::VOLUME_SLIDE => {
                channel::volume_slide(ch, param);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;

    fn mod_with_one_cell(cell: [u8; 4]) -> Vec<u8> {
        let mut data = vec![0u8; 1084 + 256];
        data[1080..1084].copy_from_slice(b"1CHN");
        data[950] = 1;
        data[1084..1088].copy_from_slice(&cell);
        data
    }

    #[test]
    fn set_volume_effect_sets_channel_volume() {
        // sample=0, period=0, effect C (set volume), param 0x20
        let data = mod_with_one_cell([0x00, 0x00, 0x0C, 0x20]);
        let ctx = Context::init(&data, 44100).unwrap();
        assert_eq!(ctx.channels[0].volume, 0x20);
    }

    #[test]
    fn speed_effect_updates_ticks_per_line() {
        let data = mod_with_one_cell([0x00, 0x00, 0x0F, 0x03]);
        let ctx = Context::init(&data, 44100).unwrap();
        assert_eq!(ctx.ticks_per_line, 3);
    }

    #[test]
    fn speed_effect_zero_param_is_ignored() {
        let data = mod_with_one_cell([0x00, 0x00, 0x0F, 0x00]);
        let ctx = Context::init(&data, 44100).unwrap();
        assert_eq!(ctx.ticks_per_line, 6);
    }

    #[test]
    fn pattern_break_advances_pattern_and_sets_target_line() {
        let mut data = vec![0u8; 1084 + 256 * 2];
        data[1080..1084].copy_from_slice(b"1CHN");
        data[950] = 2; // length 2
        data[952] = 0;
        data[953] = 1;
        // pattern 0, line 0: D10 -> break to line 10
        let cell_off = 1084;
        data[cell_off..cell_off + 4].copy_from_slice(&[0x00, 0x00, 0x0D, 0x10]);
        let mut ctx = Context::init(&data, 44100).unwrap();
        for _ in 0..(ctx.ticks_per_line) {
            ctx.next_tick();
        }
        assert_eq!(ctx.pattern, 1);
        assert_eq!(ctx.line, 10);
    }

    #[test]
    fn oversized_sample_index_is_silenced() {
        // sample_hi nibble = 0xF0 (240) | sample_lo nibble 0xF (15) = 255
        let data = mod_with_one_cell([0xF0, 0x00, 0xF0, 0x00]);
        let ctx = Context::init(&data, 44100).unwrap();
        assert_eq!(ctx.channels[0].sample, 0);
    }
}
