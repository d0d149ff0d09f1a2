// MIDI output from plans.
//
// Converts a Plan into a Standard MIDI File (SMF) for audition and debugging.
// Each channel that has events maps to its own track; rhythm goes to the GM
// drum channel (see `Channel::midi_channel`). Event times in seconds map to
// ticks at the plan's tempo.
//
// Uses the `midly` crate for MIDI writing. Output is SMF Format 1 (multi-track).

use crate::plan::{Channel, Plan};
use midly::{
    Format, Header, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::path::Path;

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

/// Convert a Plan to MIDI and write to a file.
pub fn write_midi(plan: &Plan, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let smf = plan_to_smf(plan);
    let mut buf = Vec::new();
    smf.write(&mut buf)?;
    std::fs::write(path, &buf)?;
    Ok(())
}

/// Convert a Plan to an in-memory SMF.
pub fn plan_to_smf(plan: &Plan) -> Smf<'static> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));
    let bpm = if plan.bpm.is_finite() && plan.bpm > 0.0 { plan.bpm } else { 120.0 };
    let ticks_per_sec = bpm / 60.0 * TICKS_PER_QUARTER as f64;
    let to_tick = |seconds: f64| (seconds.max(0.0) * ticks_per_sec).round() as u32;

    // Track 0: tempo track
    let mut tempo_track: Track<'static> = Vec::new();
    let tempo_microseconds = (60_000_000.0 / bpm).round() as u32;
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(midly::MetaMessage::Tempo(u24::new(tempo_microseconds))),
    });
    tempo_track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(midly::MetaMessage::EndOfTrack),
    });
    smf.tracks.push(tempo_track);

    for channel in Channel::ALL {
        let events = plan.channel_events(channel);
        if events.is_empty() {
            continue;
        }
        let midi_channel = u4::new(channel.midi_channel());
        let mut track: Track<'static> = Vec::new();

        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(midly::MetaMessage::TrackName(channel.as_str().as_bytes())),
        });
        if channel != Channel::Rhythm {
            track.push(TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel: midi_channel,
                    message: MidiMessage::ProgramChange {
                        program: u7::new(program_for(channel)),
                    },
                },
            });
        }

        // (tick, is_note_on, key, velocity). Note-offs sort before note-ons
        // at the same tick so repeated pitches retrigger cleanly.
        let mut messages: Vec<(u32, bool, u8, u8)> = Vec::with_capacity(events.len() * 2);
        for event in events.iter().filter(|e| e.is_finite()) {
            let key = event.pitch.round().clamp(0.0, 127.0) as u8;
            let vel = (event.velocity * 127.0).round().clamp(1.0, 127.0) as u8;
            let on = to_tick(event.t0);
            let off = to_tick(event.t1).max(on + 1);
            messages.push((on, true, key, vel));
            messages.push((off, false, key, 0));
        }
        messages.sort_by_key(|&(tick, is_on, key, _)| (tick, is_on, key));

        let mut last_tick = 0u32;
        for (tick, is_on, key, vel) in messages {
            let message = if is_on {
                MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(vel),
                }
            } else {
                MidiMessage::NoteOff {
                    key: u7::new(key),
                    vel: u7::new(0),
                }
            };
            track.push(TrackEvent {
                delta: u28::new(tick - last_tick),
                kind: TrackEventKind::Midi {
                    channel: midi_channel,
                    message,
                },
            });
            last_tick = tick;
        }

        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(midly::MetaMessage::EndOfTrack),
        });
        smf.tracks.push(track);
    }

    smf
}

/// General MIDI program per pitched channel.
fn program_for(channel: Channel) -> u8 {
    match channel {
        Channel::Melody => 73,  // flute
        Channel::Harmony => 89, // warm pad
        Channel::Bass => 32,    // acoustic bass
        Channel::Rhythm => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::EventToken;
    use crate::planner::{PhrasePlanner, PlanStrategy};

    #[test]
    fn test_plan_to_smf_basic() {
        let mut plan = Plan::new("p", 2.0, 120.0, "C ionian");
        plan.push(EventToken::new(Channel::Melody, 0.0, 0.5, 60.0, 0.7));
        plan.push(EventToken::new(Channel::Melody, 0.5, 1.0, 64.0, 0.7));
        plan.push(EventToken::new(Channel::Harmony, 0.0, 1.0, 48.0, 0.5));

        let smf = plan_to_smf(&plan);
        // 1 tempo track + melody + harmony
        assert_eq!(smf.tracks.len(), 3);
        // name + program + 2 notes * 2 messages + end of track
        assert_eq!(smf.tracks[1].len(), 7);
    }

    #[test]
    fn full_plan_writes_all_tracks() {
        let plan = PhrasePlanner::default().plan(&[0.6, 0.5, 0.5, 0.6, 0.3, 0.5], None);
        let smf = plan_to_smf(&plan);
        assert_eq!(smf.tracks.len(), 5);
        let mut buf = Vec::new();
        smf.write(&mut buf).unwrap();
        assert!(buf.starts_with(b"MThd"));
    }
}
