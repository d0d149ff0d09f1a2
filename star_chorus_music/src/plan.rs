// The plan: the central representation of one composition.
//
// A plan is an ordered list of timed `EventToken`s spread over four channels
// (melody, harmony, rhythm, bass) plus the global tempo, key and target
// duration. Times are in seconds so that the Audition Gate can rescale and
// trim events without knowing anything about bars or beats.
//
// The plan is the "source of truth" between planning and output: the critics
// read it, the Audition Gate repairs it in place, and MIDI export (midi.rs)
// derives from it, never the other way around. Only its fingerprints survive
// in a compose response.

use serde::{Deserialize, Serialize};

/// Musical channel of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Melody,
    Harmony,
    Rhythm,
    Bass,
}

impl Channel {
    pub const ALL: [Channel; 4] = [
        Channel::Melody,
        Channel::Harmony,
        Channel::Rhythm,
        Channel::Bass,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Melody => "melody",
            Channel::Harmony => "harmony",
            Channel::Rhythm => "rhythm",
            Channel::Bass => "bass",
        }
    }

    /// Pitch range (MIDI numbers) the planner keeps each channel inside.
    /// Rhythm pitches are General MIDI percussion keys.
    pub fn range(self) -> (i32, i32) {
        match self {
            Channel::Melody => (58, 86),
            Channel::Harmony => (45, 74),
            Channel::Rhythm => (35, 81),
            Channel::Bass => (28, 52),
        }
    }

    /// MIDI channel used on export. Rhythm goes to the GM drum channel.
    pub fn midi_channel(self) -> u8 {
        match self {
            Channel::Melody => 0,
            Channel::Harmony => 1,
            Channel::Bass => 2,
            Channel::Rhythm => 9,
        }
    }
}

/// One timed musical event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventToken {
    /// Onset in seconds.
    pub t0: f64,
    /// Release in seconds; `t1 > t0` for every well-formed event.
    pub t1: f64,
    /// MIDI-like pitch number.
    pub pitch: f64,
    /// Velocity in [0, 1].
    pub velocity: f64,
    pub channel: Channel,
    /// Events sharing a group may overlap (chord tones, simultaneous drum hits).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,
}

impl EventToken {
    pub fn new(channel: Channel, t0: f64, t1: f64, pitch: f64, velocity: f64) -> Self {
        EventToken {
            t0,
            t1,
            pitch,
            velocity,
            channel,
            group: None,
        }
    }

    pub fn with_group(mut self, group: u32) -> Self {
        self.group = Some(group);
        self
    }

    pub fn duration(&self) -> f64 {
        self.t1 - self.t0
    }

    /// True when all four numeric fields are finite.
    pub fn is_finite(&self) -> bool {
        self.t0.is_finite() && self.t1.is_finite() && self.pitch.is_finite() && self.velocity.is_finite()
    }

    /// True if both events carry the same explicit group.
    pub fn grouped_with(&self, other: &EventToken) -> bool {
        matches!((self.group, other.group), (Some(a), Some(b)) if a == b)
    }
}

/// A complete composition plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    /// Target duration in seconds. The Audition Gate timewarps towards it.
    pub duration_sec: f64,
    pub bpm: f64,
    /// Key name as produced by `Key::name`, e.g. "D dorian".
    pub key: String,
    pub events: Vec<EventToken>,
}

impl Plan {
    pub fn new(id: impl Into<String>, duration_sec: f64, bpm: f64, key: impl Into<String>) -> Self {
        Plan {
            id: id.into(),
            duration_sec,
            bpm,
            key: key.into(),
            events: Vec::new(),
        }
    }

    pub fn push(&mut self, event: EventToken) {
        self.events.push(event);
    }

    /// Seconds per beat at the plan's tempo.
    pub fn beat_sec(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Latest release time across all events (0 for an empty plan).
    pub fn span(&self) -> f64 {
        self.events.iter().map(|e| e.t1).fold(0.0, f64::max)
    }

    pub fn has_channel(&self, channel: Channel) -> bool {
        self.events.iter().any(|e| e.channel == channel)
    }

    /// Events of one channel in onset order.
    pub fn channel_events(&self, channel: Channel) -> Vec<&EventToken> {
        let mut events: Vec<&EventToken> =
            self.events.iter().filter(|e| e.channel == channel).collect();
        events.sort_by(|a, b| a.t0.total_cmp(&b.t0));
        events
    }

    /// Sort all events by onset, then channel. Stable, so chord tones keep
    /// their voicing order.
    pub fn sort_events(&mut self) {
        self.events
            .sort_by(|a, b| a.t0.total_cmp(&b.t0).then(a.channel.cmp(&b.channel)));
    }

    /// Count events per channel.
    pub fn stats(&self) -> PlanStats {
        let mut stats = PlanStats {
            total_events: self.events.len(),
            ..PlanStats::default()
        };
        for event in &self.events {
            match event.channel {
                Channel::Melody => stats.melody += 1,
                Channel::Harmony => stats.harmony += 1,
                Channel::Rhythm => stats.rhythm += 1,
                Channel::Bass => stats.bass += 1,
            }
        }
        stats
    }

    /// Compact text rendering of the melody line for debugging, one note
    /// name per onset.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} | {} | {:.1} bpm | {:.1}s\n",
            self.id, self.key, self.bpm, self.duration_sec
        );
        for channel in Channel::ALL {
            let events = self.channel_events(channel);
            out.push_str(&format!("{:>8}: ", channel.as_str()));
            for event in events.iter().take(24) {
                out.push_str(pitch_name(event.pitch.round().clamp(0.0, 127.0) as u8));
                out.push(' ');
            }
            if events.len() > 24 {
                out.push_str("...");
            }
            out.push('\n');
        }
        out
    }
}

/// Per-channel event counts.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PlanStats {
    pub total_events: usize,
    pub melody: usize,
    pub harmony: usize,
    pub rhythm: usize,
    pub bass: usize,
}

/// Convert a MIDI pitch to a compact note name (e.g., "C4", "F#3").
pub fn pitch_name(pitch: u8) -> &'static str {
    const NAMES: &[&str] = &[
        "C0", "C#0", "D0", "Eb0", "E0", "F0", "F#0", "G0", "Ab0", "A0", "Bb0", "B0", "C1", "C#1",
        "D1", "Eb1", "E1", "F1", "F#1", "G1", "Ab1", "A1", "Bb1", "B1", "C2", "C#2", "D2", "Eb2",
        "E2", "F2", "F#2", "G2", "Ab2", "A2", "Bb2", "B2", "C3", "C#3", "D3", "Eb3", "E3", "F3",
        "F#3", "G3", "Ab3", "A3", "Bb3", "B3", "C4", "C#4", "D4", "Eb4", "E4", "F4", "F#4", "G4",
        "Ab4", "A4", "Bb4", "B4", "C5", "C#5", "D5", "Eb5", "E5", "F5", "F#5", "G5", "Ab5", "A5",
        "Bb5", "B5", "C6", "C#6", "D6", "Eb6", "E6", "F6", "F#6", "G6", "Ab6", "A6", "Bb6", "B6",
        "C7", "C#7", "D7", "Eb7", "E7", "F7", "F#7", "G7", "Ab7", "A7", "Bb7", "B7", "C8", "C#8",
        "D8", "Eb8", "E8", "F8", "F#8", "G8", "Ab8", "A8", "Bb8", "B8",
    ];
    if (pitch as usize) < NAMES.len() {
        NAMES[pitch as usize]
    } else {
        "??"
    }
}

/// Musical interval helpers.
pub mod interval {
    /// Interval class (0-11) of a semitone distance, ignoring direction.
    pub fn class(semitones: i32) -> i32 {
        semitones.rem_euclid(12)
    }

    /// Consonances: unison, m3, M3, P4, P5, m6, M6, octave.
    pub fn is_consonant(semitones: i32) -> bool {
        matches!(semitones.unsigned_abs() % 12, 0 | 3 | 4 | 5 | 7 | 8 | 9)
    }

    /// Seconds, sevenths and the tritone.
    pub fn is_dissonant(semitones: i32) -> bool {
        !is_consonant(semitones)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_channel_plan() -> Plan {
        let mut plan = Plan::new("p", 4.0, 120.0, "C ionian");
        plan.push(EventToken::new(Channel::Melody, 1.0, 1.5, 62.0, 0.7));
        plan.push(EventToken::new(Channel::Melody, 0.0, 0.5, 60.0, 0.7));
        plan.push(EventToken::new(Channel::Harmony, 0.0, 2.0, 48.0, 0.5).with_group(0));
        plan.push(EventToken::new(Channel::Harmony, 0.0, 2.0, 52.0, 0.5).with_group(0));
        plan
    }

    #[test]
    fn channel_events_are_in_onset_order() {
        let plan = two_channel_plan();
        let melody = plan.channel_events(Channel::Melody);
        assert_eq!(melody.len(), 2);
        assert_eq!(melody[0].pitch, 60.0);
        assert_eq!(melody[1].pitch, 62.0);
    }

    #[test]
    fn span_is_latest_release() {
        let plan = two_channel_plan();
        assert_eq!(plan.span(), 2.0);
        assert_eq!(Plan::new("empty", 1.0, 60.0, "C ionian").span(), 0.0);
    }

    #[test]
    fn finite_check_covers_all_fields() {
        let mut e = EventToken::new(Channel::Melody, 0.0, 1.0, 60.0, 0.5);
        assert!(e.is_finite());
        e.velocity = f64::NAN;
        assert!(!e.is_finite());
        e.velocity = 0.5;
        e.t1 = f64::INFINITY;
        assert!(!e.is_finite());
    }

    #[test]
    fn grouping_requires_explicit_equal_groups() {
        let a = EventToken::new(Channel::Rhythm, 0.0, 0.1, 36.0, 0.9).with_group(4);
        let b = EventToken::new(Channel::Rhythm, 0.0, 0.1, 42.0, 0.6).with_group(4);
        let c = EventToken::new(Channel::Rhythm, 0.0, 0.1, 38.0, 0.6);
        assert!(a.grouped_with(&b));
        assert!(!a.grouped_with(&c));
        assert!(!c.grouped_with(&c.clone()));
    }

    #[test]
    fn stats_count_channels() {
        let stats = two_channel_plan().stats();
        assert_eq!(stats.total_events, 4);
        assert_eq!(stats.melody, 2);
        assert_eq!(stats.harmony, 2);
        assert_eq!(stats.rhythm, 0);
    }

    #[test]
    fn channel_serializes_lowercase() {
        let json = serde_json::to_string(&Channel::Harmony).unwrap();
        assert_eq!(json, "\"harmony\"");
    }

    #[test]
    fn interval_helpers() {
        assert!(interval::is_consonant(7));
        assert!(interval::is_consonant(-3));
        assert!(interval::is_dissonant(1));
        assert!(interval::is_dissonant(6));
        assert_eq!(interval::class(-5), 7);
    }
}
