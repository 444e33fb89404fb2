// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Note names and pitch ratios.
//!
//! Every sample is assumed to be recorded at C4. This is a content
//! convention: the engine cannot check it, it only resamples relative to it.

/// Frequency of C4, the pitch all sample content is assumed to be authored at.
pub const REFERENCE_FREQUENCY: f64 = 261.626;

/// MIDI note number of the reference pitch.
pub const REFERENCE_NOTE: u8 = 60;

/// Lowest note accepted from note entry (A0).
pub const LOWEST_NOTE: u8 = 21;

/// Highest note accepted from note entry (C8).
pub const HIGHEST_NOTE: u8 = 108;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Parses a note name such as `C4`, `f#3` or `A#5` into a MIDI note number.
///
/// The octave must be a single digit and the result must fall within
/// [`LOWEST_NOTE`, `HIGHEST_NOTE`].
pub fn parse_note(name: &str) -> Option<u8> {
    let name = name.trim();
    let digit_at = name.find(|c: char| c.is_ascii_digit())?;
    let (pitch_class, octave) = name.split_at(digit_at);
    if octave.len() != 1 {
        return None;
    }

    let pitch_class = pitch_class.to_ascii_uppercase();
    let semitone = NOTE_NAMES.iter().position(|n| *n == pitch_class)? as u32;
    let octave = octave.parse::<u32>().ok()?;

    let note = (octave + 1) * 12 + semitone;
    (LOWEST_NOTE as u32..=HIGHEST_NOTE as u32)
        .contains(&note)
        .then_some(note as u8)
}

/// Frequency of the given MIDI note in equal temperament (A4 = 440 Hz).
pub fn note_frequency(note: u8) -> f64 {
    440.0 * 2f64.powf((note as f64 - 69.0) / 12.0)
}

/// Playback-rate ratio that moves a C4 sample to the given note.
pub fn note_to_ratio(note: u8) -> f64 {
    note_frequency(note) / REFERENCE_FREQUENCY
}

/// Parses a note name straight to a pitch ratio.
pub fn parse_ratio(name: &str) -> Option<f64> {
    parse_note(name).map(note_to_ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_note() {
        assert_eq!(parse_note("C4"), Some(60));
        assert_eq!(parse_note("c4"), Some(60));
        assert_eq!(parse_note("A4"), Some(69));
        assert_eq!(parse_note("f#3"), Some(54));
        assert_eq!(parse_note("A0"), Some(21));
        assert_eq!(parse_note("C8"), Some(108));
    }

    #[test]
    fn test_parse_note_rejects() {
        assert_eq!(parse_note(""), None);
        assert_eq!(parse_note("C"), None);
        assert_eq!(parse_note("H4"), None);
        assert_eq!(parse_note("C10"), None);
        assert_eq!(parse_note("G#0"), None);
        assert_eq!(parse_note("C#8"), None);
        assert_eq!(parse_note("4C"), None);
    }

    #[test]
    fn test_ratios() {
        let c4 = note_to_ratio(REFERENCE_NOTE);
        assert!((c4 - 1.0).abs() < 1e-4);

        let c5 = parse_ratio("C5").unwrap();
        assert!((c5 - 2.0).abs() < 1e-4);

        let c3 = parse_ratio("C3").unwrap();
        assert!((c3 - 0.5).abs() < 1e-4);
    }
}
