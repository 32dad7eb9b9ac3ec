//! Dialogue chunker: splits a dialogue script into chunks at speaker-turn
//! boundaries only, sub-splitting an over-long turn at sentence boundaries,
//! and packs turns greedily under a hard character cap.

pub mod tts;

use regex::Regex;
use std::sync::OnceLock;

const TURN_BOUNDARY_PATTERN: &str = r"^(SPEAKER_[12])(?:\s*[\(\[][^\)\]]+[\)\]])?:\s*";

fn turn_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TURN_BOUNDARY_PATTERN).unwrap())
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub number: usize,
    pub text: String,
    pub char_count: usize,
    pub speakers: Vec<String>,
    pub turn_count: usize,
}

/// Splits `script` into one `Turn` per speaker line. Lines not matching the
/// turn pattern are appended to the current turn (multi-line dialogue).
pub fn split_into_turns(script: &str) -> Vec<Turn> {
    let re = turn_regex();
    let mut turns: Vec<Turn> = Vec::new();
    for line in script.lines() {
        if let Some(caps) = re.captures(line) {
            let speaker = caps.get(1).unwrap().as_str().to_string();
            let text = line[caps.get(0).unwrap().end()..].to_string();
            turns.push(Turn { speaker, text });
        } else if let Some(last) = turns.last_mut() {
            if !line.trim().is_empty() {
                last.text.push('\n');
                last.text.push_str(line);
            }
        }
    }
    turns
}

/// Splits on `.`/`!`/`?` followed by whitespace. Plain char-scanning rather
/// than a lookbehind regex, since the `regex` crate doesn't support one.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().map(|n| n.is_whitespace()).unwrap_or(true) {
            sentences.push(current.trim().to_string());
            current.clear();
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    sentences
}

/// Pre-splits a single over-long turn at sentence boundaries, re-prepending
/// the speaker label to each sub-turn and subtracting label overhead from
/// the per-sub-turn budget.
fn split_long_turn(turn: &Turn, max_chunk_size: usize) -> Vec<String> {
    let label_len = format!("{}: ", turn.speaker).len();
    let budget = max_chunk_size.saturating_sub(label_len).max(1);
    let sentences = split_sentences(turn.text.trim());

    let mut sub_turns = Vec::new();
    let mut current = String::new();
    for sentence in &sentences {
        if !current.is_empty() && current.len() + 1 + sentence.len() > budget {
            sub_turns.push(format!("{}: {}", turn.speaker, current));
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }
    if !current.is_empty() {
        sub_turns.push(format!("{}: {}", turn.speaker, current));
    }
    if sub_turns.is_empty() {
        sub_turns.push(format!("{}: {}", turn.speaker, turn.text.trim()));
    }
    sub_turns
}

/// Greedily packs turns into chunks each `<= max_chunk_size` characters,
/// counting an inter-turn newline in the budget. Splits only at turn
/// boundaries; an over-long turn is pre-split at sentence boundaries first.
pub fn chunk_dialogue(script: &str, max_chunk_size: usize) -> Vec<Chunk> {
    let turns = split_into_turns(script);
    let mut lines: Vec<(String, String)> = Vec::new();
    for turn in &turns {
        let full_line = format!("{}: {}", turn.speaker, turn.text);
        if full_line.len() <= max_chunk_size {
            lines.push((turn.speaker.clone(), full_line));
        } else {
            for sub in split_long_turn(turn, max_chunk_size) {
                lines.push((turn.speaker.clone(), sub));
            }
        }
    }

    let mut chunks = Vec::new();
    let mut current_lines: Vec<&str> = Vec::new();
    let mut current_speakers: Vec<String> = Vec::new();
    let mut current_len = 0usize;

    let flush = |lines: &mut Vec<&str>, speakers: &mut Vec<String>, chunks: &mut Vec<Chunk>| {
        if lines.is_empty() {
            return;
        }
        let text = lines.join("\n");
        chunks.push(Chunk {
            number: chunks.len(),
            char_count: text.len(),
            turn_count: lines.len(),
            text,
            speakers: speakers.clone(),
        });
        lines.clear();
        speakers.clear();
    };

    for (speaker, line) in &lines {
        let added_len = line.len() + if current_lines.is_empty() { 0 } else { 1 };
        if current_len + added_len > max_chunk_size && !current_lines.is_empty() {
            flush(&mut current_lines, &mut current_speakers, &mut chunks);
            current_len = 0;
        }
        current_lines.push(line.as_str());
        if !current_speakers.contains(speaker) {
            current_speakers.push(speaker.clone());
        }
        current_len += line.len() + if current_lines.len() > 1 { 1 } else { 0 };
    }
    flush(&mut current_lines, &mut current_speakers, &mut chunks);

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_script() -> String {
        "SPEAKER_1: [excited] Welcome to the show!\nSPEAKER_2: [calm] Glad to be here.\n".to_string()
    }

    #[test]
    fn splits_into_turns_by_speaker() {
        let turns = split_into_turns(&sample_script());
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].speaker, "SPEAKER_1");
        assert!(turns[0].text.contains("Welcome to the show!"));
    }

    #[test]
    fn chunks_never_exceed_cap() {
        let script = sample_script().repeat(50);
        let chunks = chunk_dialogue(&script, 200);
        for chunk in &chunks {
            assert!(chunk.char_count <= 200, "chunk exceeded cap: {}", chunk.char_count);
        }
    }

    #[test]
    fn chunks_contain_only_whole_turns_when_short() {
        let script = sample_script();
        let chunks = chunk_dialogue(&script, 2800);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].turn_count, 2);
    }

    #[test]
    fn long_single_turn_is_sentence_sub_split() {
        let long_text = "This is sentence one. This is sentence two. This is sentence three. This is sentence four.";
        let turn = Turn {
            speaker: "SPEAKER_1".to_string(),
            text: long_text.to_string(),
        };
        let sub_turns = split_long_turn(&turn, 50);
        assert!(sub_turns.len() > 1);
        for sub in &sub_turns {
            assert!(sub.starts_with("SPEAKER_1:"));
        }
    }
}
