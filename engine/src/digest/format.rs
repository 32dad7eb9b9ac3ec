//! Dialogue format validator/fixer: heals the most common LLM deviations
//! from the exact `SPEAKER_1:` / `SPEAKER_2:` line contract.

use std::collections::HashMap;

use regex::Regex;

/// Attempts to heal `script` into the strict `SPEAKER_N: [tag] text` shape.
/// Returns `None` if, after fixing, neither SPEAKER_1 nor SPEAKER_2 labels
/// are present.
pub fn fix_dialogue_format(script: &str) -> Option<String> {
    let named_line = Regex::new(r"(?m)^([A-Z][a-zA-Z0-9 ]{0,30}):\s*").unwrap();
    let host_line = Regex::new(r"(?m)^Host\s*([12]):\s*").unwrap();
    let missing_colon = Regex::new(r"(?m)^(SPEAKER_[12])\s+").unwrap();
    let tag_before_colon = Regex::new(r"(?m)^(SPEAKER_[12])\s*(\[[^\]]+\]|\([^)]+\))\s*:\s*").unwrap();

    let mut fixed = script.to_string();

    fixed = tag_before_colon.replace_all(&fixed, "$1: $2 ").to_string();
    fixed = host_line.replace_all(&fixed, "SPEAKER_$1: ").to_string();
    fixed = missing_colon.replace_all(&fixed, "$1: ").to_string();

    if !(fixed.contains("SPEAKER_1:") && fixed.contains("SPEAKER_2:")) {
        let mut name_to_speaker: HashMap<String, &'static str> = HashMap::new();
        let mut next = ["SPEAKER_1", "SPEAKER_2"].into_iter();
        let mut rewritten = String::with_capacity(fixed.len());
        for line in fixed.lines() {
            if let Some(caps) = named_line.captures(line) {
                let name = caps.get(1).unwrap().as_str().to_string();
                if name.starts_with("SPEAKER_") {
                    rewritten.push_str(line);
                    rewritten.push('\n');
                    continue;
                }
                let speaker = *name_to_speaker.entry(name.clone()).or_insert_with(|| next.next().unwrap_or("SPEAKER_2"));
                rewritten.push_str(&named_line.replace(line, format!("{speaker}: ")));
                rewritten.push('\n');
            } else {
                rewritten.push_str(line);
                rewritten.push('\n');
            }
        }
        fixed = rewritten;
    }

    if fixed.contains("SPEAKER_1:") && fixed.contains("SPEAKER_2:") {
        Some(fixed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_first_seen_names_in_order() {
        let script = "Maya: [excited] Welcome back!\nJules: [calm] Great to be here.\n";
        let fixed = fix_dialogue_format(script).unwrap();
        assert!(fixed.starts_with("SPEAKER_1: [excited] Welcome back!"));
        assert!(fixed.contains("SPEAKER_2: [calm] Great to be here."));
    }

    #[test]
    fn fixes_host_n_labels() {
        let script = "Host 1: Hello.\nHost 2: Hi there.\n";
        let fixed = fix_dialogue_format(script).unwrap();
        assert!(fixed.contains("SPEAKER_1: Hello."));
        assert!(fixed.contains("SPEAKER_2: Hi there."));
    }

    #[test]
    fn fixes_tag_before_colon() {
        let script = "SPEAKER_1 [excited]: Hello.\nSPEAKER_2 [calm]: Hi.\n";
        let fixed = fix_dialogue_format(script).unwrap();
        assert!(fixed.contains("SPEAKER_1: [excited]"));
    }

    #[test]
    fn unhealable_script_returns_none() {
        let script = "Just a narrative paragraph with no speaker labels at all.";
        assert!(fix_dialogue_format(script).is_none());
    }
}
