//! Script parsing.
//!
//! Turns free-form script text into an ordered list of [`Cue`]s. Two dialects are
//! accepted and may be mixed in one script:
//!
//! ```text
//! DETECTIVE: Where were you?
//! SUSPECT: Home. Alone.
//! ```
//!
//! and screenplay blocks where the speaker sits on its own line:
//!
//! ```text
//! MARCUS
//! I've been waiting.
//! (He steps forward)
//! ```
//!
//! A parenthesized line is a direction and ends the speaker's block.
//!
//! Name detection is deliberately conservative. When a line is ambiguous it
//! becomes a direction rather than a new character.

mod patterns;

use serde::{Deserialize, Serialize};

use patterns::{is_direction_marker, is_reserved_word, match_heading, match_inline};

pub const MAX_NAME_LEN: usize = 21;
pub const MAX_HEADING_WORDS: usize = 3;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CueKind {
    Dialogue,
    Direction,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cue {
    pub kind: CueKind,
    /// Set iff `kind` is [`CueKind::Dialogue`].
    pub character: Option<String>,
    pub text: String,
    pub original_line: String,
}

impl Cue {
    pub fn dialogue(character: String, text: String, original_line: &str) -> Self {
        Self {
            kind: CueKind::Dialogue,
            character: Some(character),
            text,
            original_line: original_line.to_owned(),
        }
    }

    pub fn direction(original_line: &str) -> Self {
        Self {
            kind: CueKind::Direction,
            character: None,
            text: original_line.trim().to_owned(),
            original_line: original_line.to_owned(),
        }
    }

    pub fn is_dialogue(&self) -> bool {
        self.kind == CueKind::Dialogue
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParsedScript {
    pub cues: Vec<Cue>,
    /// Distinct dialogue speakers in first-seen order.
    pub characters: Vec<String>,
}

impl ParsedScript {
    pub fn has_characters(&self) -> bool {
        !self.characters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }
}

/// Parses raw script text. Pure: the same input always yields the same output.
pub fn parse(raw: &str) -> ParsedScript {
    let mut cues = Vec::new();
    let mut speaking: Option<String> = None;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if is_direction_marker(trimmed) {
            speaking = None;
            cues.push(Cue::direction(line));
            continue;
        }

        if let Some((name, text)) = match_inline(trimmed) {
            let name = normalize_name(&name);
            if is_plausible_name(&name) && !text.is_empty() {
                speaking = None;
                cues.push(Cue::dialogue(name, text, line));
                continue;
            }
        }

        if let Some(name) = match_heading(trimmed) {
            let name = normalize_name(&name);
            if is_plausible_name(&name) && name.split_whitespace().count() <= MAX_HEADING_WORDS {
                speaking = Some(name);
                continue;
            }
        }

        match &speaking {
            Some(name) => cues.push(Cue::dialogue(name.clone(), trimmed.to_owned(), line)),
            None => cues.push(Cue::direction(line)),
        }
    }

    let characters = collect_characters(&cues);
    tracing::debug!(
        cues = cues.len(),
        characters = characters.len(),
        "script parsed"
    );
    ParsedScript { cues, characters }
}

/// Distinct dialogue speakers, preserving first appearance.
pub fn collect_characters(cues: &[Cue]) -> Vec<String> {
    let mut seen = Vec::<String>::new();
    for name in cues.iter().filter_map(|c| c.character.as_deref()) {
        if !seen.iter().any(|s| s == name) {
            seen.push(name.to_owned());
        }
    }
    seen
}

/// Strips parenthetical asides such as `(CONT'D)` or `(V.O.)` and collapses whitespace.
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_plausible_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= MAX_NAME_LEN
        && !name.contains('.')
        && name.chars().any(|c| c.is_ascii_uppercase())
        && !name.chars().any(|c| c.is_lowercase())
        && !is_reserved_word(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(script: &ParsedScript) -> Vec<CueKind> {
        script.cues.iter().map(|c| c.kind).collect()
    }

    #[test]
    fn inline_dialect_yields_dialogue_in_order() {
        let parsed = parse("DETECTIVE: Where were you?\nSUSPECT: Home. Alone.");
        assert_eq!(kinds(&parsed), vec![CueKind::Dialogue, CueKind::Dialogue]);
        assert_eq!(parsed.characters, vec!["DETECTIVE", "SUSPECT"]);
        assert_eq!(parsed.cues[0].text, "Where were you?");
        assert_eq!(parsed.cues[1].text, "Home. Alone.");
    }

    #[test]
    fn screenplay_dialect_attributes_following_lines() {
        let parsed = parse("MARCUS\nI've been waiting.\n(He steps forward)\nELENA\nI wasn't hiding.");
        assert_eq!(
            parsed.cues,
            vec![
                Cue::dialogue("MARCUS".into(), "I've been waiting.".into(), "I've been waiting."),
                Cue::direction("(He steps forward)"),
                Cue::dialogue("ELENA".into(), "I wasn't hiding.".into(), "I wasn't hiding."),
            ]
        );
        assert_eq!(parsed.characters, vec!["MARCUS", "ELENA"]);
    }

    #[test]
    fn parse_is_deterministic() {
        let raw = "INT. WAREHOUSE - NIGHT\nMARCUS (CONT'D)\nWell?\nELENA: Not yet.\nLATER: they leave";
        assert_eq!(parse(raw), parse(raw));
    }

    #[test]
    fn roster_matches_distinct_dialogue_speakers() {
        let parsed = parse("A: one\nB: two\nA: three\n(beat)\nC\nfour\nB: five");
        assert_eq!(parsed.characters, vec!["A", "B", "C"]);
        assert_eq!(parsed.characters, collect_characters(&parsed.cues));
    }

    #[test]
    fn empty_script_has_no_cues() {
        let parsed = parse("");
        assert!(parsed.is_empty());
        assert!(!parsed.has_characters());

        let parsed = parse("   \n\n\t\n");
        assert!(parsed.is_empty());
    }

    #[test]
    fn direction_only_script_has_no_characters() {
        let parsed = parse("INT. KITCHEN - DAY\nEXT. GARDEN - NIGHT\nFADE OUT.\n---\n*Silence*");
        assert_eq!(parsed.len(), 5);
        assert!(parsed.cues.iter().all(|c| c.kind == CueKind::Direction));
        assert!(!parsed.has_characters());
    }

    #[test]
    fn scene_heading_clears_current_speaker() {
        let parsed = parse("MARCUS\nHello.\nINT. HALLWAY - DAY\nA door creaks.");
        assert_eq!(
            kinds(&parsed),
            vec![CueKind::Dialogue, CueKind::Direction, CueKind::Direction]
        );
    }

    #[test]
    fn parenthetical_clears_current_speaker() {
        let parsed = parse("MARCUS\nHello.\n(beat)\nThe lights flicker.");
        assert_eq!(
            kinds(&parsed),
            vec![CueKind::Dialogue, CueKind::Direction, CueKind::Direction]
        );
        assert_eq!(parsed.characters, vec!["MARCUS"]);
    }

    #[test]
    fn inline_attribution_clears_current_speaker() {
        let parsed = parse("MARCUS\nHello.\nELENA: Hi.\nThe lights flicker.");
        assert_eq!(parsed.cues[2].kind, CueKind::Direction);
    }

    #[test]
    fn heading_parenthetical_is_stripped() {
        let parsed = parse("MARCUS (CONT'D)\nStill here.\nELENA (V.O.): Good.");
        assert_eq!(parsed.characters, vec!["MARCUS", "ELENA"]);
        assert_eq!(parsed.cues[1].text, "Good.");
    }

    #[test]
    fn reserved_time_words_are_not_characters() {
        let parsed = parse("LATER: the room is empty\nMEANWHILE\nnothing happens");
        assert!(!parsed.has_characters());
        assert!(parsed.cues.iter().all(|c| c.kind == CueKind::Direction));
    }

    #[test]
    fn names_with_periods_or_lowercase_are_rejected() {
        let parsed = parse("DR. SMITH: Sit down.\nAlice: hello");
        assert!(!parsed.has_characters());
    }

    #[test]
    fn overlong_names_are_rejected() {
        let parsed = parse("THE EXCEPTIONALLY LONG NAMED PERSON: hi");
        assert!(!parsed.has_characters());
    }

    #[test]
    fn heading_with_too_many_words_is_not_a_speaker() {
        let parsed = parse("THE OLD GREY MAN\nwalks in");
        assert!(!parsed.has_characters());
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn transitions_and_dividers_are_directions() {
        for line in [
            "CUT TO:",
            "FADE IN:",
            "DISSOLVE TO:",
            "----",
            "*thunder*",
            "THE END",
            "(CONT'D)",
            "KITCHEN - MORNING",
        ] {
            let parsed = parse(&format!("BOB\n{line}\nHey."));
            assert_eq!(parsed.cues[0].kind, CueKind::Direction, "line {line:?}");
            assert_eq!(parsed.cues[1].kind, CueKind::Direction, "after {line:?}");
        }
    }

    #[test]
    fn dialogue_cues_always_have_character_and_text() {
        let parsed = parse("BOB:    \nBOB\n\n(quietly)\nSure.\nANN: fine");
        for cue in parsed.cues.iter().filter(|c| c.is_dialogue()) {
            assert!(cue.character.as_deref().is_some_and(|c| !c.is_empty()));
            assert!(!cue.text.is_empty());
        }
        assert_eq!(parsed.characters, vec!["BOB", "ANN"]);
    }

    #[test]
    fn original_line_is_retained() {
        let parsed = parse("  BOB:  Morning.  ");
        assert_eq!(parsed.cues[0].original_line, "  BOB:  Morning.  ");
        assert_eq!(parsed.cues[0].text, "Morning.");
    }

    #[test]
    fn normalize_name_collapses_whitespace() {
        assert_eq!(normalize_name(" MARY  JANE (O.S.) "), "MARY JANE");
    }
}
