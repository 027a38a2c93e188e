use regex::Regex;
use std::sync::OnceLock;

/// Words that look like speaker names in all caps but mark time in a scene.
pub const RESERVED_WORDS: &[&str] = &[
    "LATER",
    "MEANWHILE",
    "EARLIER",
    "MOMENTS",
    "CONTINUOUS",
    "SAME",
];

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern compiles"))
}

fn scene_heading() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"(?i)^(?:INT\.?/EXT|EXT\.?/INT|I/E|INT|EXT)(?:\.|\s|$)")
}

fn transition() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(
        &CELL,
        r"^(?:FADE (?:IN|OUT|TO)|CUT TO|SMASH CUT|MATCH CUT|JUMP CUT|DISSOLVE(?: TO)?)\b|^[A-Z ]+ TO:$",
    )
}

fn continuation_marker() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(
        &CELL,
        r"^(?:\((?:CONT(?:'|’)?D|CONTINUED|MORE)\)|CONT(?:'|’)?D|CONTINUED:?)$",
    )
}

fn title_marker() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"^(?:THE END|END CREDITS|END OF (?:SCENE|ACT)|TITLE(?: CARD)?:|SUPER:)")
}

fn time_of_day_heading() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(
        &CELL,
        r"^[A-Z0-9 .'/]+\s+[-–—]\s+(?:DAY|NIGHT|MORNING|AFTERNOON|EVENING|DAWN|DUSK|LATER|MOMENTS LATER|CONTINUOUS|SAME)$",
    )
}

fn divider() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"^-{3,}$")
}

fn inline_attribution() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"^([A-Z][A-Z0-9 '_\-]*?)\s*(?:\([^)]*\))?\s*:\s*(.+)$")
}

fn standalone_heading() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    regex(&CELL, r"^([A-Z0-9][A-Z0-9 '_\-]*?)\s*(?:\([^)]*\))?\s*:?$")
}

fn is_fully_parenthesized(line: &str) -> bool {
    line.len() >= 2 && line.starts_with('(') && line.ends_with(')')
}

fn is_asterisk_wrapped(line: &str) -> bool {
    line.len() >= 2 && line.starts_with('*') && line.ends_with('*')
}

/// Lines that always end the current speaker's block.
pub fn is_direction_marker(line: &str) -> bool {
    scene_heading().is_match(line)
        || transition().is_match(line)
        || continuation_marker().is_match(line)
        || title_marker().is_match(line)
        || time_of_day_heading().is_match(line)
        || is_fully_parenthesized(line)
        || is_asterisk_wrapped(line)
        || divider().is_match(line)
}

/// `NAME: text`, returning the raw name and trimmed text.
pub fn match_inline(line: &str) -> Option<(String, String)> {
    let caps = inline_attribution().captures(line)?;
    let name = caps.get(1)?.as_str().to_owned();
    let text = caps.get(2)?.as_str().trim().to_owned();
    Some((name, text))
}

/// A speaker name on a line of its own.
pub fn match_heading(line: &str) -> Option<String> {
    let caps = standalone_heading().captures(line)?;
    Some(caps.get(1)?.as_str().to_owned())
}

pub fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS.iter().any(|w| name.eq_ignore_ascii_case(w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_headings_are_markers() {
        assert!(is_direction_marker("INT. OFFICE - DAY"));
        assert!(is_direction_marker("EXT. ROOFTOP"));
        assert!(is_direction_marker("INT/EXT. CAR - MOVING"));
        assert!(is_direction_marker("int. kitchen"));
        assert!(!is_direction_marker("INTERROGATOR"));
    }

    #[test]
    fn parentheticals_are_markers() {
        assert!(is_direction_marker("(beat)"));
        assert!(is_direction_marker("(He steps forward)"));
        assert!(!is_direction_marker("(aside) then more"));
    }

    #[test]
    fn transitions_must_be_uppercase() {
        assert!(is_direction_marker("CUT TO:"));
        assert!(is_direction_marker("SMASH CUT TO:"));
        assert!(!is_direction_marker("Cut it out."));
    }

    #[test]
    fn inline_match_splits_name_and_text() {
        assert_eq!(
            match_inline("BOB (O.S.): Over here!"),
            Some(("BOB".to_owned(), "Over here!".to_owned()))
        );
        assert_eq!(match_inline("Bob: hi"), None);
        assert_eq!(match_inline("BOB:"), None);
    }

    #[test]
    fn heading_match_accepts_trailing_parenthetical() {
        assert_eq!(match_heading("MARCUS (CONT'D)"), Some("MARCUS".to_owned()));
        assert_eq!(match_heading("O'BRIEN"), Some("O'BRIEN".to_owned()));
        assert_eq!(match_heading("Marcus"), None);
        assert_eq!(match_heading("HELP!"), None);
    }

    #[test]
    fn reserved_words_are_case_insensitive() {
        assert!(is_reserved_word("later"));
        assert!(is_reserved_word("SAME"));
        assert!(!is_reserved_word("SAMUEL"));
    }
}
