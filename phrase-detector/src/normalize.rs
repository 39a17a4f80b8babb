//! Text normalization applied to both catalog phrases and transcripts

/// Lower-case, strip punctuation and collapse whitespace
///
/// ASCII punctuation is removed outright, as is anything Unicode classes as
/// punctuation (curly quotes, dashes, ellipses) that transcription services
/// like to emit. The result never has leading, trailing or doubled spaces.
pub fn normalize(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !is_punctuation(*c))
        .flat_map(char::to_lowercase)
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_punctuation(c: char) -> bool {
    if c.is_ascii() {
        return c.is_ascii_punctuation();
    }

    matches!(
        c,
        '\u{00A1}'
            | '\u{00A7}'
            | '\u{00AB}'
            | '\u{00B6}'
            | '\u{00B7}'
            | '\u{00BB}'
            | '\u{00BF}'
            | '\u{2010}'..='\u{2027}'
            | '\u{2030}'..='\u{205E}'
            | '\u{3001}'..='\u{3003}'
            | '\u{FF01}'..='\u{FF0F}'
    )
}
