use unicode_script::{Script, UnicodeScript};

/// Scripts that are written without spaces and need dictionary segmentation.
pub fn is_segmented_script(ch: char) -> bool {
	matches!(ch.script(), Script::Han | Script::Hiragana | Script::Katakana)
}
