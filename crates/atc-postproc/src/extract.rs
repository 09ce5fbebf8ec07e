/// Find the outermost `[`...`]` span in `text`, tolerant of surrounding
/// prose (`spec.md` §4.6 step 6). Returns `None` if no bracket pair is
/// present at all; does not validate the contents are valid JSON.
pub fn outermost_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_array_surrounded_by_prose() {
        let text = "Here is the result:\n[{\"id\":1}]\nLet me know if you need more.";
        assert_eq!(outermost_array(text), Some("[{\"id\":1}]"));
    }

    #[test]
    fn returns_none_when_no_brackets_present() {
        assert_eq!(outermost_array("no json here"), None);
    }

    #[test]
    fn returns_none_when_brackets_are_reversed() {
        assert_eq!(outermost_array("] broken [ "), None);
    }

    #[test]
    fn extracts_bare_array_with_no_surrounding_text() {
        let text = "[1,2,3]";
        assert_eq!(outermost_array(text), Some("[1,2,3]"));
    }
}
