//! Filesystem-safe rendering of metadata values used as path components.

/// Characters that cannot appear inside a single path component on the
/// platforms the library targets.
const RESERVED: [char; 9] = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Replace reserved characters with `-`, trim, and collapse whitespace runs.
///
/// The result never contains a path separator, and applying the function to
/// its own output returns the same string.
#[must_use]
pub fn sanitize(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|ch| if RESERVED.contains(&ch) { '-' } else { ch })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_characters_become_hyphens() {
        let cases = [
            ("Book/Title", "Book-Title"),
            ("Book\\Title", "Book-Title"),
            ("Book: The Title", "Book- The Title"),
            ("Book*Title", "Book-Title"),
            ("Book?Title", "Book-Title"),
            ("Book\"Title", "Book-Title"),
            ("Book<Title>", "Book-Title-"),
            ("Book|Title", "Book-Title"),
            (
                "Book: The/Title\\Part*2?<Test>|End",
                "Book- The-Title-Part-2--Test--End",
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(sanitize(input), expected, "input {input:?}");
        }
    }

    #[test]
    fn whitespace_is_trimmed_and_collapsed() {
        assert_eq!(sanitize("  Book Title"), "Book Title");
        assert_eq!(sanitize("Book Title  "), "Book Title");
        assert_eq!(sanitize("Book   Title"), "Book Title");
        assert_eq!(sanitize("Book\nTitle\tPart"), "Book Title Part");
        assert_eq!(sanitize("   "), "");
        assert_eq!(sanitize(""), "");
    }

    #[test]
    fn traversal_sequences_lose_their_separators() {
        assert_eq!(sanitize("../../../etc/passwd"), "..-..-..-etc-passwd");
    }

    #[test]
    fn ordinary_text_is_preserved() {
        assert_eq!(
            sanitize("Book Title - Part 2 (2024)"),
            "Book Title - Part 2 (2024)"
        );
        assert_eq!(sanitize("Book Título über 日本"), "Book Título über 日本");
    }

    /// Every string of up to four characters drawn from the reserved set,
    /// assorted whitespace, and a few ordinary characters.
    fn short_strings() -> Vec<String> {
        let alphabet: Vec<char> = RESERVED
            .into_iter()
            .chain([' ', '\t', '\n', '\u{a0}', 'a', '-', '.'])
            .collect();
        let mut all = vec![String::new()];
        let mut frontier = vec![String::new()];
        for _ in 0..4 {
            frontier = frontier
                .iter()
                .flat_map(|prefix| {
                    alphabet.iter().map(move |ch| {
                        let mut next = prefix.clone();
                        next.push(*ch);
                        next
                    })
                })
                .collect();
            all.extend(frontier.iter().cloned());
        }
        all
    }

    #[test]
    fn sanitizing_twice_changes_nothing() {
        let inputs = short_strings();
        assert_eq!(inputs.len(), 1 + 16 + 256 + 4096 + 65_536);
        for input in &inputs {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "input {input:?}");
            assert!(!once.contains(RESERVED), "input {input:?}");
            assert_eq!(once.trim(), once, "input {input:?}");
            assert!(!once.contains("  "), "input {input:?}");
        }
    }
}
