//! Small helpers on top of `quick-xml` shared by the XML-speaking
//! connectors (arXiv Atom, OAI-PMH, PMC JATS).

use quick_xml::events::BytesStart;

/// Lower-cased local name of an element, without its namespace prefix.
#[must_use]
pub fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase()
}

/// Value of the attribute whose local name is `name` (prefix ignored, so
/// `xlink:href` matches `href`).
#[must_use]
pub fn attr(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        let key = String::from_utf8_lossy(a.key.local_name().as_ref()).to_ascii_lowercase();
        if key == name {
            a.unescape_value().ok().map(|v| v.trim().to_string())
        } else {
            None
        }
    })
}

/// Collapses runs of whitespace into single spaces.
#[must_use]
pub fn squash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use quick_xml::Reader;
    use quick_xml::events::Event;

    use super::*;

    #[test]
    fn reads_prefixed_names_and_attributes() {
        let mut reader = Reader::from_str(
            r#"<ali:license_ref xlink:href="https://creativecommons.org/licenses/by/4.0/"/>"#,
        );
        let mut buf = Vec::new();
        match reader.read_event_into(&mut buf).unwrap() {
            Event::Empty(e) => {
                assert_eq!(local_name(&e), "license_ref");
                assert_eq!(
                    attr(&e, "href").as_deref(),
                    Some("https://creativecommons.org/licenses/by/4.0/")
                );
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn squashes_whitespace() {
        assert_eq!(squash("  a\n   b\tc "), "a b c");
    }
}
