/// What a [`MarkupScanner`] pulled out of a document.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub title: String,
    pub meta_refresh: Option<String>,
}

/// Lightweight markup scanner extracting the document title and the first
/// `<meta http-equiv="refresh">` declaration.
///
/// It is not a parser: it only walks tags, skipping comments and the raw text of
/// `<script>` and `<style>`. Scanners keep their buffers between runs, which is why
/// they are pooled instead of created per page.
#[derive(Debug, Default)]
pub struct MarkupScanner {
    lowered: String,
    attrs: Vec<(String, String)>,
}

impl MarkupScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan(&mut self, text: &str) -> ScanResult {
        self.lowered.clear();
        self.lowered.push_str(text);
        self.lowered.make_ascii_lowercase();

        let mut result = ScanResult::default();
        let mut title_seen = false;
        let mut pos = 0;

        while let Some(offset) = self.lowered[pos..].find('<') {
            let start = pos + offset;
            let rest = &self.lowered[start..];

            if rest.starts_with("<!--") {
                match rest[4..].find("-->") {
                    Some(end) => pos = start + 4 + end + 3,
                    None => break,
                }
                continue;
            }

            if let Some(name) = ["script", "style", "textarea"]
                .into_iter()
                .find(|name| is_tag(rest, name))
            {
                let closing = format!("</{name}");
                match rest.find(&closing) {
                    Some(end) => pos = start + end + closing.len(),
                    None => break,
                }
                continue;
            }

            if !title_seen && is_tag(rest, "title") {
                title_seen = true;
                let Some(open_end) = rest.find('>') else { break };
                let content_start = start + open_end + 1;
                let content_end = self.lowered[content_start..]
                    .find("</title")
                    .map(|end| content_start + end)
                    .unwrap_or(self.lowered.len());
                result.title = clean_text(&text[content_start..content_end]);
                pos = content_end;
                continue;
            }

            if result.meta_refresh.is_none() && is_tag(rest, "meta") {
                let end = rest.find('>').map(|e| start + e).unwrap_or(self.lowered.len());
                self.parse_attributes(&text[start + "<meta".len()..end]);

                let refresh = self
                    .attrs
                    .iter()
                    .any(|(name, value)| name == "http-equiv" && value.trim().eq_ignore_ascii_case("refresh"));
                if refresh {
                    result.meta_refresh = self
                        .attrs
                        .iter()
                        .find(|(name, _)| name == "content")
                        .map(|(_, value)| value.clone());
                }
                pos = end;
                continue;
            }

            pos = start + 1;
        }

        result
    }

    /// Fills `self.attrs` with the lowercased names and raw values of a tag's attributes.
    fn parse_attributes(&mut self, input: &str) {
        self.attrs.clear();
        let bytes = input.as_bytes();
        let mut i = 0;

        while i < bytes.len() {
            while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b'/') {
                i += 1;
            }
            let name_start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() && !matches!(bytes[i], b'=' | b'/') {
                i += 1;
            }
            if name_start == i {
                break;
            }
            let name = input[name_start..i].to_ascii_lowercase();

            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() || bytes[i] != b'=' {
                self.attrs.push((name, String::new()));
                continue;
            }
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }

            let value = match bytes.get(i) {
                Some(&quote) if quote == b'"' || quote == b'\'' => {
                    let value_start = i + 1;
                    let value_end = input[value_start..]
                        .find(quote as char)
                        .map(|e| value_start + e)
                        .unwrap_or(bytes.len());
                    i = (value_end + 1).min(bytes.len());
                    &input[value_start..value_end]
                }
                _ => {
                    let value_start = i;
                    while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                        i += 1;
                    }
                    &input[value_start..i]
                }
            };
            self.attrs.push((name, decode_entities(value)));
        }
    }
}

/// True when `rest` opens the tag `name` (and not, say, `<metadata` for `meta`).
fn is_tag(rest: &str, name: &str) -> bool {
    let Some(after) = rest.strip_prefix('<').and_then(|r| r.strip_prefix(name)) else {
        return false;
    };
    matches!(after.bytes().next(), None | Some(b'>' | b'/' | b' ' | b'\t' | b'\n' | b'\r' | b'\x0C'))
}

fn clean_text(raw: &str) -> String {
    decode_entities(&raw.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_title() {
        let mut scanner = MarkupScanner::new();
        let res = scanner.scan("<HTML><HEAD><TITLE>Tom &amp; Jerry</TITLE></HEAD></HTML>");
        assert_eq!(res.title, "Tom & Jerry");
        assert_eq!(res.meta_refresh, None);
    }

    #[test]
    fn meta_refresh_variants() {
        let mut scanner = MarkupScanner::new();

        let res = scanner.scan(r#"<meta http-equiv="refresh" content="5;URL='/other'">"#);
        assert_eq!(res.meta_refresh.as_deref(), Some("5;URL='/other'"));

        let res = scanner.scan("<meta content=3 http-equiv=REFRESH>");
        assert_eq!(res.meta_refresh.as_deref(), Some("3"));

        let res = scanner.scan(r#"<meta http-equiv="content-type" content="text/html"><meta name="refresh" content="1">"#);
        assert_eq!(res.meta_refresh, None);
    }

    #[test]
    fn skips_comments_and_scripts() {
        let mut scanner = MarkupScanner::new();
        let html = r#"
            <!-- <title>commented</title> -->
            <script>var s = '<meta http-equiv="refresh" content="0">';</script>
            <title>real</title>
        "#;
        let res = scanner.scan(html);
        assert_eq!(res.title, "real");
        assert_eq!(res.meta_refresh, None);
    }

    #[test]
    fn metadata_is_not_meta() {
        let mut scanner = MarkupScanner::new();
        let res = scanner.scan(r#"<metadata http-equiv="refresh" content="0">"#);
        assert_eq!(res.meta_refresh, None);
    }

    #[test]
    fn reuse_does_not_leak_state() {
        let mut scanner = MarkupScanner::new();
        scanner.scan(r#"<title>first</title><meta http-equiv="refresh" content="1">"#);
        let res = scanner.scan("<p>nothing</p>");
        assert_eq!(res, ScanResult::default());
    }
}
