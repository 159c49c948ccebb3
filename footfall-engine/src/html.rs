//! Tolerant HTML scanning
//!
//! The sources publish undocumented, occasionally malformed markup, so this
//! module does local scanning inside known blocks instead of building a full
//! DOM: case-insensitive tag detection, attribute parsing that accepts
//! single, double or missing quotes, and nesting-aware block matching.
//!
//! Only what the pollers need is supported: tables by id, rows and cells,
//! `<img src>` collection, and simple selectors (`#id`, `.class`, `tag`,
//! `tag#id`, `tag.class`).

/// A parsed start tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    pub name: String,
    /// Byte offset of `<`
    pub start: usize,
    /// Byte offset just past `>`
    pub end: usize,
    pub attrs: Vec<(String, String)>,
}

impl StartTag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .map(|c| c.split_ascii_whitespace().any(|c| c == class))
            .unwrap_or(false)
    }
}

/// Simple CSS selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub class: Option<String>,
}

impl Selector {
    /// Parse `tag`, `#id`, `.class`, `tag#id` or `tag.class`
    pub fn parse(selector: &str) -> Option<Self> {
        let s = selector.trim();
        if s.is_empty() || s.contains(char::is_whitespace) {
            return None;
        }
        let split = s.find(['#', '.']).unwrap_or(s.len());
        let (tag, rest) = s.split_at(split);
        let tag = (!tag.is_empty()).then(|| tag.to_ascii_lowercase());

        let (id, class) = match rest.chars().next() {
            Some('#') => (Some(rest[1..].to_string()), None),
            Some('.') => (None, Some(rest[1..].to_string())),
            _ => (None, None),
        };
        if id.as_deref() == Some("") || class.as_deref() == Some("") {
            return None;
        }
        Some(Self { tag, id, class })
    }

    pub fn matches(&self, tag: &StartTag) -> bool {
        if let Some(t) = &self.tag {
            if !tag.name.eq_ignore_ascii_case(t) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if tag.attr("id") != Some(id.as_str()) {
                return false;
            }
        }
        if let Some(class) = &self.class {
            if !tag.has_class(class) {
                return false;
            }
        }
        true
    }
}

/// True if any element in `html` matches `selector`
pub fn matches_selector(html: &str, selector: &str) -> bool {
    let Some(sel) = Selector::parse(selector) else {
        return false;
    };
    all_start_tags(html).iter().any(|t| sel.matches(t))
}

/// Elements whose bodies are text, not markup
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

/// Every start tag in document order
///
/// Script and style bodies are skipped. A `<` that never closes is treated
/// as text.
pub fn all_start_tags(html: &str) -> Vec<StartTag> {
    let bytes = html.as_bytes();
    let mut lower: Option<String> = None;
    let mut tags = Vec::new();
    let mut pos = 0;
    while let Some(rel) = html[pos..].find('<') {
        let start = pos + rel;
        let name_start = start + 1;
        let name_len = bytes[name_start..]
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric())
            .count();
        if name_len == 0 {
            // Comment, doctype, closing tag or stray '<'
            if html[start..].starts_with("<!--") {
                pos = html[start..]
                    .find("-->")
                    .map(|e| start + e + 3)
                    .unwrap_or(html.len());
            } else {
                pos = name_start;
            }
            continue;
        }
        let Some(end) = find_tag_end(html, name_start + name_len) else {
            pos = name_start;
            continue;
        };
        let name = html[name_start..name_start + name_len].to_ascii_lowercase();
        let attrs = parse_attrs(&html[name_start + name_len..end - 1]);
        pos = if RAW_TEXT_ELEMENTS.contains(&name.as_str()) {
            let lower = lower.get_or_insert_with(|| html.to_ascii_lowercase());
            find_tag_token(lower, &format!("</{}", name), end).unwrap_or(html.len())
        } else {
            end
        };
        tags.push(StartTag { name, start, end, attrs });
    }
    tags
}

/// Start tags named `tag`
pub fn start_tags(html: &str, tag: &str) -> Vec<StartTag> {
    all_start_tags(html)
        .into_iter()
        .filter(|t| t.name.eq_ignore_ascii_case(tag))
        .collect()
}

/// Offset just past the `>` closing a start tag, honouring quoted values
fn find_tag_end(html: &str, from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, b) in html.as_bytes()[from..].iter().enumerate() {
        match (quote, *b) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, b'"') | (None, b'\'') => quote = Some(*b),
            (None, b'>') => return Some(from + i + 1),
            _ => {}
        }
    }
    None
}

fn parse_attrs(s: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let b = s.as_bytes();
    let mut i = 0;
    while i < b.len() {
        while i < b.len() && (b[i].is_ascii_whitespace() || b[i] == b'/') {
            i += 1;
        }
        let name_start = i;
        while i < b.len() && !b[i].is_ascii_whitespace() && b[i] != b'=' && b[i] != b'/' {
            i += 1;
        }
        if name_start == i {
            break;
        }
        let name = s[name_start..i].to_ascii_lowercase();
        while i < b.len() && b[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut value = String::new();
        if i < b.len() && b[i] == b'=' {
            i += 1;
            while i < b.len() && b[i].is_ascii_whitespace() {
                i += 1;
            }
            if i < b.len() && (b[i] == b'"' || b[i] == b'\'') {
                let q = b[i];
                let v_start = i + 1;
                let v_end = b[v_start..]
                    .iter()
                    .position(|c| *c == q)
                    .map(|p| v_start + p)
                    .unwrap_or(b.len());
                value = decode_entities(&s[v_start..v_end]);
                i = (v_end + 1).min(b.len());
            } else {
                let v_start = i;
                while i < b.len() && !b[i].is_ascii_whitespace() {
                    i += 1;
                }
                value = decode_entities(&s[v_start..i]);
            }
        }
        attrs.push((name, value));
    }
    attrs
}

/// Inner markup of the element opened by `open`, nesting-aware
///
/// An unclosed element extends to the end of the document.
pub fn inner_html<'a>(html: &'a str, open: &StartTag) -> &'a str {
    let lower = html.to_ascii_lowercase();
    let open_pat = format!("<{}", open.name);
    let close_pat = format!("</{}", open.name);
    let mut depth = 1usize;
    let mut pos = open.end;
    loop {
        let next_open = find_tag_token(&lower, &open_pat, pos);
        let Some(close) = find_tag_token(&lower, &close_pat, pos) else {
            return &html[open.end..];
        };
        match next_open {
            Some(o) if o < close => {
                depth += 1;
                pos = o + open_pat.len();
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return &html[open.end..close];
                }
                pos = close + close_pat.len();
            }
        }
    }
}

/// Position of `<name` / `</name` followed by a tag-name boundary
fn find_tag_token(lower: &str, pat: &str, from: usize) -> Option<usize> {
    let mut pos = from;
    while let Some(rel) = lower.get(pos..)?.find(pat) {
        let at = pos + rel;
        let after = lower.as_bytes().get(at + pat.len()).copied();
        if after.map(|c| !c.is_ascii_alphanumeric()).unwrap_or(true) {
            return Some(at);
        }
        pos = at + pat.len();
    }
    None
}

/// Inner markup of the first `<table id=...>`
pub fn find_table_by_id<'a>(html: &'a str, id: &str) -> Option<&'a str> {
    start_tags(html, "table")
        .into_iter()
        .find(|t| t.attr("id") == Some(id))
        .map(|t| inner_html(html, &t))
}

/// Rows of a table body as trimmed cell text (`<th>` and `<td>` alike)
pub fn table_rows(table_inner: &str) -> Vec<Vec<String>> {
    start_tags(table_inner, "tr")
        .iter()
        .map(|tr| {
            let row = row_inner(table_inner, tr);
            all_start_tags(row)
                .iter()
                .filter(|t| t.name == "td" || t.name == "th")
                .map(|cell| cell_text(&cell_inner(row, cell)))
                .collect()
        })
        .collect()
}

/// Rows end at `</tr>` or the next `<tr>`, whichever comes first
fn row_inner<'a>(html: &'a str, tr: &StartTag) -> &'a str {
    let lower = html.to_ascii_lowercase();
    let close = find_tag_token(&lower, "</tr", tr.end);
    let next = find_tag_token(&lower, "<tr", tr.end);
    let end = match (close, next) {
        (Some(c), Some(n)) => c.min(n),
        (Some(c), None) => c,
        (None, Some(n)) => n,
        (None, None) => html.len(),
    };
    &html[tr.end..end]
}

/// Cells end at their close tag or the next cell, whichever comes first
fn cell_inner(row: &str, cell: &StartTag) -> String {
    let lower = row.to_ascii_lowercase();
    let ends = ["</td", "</th", "<td", "<th"]
        .iter()
        .filter_map(|p| find_tag_token(&lower, p, cell.end))
        .min()
        .unwrap_or(row.len());
    row[cell.end..ends].to_string()
}

/// Strip tags, decode common entities and collapse whitespace
pub fn cell_text(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut in_tag = false;
    for c in markup.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    decode_entities(&out)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Every `<img src>` in document order
pub fn img_sources(html: &str) -> Vec<String> {
    start_tags(html, "img")
        .iter()
        .filter_map(|t| t.attr("src").map(str::to_string))
        .collect()
}
