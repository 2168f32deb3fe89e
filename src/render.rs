//! Content rendering dispatch.

use crate::types::ContentType;
use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};

/// Render raw message content for display.
///
/// Pure and total over [`ContentType`].
pub fn render(content_type: ContentType, content: &str) -> String {
    match content_type {
        ContentType::Plain => content.to_string(),
        ContentType::Markdown => render_markdown(content),
    }
}

/// CommonMark to HTML. Raw HTML in the source is emitted as escaped text and
/// link or image targets with a scheme other than http, https or mailto are
/// blanked.
fn render_markdown(content: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TABLES);

    let parser = Parser::new_ext(content, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) if !is_safe_url(&dest_url) => Event::Start(Tag::Link {
            link_type,
            dest_url: CowStr::Borrowed(""),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) if !is_safe_url(&dest_url) => Event::Start(Tag::Image {
            link_type,
            dest_url: CowStr::Borrowed(""),
            title,
            id,
        }),
        other => other,
    });

    let mut out = String::with_capacity(content.len() + content.len() / 2);
    html::push_html(&mut out, parser);
    out
}

/// Relative URLs and the http, https and mailto schemes.
fn is_safe_url(url: &str) -> bool {
    // Browsers ignore whitespace and control characters inside a scheme
    let cleaned: String = url
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && !c.is_control())
        .collect();

    match cleaned.find([':', '/', '?', '#']) {
        Some(pos) if cleaned[pos..].starts_with(':') => {
            let scheme = cleaned[..pos].to_ascii_lowercase();
            matches!(scheme.as_str(), "http" | "https" | "mailto")
        }
        _ => true,
    }
}
