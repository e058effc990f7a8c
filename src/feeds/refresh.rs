//! Keeps a feed's channel metadata in step with its template.
//!
//! Each feed directory may carry a `feed0.xml` alongside its `feed.xml`. The
//! template is the hand-edited source of truth for everything about the show
//! itself (title, artwork, categories, stylesheet); the feed holds the
//! episodes. Refreshing copies the former into the latter without touching a
//! single `<item>`.

use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::reader::Reader;
use quick_xml::writer::Writer;
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use tracing_batteries::prelude::*;

use super::{feed_dirs, FeedError};
use crate::normalizer::FEED_FILE;

/// The channel template kept alongside each feed.
pub const TEMPLATE_FILE: &str = "feed0.xml";

const STYLESHEET_TARGET: &[u8] = b"xml-stylesheet";

/// A complete element, as the sequence of events which make it up.
struct Element {
    name: Vec<u8>,
    events: Vec<Event<'static>>,
}

/// Everything in a template which is copied into the feed.
#[derive(Default)]
struct Template {
    stylesheets: Vec<Event<'static>>,
    rss: Option<BytesStart<'static>>,
    channel: Vec<Element>,
}

/// Refreshes every feed directory beneath `public_dir` which has a template,
/// returning the number of feeds which were rewritten.
pub async fn refresh_all(public_dir: &Path) -> Result<usize, FeedError> {
    let mut refreshed = 0;
    for dir in feed_dirs(public_dir).await? {
        match refresh_dir(&dir).await {
            Ok(true) => refreshed += 1,
            Ok(false) => {}
            Err(err) => {
                error!({ exception.message = %err }, "Failed to refresh the feed in {}", dir.display())
            }
        }
    }

    Ok(refreshed)
}

#[tracing::instrument(err, fields(otel.kind = "internal"))]
pub async fn refresh_dir(dir: &Path) -> Result<bool, FeedError> {
    let template_path = dir.join(TEMPLATE_FILE);
    let feed_path = dir.join(FEED_FILE);

    if !tokio::fs::try_exists(&template_path).await? || !tokio::fs::try_exists(&feed_path).await? {
        info!(
            "Skipping {}: it needs both {} and {}",
            dir.display(),
            TEMPLATE_FILE,
            FEED_FILE
        );
        return Ok(false);
    }

    let template = tokio::fs::read_to_string(&template_path).await?;
    let feed = tokio::fs::read_to_string(&feed_path).await?;

    tokio::fs::write(&feed_path, refresh_feed(&template, &feed)?).await?;
    info!("Refreshed {} from {}", feed_path.display(), TEMPLATE_FILE);

    Ok(true)
}

/// Applies `template`'s channel metadata to `feed`:
///
/// - the feed's `xml-stylesheet` instructions are replaced by the template's,
/// - attributes on the template's `<rss>` are added to (or replace those on)
///   the feed's,
/// - each non-item child of the template's `<channel>` replaces the feed's
///   element of the same name (matched in order of appearance, keeping any
///   attributes only the feed has), or is appended to the channel when the
///   feed has no such element.
///
/// Items, and anything else the template doesn't mention, are left as-is.
pub fn refresh_feed(template: &str, feed: &str) -> Result<String, FeedError> {
    let template = read_template(template)?;
    let mut pending: HashMap<&[u8], Vec<&Element>> = HashMap::new();
    for element in &template.channel {
        pending.entry(element.name.as_slice()).or_default().push(element);
    }
    for elements in pending.values_mut() {
        elements.reverse();
    }

    let mut reader = Reader::from_str(feed);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::new());

    let mut depth = 0usize;
    let mut in_channel = false;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::PI(pi) if pi.target() == STYLESHEET_TARGET => {}
            Event::Text(text) if depth == 0 && text.iter().all(u8::is_ascii_whitespace) => {}
            Event::Decl(decl) => {
                writer.write_event(Event::Decl(decl))?;
                writer.write_event(Event::Text(BytesText::new("\n")))?;
            }
            Event::Start(start) if depth == 0 && start.name().as_ref() == b"rss" => {
                for stylesheet in &template.stylesheets {
                    writer.write_event(stylesheet.clone())?;
                    writer.write_event(Event::Text(BytesText::new("\n")))?;
                }

                let start = match &template.rss {
                    Some(rss) => merge_attributes(&start, rss)?,
                    None => start.into_owned(),
                };
                writer.write_event(Event::Start(start))?;
                depth += 1;
            }
            Event::Start(start) if depth == 1 && start.name().as_ref() == b"channel" => {
                writer.write_event(Event::Start(start))?;
                in_channel = true;
                depth += 1;
            }
            Event::Start(start) if in_channel && depth == 2 && start.name().as_ref() != b"item" => {
                let start = start.into_owned();
                let mut events = read_element(&mut reader, &start)?;
                events.insert(0, Event::Start(start.clone()));
                write_refreshed(&mut writer, &mut pending, &start, events)?;
            }
            Event::Empty(start) if in_channel && depth == 2 && start.name().as_ref() != b"item" => {
                let start = start.into_owned();
                let events = vec![Event::Empty(start.clone())];
                write_refreshed(&mut writer, &mut pending, &start, events)?;
            }
            Event::End(end) if in_channel && depth == 2 => {
                for element in template.channel.iter() {
                    let unused = pending
                        .get(element.name.as_slice())
                        .is_some_and(|remaining| remaining.iter().any(|e| std::ptr::eq(*e, element)));

                    if unused {
                        for event in &element.events {
                            writer.write_event(event.clone())?;
                        }
                        writer.write_event(Event::Text(BytesText::new("\n")))?;
                    }
                }

                writer.write_event(Event::End(end))?;
                in_channel = false;
                depth -= 1;
            }
            Event::Start(start) => {
                writer.write_event(Event::Start(start))?;
                depth += 1;
            }
            Event::End(end) => {
                writer.write_event(Event::End(end))?;
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    writer.write_event(Event::Text(BytesText::new("\n")))?;
                }
            }
            event => writer.write_event(event)?,
        }
    }

    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

/// Writes a channel element from the feed, swapping in the template's
/// version of it when there is one left to apply.
fn write_refreshed(
    writer: &mut Writer<Vec<u8>>,
    pending: &mut HashMap<&[u8], Vec<&Element>>,
    start: &BytesStart<'static>,
    original: Vec<Event<'static>>,
) -> Result<(), FeedError> {
    let replacement = pending
        .get_mut(start.name().as_ref())
        .and_then(|remaining| remaining.pop());

    let events = match replacement {
        Some(element) => {
            let mut events = element.events.clone();
            match events.first_mut() {
                Some(Event::Start(tpl)) => *tpl = merge_attributes(start, tpl)?,
                Some(Event::Empty(tpl)) => *tpl = merge_attributes(start, tpl)?,
                _ => {}
            }
            events
        }
        None => original,
    };

    for event in events {
        writer.write_event(event)?;
    }

    Ok(())
}

fn read_template(xml: &str) -> Result<Template, FeedError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut template = Template::default();
    let mut depth = 0usize;
    let mut in_channel = false;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::PI(pi) if pi.target() == STYLESHEET_TARGET => {
                template.stylesheets.push(Event::PI(pi.into_owned()));
            }
            Event::Start(start) if depth == 0 && start.name().as_ref() == b"rss" => {
                template.rss = Some(start.into_owned());
                depth += 1;
            }
            Event::Start(start) if depth == 1 && start.name().as_ref() == b"channel" => {
                in_channel = true;
                depth += 1;
            }
            Event::Start(start) if in_channel && depth == 2 => {
                let start = start.into_owned();
                let mut events = read_element(&mut reader, &start)?;
                if start.name().as_ref() != b"item" {
                    events.insert(0, Event::Start(start.clone()));
                    template.channel.push(Element {
                        name: start.name().as_ref().to_vec(),
                        events,
                    });
                }
            }
            Event::Empty(start) if in_channel && depth == 2 && start.name().as_ref() != b"item" => {
                let start = start.into_owned();
                template.channel.push(Element {
                    name: start.name().as_ref().to_vec(),
                    events: vec![Event::Empty(start)],
                });
            }
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if in_channel && depth == 2 {
                    in_channel = false;
                }
                depth = depth.saturating_sub(1);
            }
            _ => {}
        }
    }

    Ok(template)
}

/// Reads the remainder of an element whose start tag has just been read,
/// returning its content and closing tag.
fn read_element(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart<'_>,
) -> Result<Vec<Event<'static>>, FeedError> {
    let mut events = Vec::new();
    let mut depth = 0usize;

    loop {
        let event = reader.read_event()?.into_owned();
        match &event {
            Event::Start(_) => depth += 1,
            Event::End(end) if depth == 0 && end.name() == start.name() => {
                events.push(event);
                return Ok(events);
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => return Ok(events),
            _ => {}
        }

        events.push(event);
    }
}

/// `original`'s start tag with `overrides`' name, and its attributes
/// added to or replacing `original`'s.
fn merge_attributes(
    original: &BytesStart<'_>,
    overrides: &BytesStart<'_>,
) -> Result<BytesStart<'static>, FeedError> {
    let mut attributes: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
    for attr in original.attributes().chain(overrides.attributes()) {
        let attr = attr?;
        let key = attr.key.as_ref().to_vec();
        let value = attr.value.into_owned();

        match attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => attributes.push((key, value)),
        }
    }

    let name = String::from_utf8_lossy(overrides.name().as_ref()).into_owned();
    let mut merged = BytesStart::new(name);
    for (key, value) in &attributes {
        merged.push_attribute(Attribute {
            key: QName(key.as_slice()),
            value: Cow::Borrowed(value.as_slice()),
        });
    }

    Ok(merged.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test::test_log_init;
    use crate::feeds::xml::find_items;

    static TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<?xml-stylesheet type="text/xsl" href="/feed.xsl"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd" xmlns:podcast="https://podcastindex.org/namespace/1.0">
<channel>
<title>New Title &amp; More</title>
<itunes:image href="https://example.com/new.jpg"/>
<image><url>https://example.com/new.jpg</url></image>
<itunes:category text="Technology"/>
<itunes:category text="Education"/>
<podcast:locked>no</podcast:locked>
<item><title>Ignored</title></item>
</channel>
</rss>
"#;

    static FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<?xml-stylesheet type="text/xsl" href="/old.xsl"?>
<rss version="1.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
<channel>
<title>Old Title</title>
<itunes:image href="https://example.com/old.jpg" extra="kept"/>
<image><url>https://example.com/old.jpg</url><title>Old</title></image>
<itunes:category text="News"/>
<item><title>Episode 2</title><guid>2</guid></item>
<item><title>Episode 1</title><guid>1</guid></item>
</channel>
</rss>
"#;

    #[test]
    fn replaces_stylesheet() {
        let refreshed = refresh_feed(TEMPLATE, FEED).expect("a refreshed feed");
        assert!(refreshed.contains(r#"<?xml-stylesheet type="text/xsl" href="/feed.xsl"?>"#));
        assert!(!refreshed.contains("/old.xsl"));
        assert!(refreshed.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
    }

    #[test]
    fn merges_rss_attributes() {
        let refreshed = refresh_feed(TEMPLATE, FEED).expect("a refreshed feed");
        assert!(refreshed.contains(r#"<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd" xmlns:podcast="https://podcastindex.org/namespace/1.0">"#));
    }

    #[test]
    fn replaces_channel_metadata() {
        let refreshed = refresh_feed(TEMPLATE, FEED).expect("a refreshed feed");

        assert!(refreshed.contains("<title>New Title &amp; More</title>"));
        assert!(!refreshed.contains("Old Title"));
        assert!(refreshed.contains(r#"<itunes:image href="https://example.com/new.jpg" extra="kept"/>"#));
        assert!(refreshed.contains("<image><url>https://example.com/new.jpg</url></image>"));
        assert!(refreshed.contains(r#"<itunes:category text="Technology"/>"#));
        assert!(!refreshed.contains("News"));
    }

    #[test]
    fn appends_missing_metadata() {
        let refreshed = refresh_feed(TEMPLATE, FEED).expect("a refreshed feed");

        let education = refreshed
            .find(r#"<itunes:category text="Education"/>"#)
            .expect("the second category should be appended");
        let locked = refreshed
            .find("<podcast:locked>no</podcast:locked>")
            .expect("the locked tag should be appended");
        let last_item = refreshed.rfind("</item>").expect("the items");
        let channel_end = refreshed.find("</channel>").expect("the channel end");

        assert!(last_item < education && education < locked && locked < channel_end);
    }

    #[test]
    fn keeps_items() {
        let refreshed = refresh_feed(TEMPLATE, FEED).expect("a refreshed feed");
        assert_eq!(
            find_items(&refreshed),
            vec![
                "<item><title>Episode 2</title><guid>2</guid></item>",
                "<item><title>Episode 1</title><guid>1</guid></item>"
            ]
        );
        assert!(!refreshed.contains("Ignored"));
    }

    #[test]
    fn refreshing_twice_is_stable() {
        let once = refresh_feed(TEMPLATE, FEED).expect("a refreshed feed");
        let twice = refresh_feed(TEMPLATE, &once).expect("a refreshed feed");
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_malformed_feeds() {
        assert!(refresh_feed(TEMPLATE, "<rss><channel></rss>").is_err());
    }

    #[actix_rt::test]
    async fn refresh_all_rewrites_feeds_with_templates() {
        test_log_init();

        let public = tempfile::tempdir().expect("a temporary public directory");

        let show = public.path().join("show");
        std::fs::create_dir_all(&show).expect("the show directory should be created");
        std::fs::write(show.join(TEMPLATE_FILE), TEMPLATE).expect("the template should be written");
        std::fs::write(show.join(FEED_FILE), FEED).expect("the feed should be written");

        let untemplated = public.path().join("untemplated");
        std::fs::create_dir_all(&untemplated).expect("the directory should be created");
        std::fs::write(untemplated.join(FEED_FILE), FEED).expect("the feed should be written");

        let refreshed = refresh_all(public.path()).await.expect("the refresh should succeed");
        assert_eq!(refreshed, 1);

        let feed = std::fs::read_to_string(show.join(FEED_FILE)).expect("the refreshed feed");
        assert!(feed.contains("New Title"));

        let feed = std::fs::read_to_string(untemplated.join(FEED_FILE)).expect("the untouched feed");
        assert_eq!(feed, FEED);
    }
}
