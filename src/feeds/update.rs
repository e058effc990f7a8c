use regex::{Captures, Regex};
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use tracing_batteries::prelude::*;

use super::description::rebuild_description;
use super::xml::{find_attr, find_items, find_tag_text, insert_items, set_item_tag, strip_cdata};
use super::{feed_dirs, FeedError};
use crate::normalizer::FEED_FILE;

/// The file, alongside a feed, listing the upstream feed URLs it is built from.
pub const SOURCE_FILE: &str = "source.txt";

static USER_AGENT: &str = concat!("feedroute/", env!("CARGO_PKG_VERSION"));

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("a valid whitespace pattern"));

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("a valid number pattern"));

static ENCLOSURE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(<enclosure\b[^>]*url=")([^"]+)(")"#).expect("a valid enclosure pattern")
});

#[derive(Debug, Clone)]
pub struct UpdateOptions {
    /// The name of the file, within each feed directory, listing upstream feed URLs.
    pub source_file: String,

    /// Only take upstream episodes whose title contains this text (ignoring case).
    ///
    /// Filtered feeds are curated collections drawn from larger shows, so their
    /// episodes are also renumbered into a single season and routed through the
    /// feed's `<op3>` analytics prefix when it has one.
    pub title_filter: Option<String>,
}

impl Default for UpdateOptions {
    fn default() -> Self {
        Self {
            source_file: SOURCE_FILE.to_string(),
            title_filter: None,
        }
    }
}

/// Pulls new episodes from each feed's upstream sources into its `feed.xml`.
pub struct FeedUpdater {
    client: reqwest::Client,
    options: UpdateOptions,
}

impl FeedUpdater {
    pub fn new(options: UpdateOptions) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(20))
            .build()?;

        Ok(Self { client, options })
    }

    /// Updates every feed directory beneath `public_dir`, returning the number
    /// of episodes added across all of them.
    pub async fn update_all(&self, public_dir: &Path) -> Result<usize, FeedError> {
        let mut added = 0;
        for dir in feed_dirs(public_dir).await? {
            match self.update_dir(&dir).await {
                Ok(count) => added += count,
                Err(err) => {
                    error!({ exception.message = %err }, "Failed to update the feed in {}", dir.display())
                }
            }
        }

        Ok(added)
    }

    #[tracing::instrument(err, skip(self), fields(otel.kind = "internal"))]
    pub async fn update_dir(&self, dir: &Path) -> Result<usize, FeedError> {
        let source_path = dir.join(&self.options.source_file);
        let feed_path = dir.join(FEED_FILE);

        if !tokio::fs::try_exists(&source_path).await? || !tokio::fs::try_exists(&feed_path).await? {
            info!(
                "Skipping {}: it needs both {} and {}",
                dir.display(),
                self.options.source_file,
                FEED_FILE
            );
            return Ok(0);
        }

        let sources = tokio::fs::read_to_string(&source_path).await?;
        let sources: Vec<&str> = sources
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        if sources.is_empty() {
            info!("Skipping {}: {} is empty", dir.display(), self.options.source_file);
            return Ok(0);
        }

        let feed = tokio::fs::read_to_string(&feed_path).await?;
        let mut existing = existing_keys(&feed);
        let mut new_items = Vec::new();

        for url in sources {
            let upstream = match self.fetch(url).await {
                Ok(upstream) => upstream,
                Err(err) => {
                    warn!({ exception.message = %err }, "Failed to read the upstream feed {}", url);
                    continue;
                }
            };

            new_items.extend(self.new_items(&feed, &upstream, &mut existing));
        }

        if new_items.is_empty() {
            info!("{}: no new episodes", dir.display());
            return Ok(0);
        }

        tokio::fs::write(&feed_path, insert_items(&feed, &new_items)).await?;
        info!("{}: added {} new episodes", dir.display(), new_items.len());

        Ok(new_items.len())
    }

    async fn fetch(&self, url: &str) -> Result<String, FeedError> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }

    /// Prepares the items from `upstream` which are not yet in the feed,
    /// recording their keys in `existing` as it goes.
    fn new_items(&self, feed: &str, upstream: &str, existing: &mut HashSet<String>) -> Vec<String> {
        let mut items = Vec::new();

        for raw in find_items(upstream) {
            let title = strip_cdata(find_tag_text(raw, "title"));

            if let Some(filter) = &self.options.title_filter {
                if !title.to_lowercase().contains(&filter.to_lowercase()) {
                    continue;
                }
            }

            let key = item_key(raw);
            if existing.contains(&key) {
                continue;
            }

            let mut item = prepare_item(raw);
            if self.options.title_filter.is_some() {
                item = apply_op3_prefix(&item, find_tag_text(feed, "op3").trim());
                item = number_episode(&item, title);
            }

            debug!("Adding episode '{}'", title);
            items.push(item);
            existing.insert(key);
        }

        items
    }
}

fn normalize_key_part(text: &str) -> String {
    WHITESPACE_RE
        .replace_all(strip_cdata(text), " ")
        .trim()
        .to_lowercase()
}

/// Identifies an item by its `<guid>`, falling back to its `<link>` and
/// then to its title and publication date.
pub fn item_key(item: &str) -> String {
    let guid = normalize_key_part(find_tag_text(item, "guid"));
    if !guid.is_empty() {
        return format!("guid:{guid}");
    }

    let link = normalize_key_part(find_tag_text(item, "link"));
    if !link.is_empty() {
        return format!("link:{link}");
    }

    format!(
        "tp:{}|{}",
        normalize_key_part(find_tag_text(item, "title")),
        normalize_key_part(find_tag_text(item, "pubDate"))
    )
}

pub fn existing_keys(feed: &str) -> HashSet<String> {
    find_items(feed).into_iter().map(item_key).collect()
}

/// Rewrites an upstream item's description into the feed's HTML layout.
pub fn prepare_item(raw: &str) -> String {
    let image = match find_attr(raw, "itunes:image", "href") {
        "" => find_attr(raw, "media:thumbnail", "url"),
        href => href,
    };

    let description = rebuild_description(
        strip_cdata(find_tag_text(raw, "title")),
        strip_cdata(find_tag_text(raw, "link")),
        image,
        find_tag_text(raw, "description"),
    );

    set_item_tag(raw, "description", &description)
}

/// Prefixes the item's enclosure URL with the feed's analytics prefix.
fn apply_op3_prefix(item: &str, prefix: &str) -> String {
    if prefix.is_empty() {
        return item.to_string();
    }

    ENCLOSURE_URL_RE
        .replace(item, |caps: &Captures| {
            if caps[2].starts_with(prefix) {
                return caps[0].to_string();
            }

            format!("{}{}{}{}", &caps[1], prefix, &caps[2], &caps[3])
        })
        .into_owned()
}

/// Places the episode in season 1, numbered by the first number in its title.
fn number_episode(item: &str, title: &str) -> String {
    let episode = NUMBER_RE.find(title).map(|m| m.as_str()).unwrap_or("1");

    let item = set_item_tag(item, "itunes:season", "1");
    set_item_tag(&item, "itunes:episode", episode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test::test_log_init;
    use actix_web::{web, App, HttpResponse, HttpServer};

    static FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
<channel>
<title>Curated</title>
<op3>https://op3.dev/e/</op3>
<item>
  <title>Episode 1</title>
  <guid>ep-1</guid>
  <description>Already here</description>
</item>
</channel>
</rss>
"#;

    static UPSTREAM: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
<channel>
<title>Upstream</title>
<item>
  <title><![CDATA[Rust Special 3: Ownership]]></title>
  <guid> EP-3 </guid>
  <link>https://example.com/3</link>
  <itunes:image href="https://example.com/3.jpg"/>
  <enclosure url="https://cdn.example.com/3.mp3" length="1" type="audio/mpeg"/>
  <description><![CDATA[<p>Topics:</p><p>1. Borrowing<br>2. Lifetimes</p>]]></description>
</item>
<item>
  <title>Episode 2</title>
  <guid>ep-2</guid>
  <enclosure url="https://cdn.example.com/2.mp3" length="1" type="audio/mpeg"/>
  <description>Second https://example.com/2</description>
</item>
<item>
  <title>Episode 1</title>
  <guid>EP-1</guid>
  <description>Already here</description>
</item>
</channel>
</rss>
"#;

    async fn upstream_server() -> (String, actix_web::dev::ServerHandle) {
        let server = HttpServer::new(|| {
            App::new()
                .route(
                    "/upstream.xml",
                    web::get().to(|| async {
                        HttpResponse::Ok()
                            .content_type("application/rss+xml")
                            .body(UPSTREAM)
                    }),
                )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .expect("the upstream server should bind");

        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_rt::spawn(server);

        (format!("http://{addr}"), handle)
    }

    fn write_feed_dir(root: &Path, name: &str, sources: &str) -> std::path::PathBuf {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).expect("the feed directory should be created");
        std::fs::write(dir.join(FEED_FILE), FEED).expect("the feed should be written");
        std::fs::write(dir.join(SOURCE_FILE), sources).expect("the sources should be written");
        dir
    }

    #[test]
    fn item_keys() {
        assert_eq!(item_key("<item><guid> A  B </guid><link>x</link></item>"), "guid:a b");
        assert_eq!(item_key("<item><link><![CDATA[HTTPS://X]]></link></item>"), "link:https://x");
        assert_eq!(
            item_key("<item><title>T</title><pubDate>Mon</pubDate></item>"),
            "tp:t|mon"
        );
    }

    #[test]
    fn prepares_description() {
        let item = prepare_item(find_items(UPSTREAM)[0]);
        assert!(item.contains("<description><![CDATA[<h3>Rust Special 3: Ownership</h3>"));
        assert!(item.contains(r#"<a href="https://example.com/3"><img src="https://example.com/3.jpg" /></a>"#));
        assert!(item.contains(r#"<ol start="1"><li>Borrowing</li><li>Lifetimes</li></ol>"#));
    }

    #[test]
    fn numbers_filtered_episodes() {
        let item = number_episode(
            "<item><title>Special 7</title><itunes:season>4</itunes:season></item>",
            "Special 7",
        );
        assert_eq!(
            item,
            "<item><title>Special 7</title><itunes:season>1</itunes:season><itunes:episode>7</itunes:episode>\n</item>"
        );

        let item = number_episode("<item></item>", "No number");
        assert!(item.contains("<itunes:episode>1</itunes:episode>"));
    }

    #[test]
    fn prefixes_enclosures() {
        let item = r#"<item><enclosure url="https://cdn.example.com/1.mp3" type="audio/mpeg"/></item>"#;
        assert_eq!(
            apply_op3_prefix(item, "https://op3.dev/e/"),
            r#"<item><enclosure url="https://op3.dev/e/https://cdn.example.com/1.mp3" type="audio/mpeg"/></item>"#
        );
        assert_eq!(apply_op3_prefix(item, ""), item);

        let prefixed = apply_op3_prefix(item, "https://op3.dev/e/");
        assert_eq!(apply_op3_prefix(&prefixed, "https://op3.dev/e/"), prefixed);
    }

    #[actix_rt::test]
    async fn update_all_adds_new_episodes_first() {
        test_log_init();

        let (base, server) = upstream_server().await;
        let public = tempfile::tempdir().expect("a temporary public directory");
        let dir = write_feed_dir(
            public.path(),
            "curated",
            &format!("{base}/upstream.xml\n\n{base}/missing.xml\n"),
        );

        let updater = FeedUpdater::new(UpdateOptions::default()).expect("a feed updater");
        let added = updater.update_all(public.path()).await.expect("the update should succeed");
        assert_eq!(added, 2, "episodes 3 and 2 are new, episode 1 already exists");

        let feed = std::fs::read_to_string(dir.join(FEED_FILE)).expect("the updated feed");
        let items = find_items(&feed);
        assert_eq!(items.len(), 3);
        assert_eq!(item_key(items[0]), "guid:ep-3");
        assert_eq!(item_key(items[1]), "guid:ep-2");
        assert_eq!(item_key(items[2]), "guid:ep-1");
        assert!(items[1].contains(r#"<a href="https://example.com/2">https://example.com/2</a>"#));
        assert!(!feed.contains("<itunes:season>"), "unfiltered feeds keep their numbering");

        let added = updater.update_all(public.path()).await.expect("the second update should succeed");
        assert_eq!(added, 0, "a second run should find nothing new");

        server.stop(true).await;
    }

    #[actix_rt::test]
    async fn update_dir_with_title_filter() {
        test_log_init();

        let (base, server) = upstream_server().await;
        let public = tempfile::tempdir().expect("a temporary public directory");
        let dir = public.path().join("specials");
        std::fs::create_dir_all(&dir).expect("the feed directory should be created");
        std::fs::write(dir.join(FEED_FILE), FEED).expect("the feed should be written");
        std::fs::write(dir.join("specials.txt"), format!("{base}/upstream.xml")).expect("the sources should be written");

        let updater = FeedUpdater::new(UpdateOptions {
            source_file: "specials.txt".to_string(),
            title_filter: Some("rust SPECIAL".to_string()),
        })
        .expect("a feed updater");

        let added = updater.update_dir(&dir).await.expect("the update should succeed");
        assert_eq!(added, 1);

        let feed = std::fs::read_to_string(dir.join(FEED_FILE)).expect("the updated feed");
        let items = find_items(&feed);
        assert_eq!(items.len(), 2);
        assert!(items[0].contains("<itunes:season>1</itunes:season>"));
        assert!(items[0].contains("<itunes:episode>3</itunes:episode>"));
        assert!(items[0].contains(r#"url="https://op3.dev/e/https://cdn.example.com/3.mp3""#));

        server.stop(true).await;
    }

    #[actix_rt::test]
    async fn update_dir_skips_incomplete_directories() {
        test_log_init();

        let public = tempfile::tempdir().expect("a temporary public directory");
        let dir = public.path().join("empty");
        std::fs::create_dir_all(&dir).expect("the feed directory should be created");
        std::fs::write(dir.join(FEED_FILE), FEED).expect("the feed should be written");

        let updater = FeedUpdater::new(UpdateOptions::default()).expect("a feed updater");
        assert_eq!(updater.update_dir(&dir).await.expect("a skipped update"), 0);

        std::fs::write(dir.join(SOURCE_FILE), "\n  \n").expect("the sources should be written");
        assert_eq!(updater.update_dir(&dir).await.expect("a skipped update"), 0);

        assert_eq!(std::fs::read_to_string(dir.join(FEED_FILE)).expect("the feed"), FEED);
    }
}
