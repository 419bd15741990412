//! Built-in spiders
//!
//! Three spiders ship with the engine: a general-purpose `default` spider,
//! an `ip` spider for ip.me-style pages, and a `hackernews` front-page
//! spider. All extraction uses CSS selectors over the fetched document.

use crate::spider::{FetchSpec, HttpMethod, Spider, SpiderError, SpiderRegistry, SpiderResult};
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Registers all built-in spiders
pub fn register_builtins(registry: &mut SpiderRegistry) {
    registry.register(Arc::new(DefaultSpider));
    registry.register(Arc::new(IpSpider));
    registry.register(Arc::new(HackerNewsSpider));
}

fn selector(css: &str) -> SpiderResult<Selector> {
    Selector::parse(css).map_err(|e| SpiderError::Selector(e.to_string()))
}

fn first_text(root: &Html, sel: &Selector) -> Option<String> {
    root.select(sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// General-purpose spider extracting basic page information
///
/// Works against any HTML page: title, meta description, link count, and
/// raw content length.
pub struct DefaultSpider;

impl Spider for DefaultSpider {
    fn name(&self) -> &str {
        "default"
    }

    fn parse(
        &self,
        raw_content: &str,
        url: &str,
        _headers: &HashMap<String, String>,
    ) -> SpiderResult<Value> {
        let document = Html::parse_document(raw_content);

        let title = first_text(&document, &selector("title")?);
        let description = document
            .select(&selector(r#"meta[name="description"]"#)?)
            .next()
            .and_then(|el| el.value().attr("content"))
            .map(str::to_string);
        let link_count = document.select(&selector("a[href]")?).count();
        let heading_count = document.select(&selector("h1")?).count();

        Ok(json!({
            "url": url,
            "title": title,
            "description": description,
            "link_count": link_count,
            "heading_count": heading_count,
            "content_length": raw_content.len(),
        }))
    }
}

/// Spider for ip.me-style IP lookup pages
///
/// Extracts the reported IP address from the ip input field and the
/// geolocation table (city, country, coordinates, ISP details).
pub struct IpSpider;

impl IpSpider {
    /// Collects `th` label -> `td code` value pairs from the detail table
    fn table_values(document: &Html) -> SpiderResult<HashMap<String, String>> {
        let row_sel = selector("tr")?;
        let th_sel = selector("th")?;
        let code_sel = selector("td code")?;

        let mut values = HashMap::new();
        for row in document.select(&row_sel) {
            let label = match row.select(&th_sel).next() {
                Some(th) => th.text().collect::<String>().trim().to_string(),
                None => continue,
            };
            if let Some(code) = row.select(&code_sel).next() {
                let value = code.text().collect::<String>().trim().to_string();
                if !value.is_empty() {
                    values.insert(label, value);
                }
            }
        }
        Ok(values)
    }
}

impl Spider for IpSpider {
    fn name(&self) -> &str {
        "ip"
    }

    fn fetch_spec(&self) -> FetchSpec {
        FetchSpec {
            start_url: Some("https://ip.me/".to_string()),
            method: HttpMethod::Get,
        }
    }

    fn parse(
        &self,
        raw_content: &str,
        _url: &str,
        _headers: &HashMap<String, String>,
    ) -> SpiderResult<Value> {
        let document = Html::parse_document(raw_content);
        let mut data = serde_json::Map::new();

        if let Some(ip) = document
            .select(&selector(r#"input[name="ip"]"#)?)
            .next()
            .and_then(|el| el.value().attr("value"))
        {
            data.insert("ip_address".to_string(), json!(ip));
        }

        let table = Self::table_values(&document)?;
        let mut location = serde_json::Map::new();
        let text_fields = [
            ("City:", "city"),
            ("Country:", "country"),
            ("Country Code:", "country_code"),
            ("Postal Code:", "postal_code"),
            ("Organization:", "organization"),
            ("ASN:", "asn"),
            ("ISP Name:", "isp_name"),
        ];
        for (label, key) in text_fields {
            if let Some(value) = table.get(label) {
                location.insert(key.to_string(), json!(value));
            }
        }
        for (label, key) in [("Latitude:", "latitude"), ("Longitude:", "longitude")] {
            if let Some(value) = table.get(label).and_then(|v| v.parse::<f64>().ok()) {
                location.insert(key.to_string(), json!(value));
            }
        }
        if !location.is_empty() {
            data.insert("location".to_string(), Value::Object(location));
        }

        if let Some(title) = first_text(&document, &selector("title")?) {
            data.insert("page_title".to_string(), json!(title));
        }

        Ok(Value::Object(data))
    }
}

/// Spider for the Hacker News front page
///
/// Extracts the story list (rank, title, link, site, score, author,
/// comment count). Story rows carry the `athing` class; the metadata for a
/// story lives in the row immediately following it.
pub struct HackerNewsSpider;

impl HackerNewsSpider {
    fn parse_story(story: &ElementRef<'_>, meta: Option<&ElementRef<'_>>) -> SpiderResult<Value> {
        let mut item = serde_json::Map::new();

        if let Some(id) = story.value().attr("id") {
            item.insert("id".to_string(), json!(id));
        }

        if let Some(rank) = story
            .select(&selector("span.rank")?)
            .next()
            .and_then(|el| {
                el.text()
                    .collect::<String>()
                    .trim()
                    .trim_end_matches('.')
                    .parse::<u32>()
                    .ok()
            })
        {
            item.insert("rank".to_string(), json!(rank));
        }

        if let Some(link) = story.select(&selector("span.titleline > a")?).next() {
            item.insert(
                "title".to_string(),
                json!(link.text().collect::<String>().trim()),
            );
            if let Some(href) = link.value().attr("href") {
                item.insert("url".to_string(), json!(href));
            }
        }

        if let Some(site) = story
            .select(&selector("span.sitestr")?)
            .next()
            .map(|el| el.text().collect::<String>())
        {
            item.insert("site".to_string(), json!(site.trim()));
        }

        if let Some(meta) = meta {
            if let Some(points) = meta.select(&selector("span.score")?).next().and_then(|el| {
                el.text()
                    .collect::<String>()
                    .split_whitespace()
                    .next()
                    .and_then(|n| n.parse::<u32>().ok())
            }) {
                item.insert("points".to_string(), json!(points));
            }

            if let Some(author) = meta
                .select(&selector("a.hnuser")?)
                .next()
                .map(|el| el.text().collect::<String>())
            {
                item.insert("author".to_string(), json!(author.trim()));
            }

            for link in meta.select(&selector("a")?) {
                let text = link.text().collect::<String>().replace('\u{a0}', " ");
                if text.contains("comment") {
                    if let Some(count) = text
                        .split_whitespace()
                        .next()
                        .and_then(|n| n.parse::<u32>().ok())
                    {
                        item.insert("comments".to_string(), json!(count));
                    }
                    break;
                }
            }
        }

        Ok(Value::Object(item))
    }
}

impl Spider for HackerNewsSpider {
    fn name(&self) -> &str {
        "hackernews"
    }

    fn fetch_spec(&self) -> FetchSpec {
        FetchSpec {
            start_url: Some("https://news.ycombinator.com/".to_string()),
            method: HttpMethod::Get,
        }
    }

    fn parse(
        &self,
        raw_content: &str,
        _url: &str,
        _headers: &HashMap<String, String>,
    ) -> SpiderResult<Value> {
        let document = Html::parse_document(raw_content);
        let rows: Vec<ElementRef<'_>> = document.select(&selector("tr")?).collect();

        let mut items = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            if !row.value().classes().any(|c| c == "athing") {
                continue;
            }
            items.push(Self::parse_story(row, rows.get(i + 1))?);
        }

        let total = items.len();
        Ok(json!({
            "news_items": items,
            "total_items": total,
        }))
    }
}
