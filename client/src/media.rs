use url::{form_urlencoded, Url};

/// Hosts whose media identity needs special query handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hostname {
    Youtube,
    Netflix,
    Amazon,
    Bilibili,
    Nicovideo,
    Crunchyroll,
}

impl Hostname {
    fn parse(host: &str) -> Option<Self> {
        match host {
            "www.youtube.com" => Some(Self::Youtube),
            "www.netflix.com" => Some(Self::Netflix),
            "www.amazon.com" => Some(Self::Amazon),
            "www.bilibili.com" => Some(Self::Bilibili),
            "www.nicovideo.jp" => Some(Self::Nicovideo),
            "www.crunchyroll.com" => Some(Self::Crunchyroll),
            _ => None,
        }
    }
}

pub fn is_valid_http_url(input: &str) -> bool {
    Url::parse(input)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Canonical media reference: `scheme://host[:port]/path[?query]`.
///
/// `keep_search` retains the full query string for hosts without a known
/// rule; it is set for the reference shared at room creation and left
/// unset for fingerprinting.
pub fn build_url(url: &Url, keep_search: bool) -> String {
    let host = url.host_str().unwrap_or_default();
    let query = match Hostname::parse(host) {
        Some(Hostname::Youtube) => filter_query(url, &["v", "list"]),
        Some(_) => String::new(),
        None if keep_search => match url.query() {
            Some(q) if !q.is_empty() => format!("?{q}"),
            _ => String::new(),
        },
        None => String::new(),
    };

    let authority = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    format!("{}://{}{}{}", url.scheme(), authority, url.path(), query)
}

fn filter_query(url: &Url, keep: &[&str]) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut kept = 0;
    for name in keep {
        let value = url
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned());
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            serializer.append_pair(name, &value);
            kept += 1;
        }
    }
    if kept == 0 {
        String::new()
    } else {
        format!("?{}", serializer.finish())
    }
}
