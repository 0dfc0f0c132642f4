//! Coarse browser and OS detection from a `User-Agent` header.
//!
//! Produces labels like `"Chrome 126.0.0.0"` and `"Windows 10"`. Unknown
//! agents yield `None`; the raw string is stored alongside anyway.

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedAgent {
    pub browser: Option<String>,
    pub os: Option<String>,
}

pub fn parse(ua: &str) -> ParsedAgent {
    ParsedAgent {
        browser: detect_browser(ua),
        os: detect_os(ua),
    }
}

/// Order matters: Edge and Opera also advertise Chrome, Chrome advertises Safari.
const BROWSER_TOKENS: &[(&str, &str)] = &[
    ("Edg/", "Edge"),
    ("OPR/", "Opera"),
    ("SamsungBrowser/", "Samsung Internet"),
    ("Firefox/", "Firefox"),
    ("FxiOS/", "Firefox"),
    ("CriOS/", "Chrome"),
    ("Chrome/", "Chrome"),
];

fn detect_browser(ua: &str) -> Option<String> {
    for (token, name) in BROWSER_TOKENS {
        if let Some(version) = version_after(ua, token) {
            return Some(label(name, version));
        }
    }

    if ua.contains("Safari/") {
        return Some(label("Safari", version_after(ua, "Version/").unwrap_or("")));
    }

    if ua.contains("Trident/") || ua.contains("MSIE ") {
        return Some("IE".to_string());
    }

    None
}

fn detect_os(ua: &str) -> Option<String> {
    if let Some(version) = version_after(ua, "Windows NT ") {
        let name = match version {
            "10.0" => "10",
            "6.3" => "8.1",
            "6.2" => "8",
            "6.1" => "7",
            other => other,
        };
        return Some(format!("Windows {name}"));
    }

    if ua.contains("iPhone") || ua.contains("iPad") {
        let version = version_after(ua, "OS ").map(|v| v.replace('_', "."));
        return Some(label("iOS", version.as_deref().unwrap_or("")));
    }

    if let Some(version) = version_after(ua, "Android ") {
        return Some(label("Android", version));
    }
    if ua.contains("Android") {
        return Some("Android".to_string());
    }

    if let Some(version) = version_after(ua, "Mac OS X ") {
        return Some(label("macOS", &version.replace('_', ".")));
    }

    if ua.contains("CrOS") {
        return Some("Chrome OS".to_string());
    }

    if ua.contains("Linux") {
        return Some("Linux".to_string());
    }

    None
}

/// The run of version characters right after `token`, if `token` occurs.
fn version_after<'a>(ua: &'a str, token: &str) -> Option<&'a str> {
    let start = ua.find(token)? + token.len();
    let rest = &ua[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '.' || c == '_'))
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

fn label(name: &str, version: &str) -> String {
    if version.is_empty() {
        name.to_string()
    } else {
        format!("{name} {version}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chrome_on_windows() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
        let parsed = parse(ua);
        assert_eq!(parsed.browser.as_deref(), Some("Chrome 126.0.0.0"));
        assert_eq!(parsed.os.as_deref(), Some("Windows 10"));
    }

    #[test]
    fn edge_is_not_reported_as_chrome() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36 Edg/126.0.2592.68";
        assert_eq!(parse(ua).browser.as_deref(), Some("Edge 126.0.2592.68"));
    }

    #[test]
    fn safari_on_iphone() {
        let ua = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_5 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Mobile/15E148 Safari/604.1";
        let parsed = parse(ua);
        assert_eq!(parsed.browser.as_deref(), Some("Safari 17.5"));
        assert_eq!(parsed.os.as_deref(), Some("iOS 17.5"));
    }

    #[test]
    fn firefox_on_linux() {
        let ua = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
        let parsed = parse(ua);
        assert_eq!(parsed.browser.as_deref(), Some("Firefox 128.0"));
        assert_eq!(parsed.os.as_deref(), Some("Linux"));
    }

    #[test]
    fn chrome_on_android_and_mac() {
        let android = "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.6478.71 Mobile Safari/537.36";
        assert_eq!(parse(android).os.as_deref(), Some("Android 14"));

        let mac = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
        assert_eq!(parse(mac).os.as_deref(), Some("macOS 10.15.7"));
    }

    #[test]
    fn unknown_agent() {
        assert_eq!(parse("curl/8.5.0"), ParsedAgent::default());
    }
}
