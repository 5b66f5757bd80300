const CDN_KEYWORDS: &[&str] = &[
    "cloudflare",
    "cloudfront",
    "akamai",
    "google",
    "google frontend",
    "google-frontend",
    "googlefrontend",
    "fastly",
    "openresty",
    "tengine",
    "varnish",
];

/// Whether a server banner or certificate issuer names a known CDN/edge stack.
pub fn is_cdn(banner: &str) -> bool {
    let banner = banner.to_lowercase();
    CDN_KEYWORDS.iter().any(|keyword| banner.contains(keyword))
}
