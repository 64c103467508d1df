pub mod output;
pub mod pages;

/// Hostname Cloudflare serves a Pages project under.
///
/// ```
/// assert_eq!(flarelaunch::deploy::pages_host("demo"), "demo.pages.dev");
/// ```
#[must_use]
pub fn pages_host(project: &str) -> String {
    format!("{project}.pages.dev")
}
