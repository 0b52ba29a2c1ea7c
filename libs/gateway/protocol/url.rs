//! Gateway connection URL

/// Build `base?v=<version>&encoding=json[&compress=<mode>]`
///
/// Any query string already present on `base` is dropped so a resume URL
/// handed out by the server gets the same parameters as the bootstrap URL.
pub fn gateway_url(base: &str, version: u8, compress: Option<&str>) -> String {
    let base = base.split('?').next().unwrap_or(base).trim_end_matches('/');
    let mut url = format!("{base}/?v={version}&encoding=json");
    if let Some(mode) = compress.filter(|m| !m.is_empty()) {
        url.push_str("&compress=");
        url.push_str(mode);
    }
    url
}
