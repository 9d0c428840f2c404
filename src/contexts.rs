use serde::Serialize;

#[derive(Serialize)]
pub struct BannerContext<'a> {
    /// First line of the file, e.g. `PDP18B simulators`. Empty for none.
    pub title: &'a str,
}

#[derive(Serialize)]
pub struct ManifestContext<'a> {
    pub banner: &'a str,
    /// Pre-rendered `set(...)` lines in dependency order.
    pub vars: &'a str,
    pub display_macros: Vec<&'a str>,
    pub dirs: Vec<&'a str>,
}
