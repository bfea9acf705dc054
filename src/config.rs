use anyhow::{bail, Context, Result};
use glob::glob;
use serde::Deserialize;
use std::{
    collections::HashSet,
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{debug, info};

use crate::query::SiteLogs;

pub const CONFIG_ENV: &str = "SENSORLOG_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "sensorlog.yaml";

/// File names looked for in each `data_dir` sub-directory.
const DEPTH_FILE: &str = "depth.csv";
const WIDTH_FILE: &str = "width.csv";
const FLOW_ANGLE_FILE: &str = "flowangle.csv";

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub name: String,
    pub depth_log: PathBuf,
    #[serde(default)]
    pub width_log: Option<PathBuf>,
    #[serde(default)]
    pub flow_angle_log: Option<PathBuf>,
}

impl SiteConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("site with depth log `{}` has an empty name", self.depth_log.display());
        }
        if self.name.contains('/') {
            bail!("site name `{}` must not contain `/`", self.name);
        }
        Ok(())
    }

    fn logs(&self) -> SiteLogs {
        SiteLogs {
            depth: self.depth_log.clone(),
            width: self.width_log.clone(),
            flow_angle: self.flow_angle_log.clone(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory whose sub-directories each hold one site's logs.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Self = contents
            .parse()
            .with_context(|| format!("in config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from `SENSORLOG_CONFIG` (or `sensorlog.yaml`) and apply the
    /// `PORT` override.
    pub fn from_env() -> Result<Self> {
        let path = env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::from_file(Path::new(&path))?.with_port(env::var("PORT").ok().as_deref())
    }

    pub fn with_port(mut self, raw: Option<&str>) -> Result<Self> {
        if let Some(raw) = raw {
            self.port = raw
                .trim()
                .parse()
                .with_context(|| format!("PORT must be a port number, got {raw:?}"))?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for site in &self.sites {
            site.validate()?;
            if !seen.insert(site.name.as_str()) {
                bail!("site `{}` is configured more than once", site.name);
            }
        }
        if self.sites.is_empty() && self.data_dir.is_none() {
            bail!("no sites configured; set `sites` or `data_dir`");
        }
        Ok(())
    }

    /// Every site to serve: the explicit `sites` first, then whatever
    /// `data_dir` discovery finds under names not already taken.
    pub fn resolve(&self) -> Result<Vec<(String, SiteLogs)>> {
        let mut sites: Vec<(String, SiteLogs)> = self
            .sites
            .iter()
            .map(|s| (s.name.clone(), s.logs()))
            .collect();

        if let Some(dir) = &self.data_dir {
            for (name, logs) in discover(dir)? {
                if sites.iter().any(|(taken, _)| *taken == name) {
                    debug!(site = %name, "discovered site shadowed by explicit config");
                    continue;
                }
                sites.push((name, logs));
            }
        }

        if sites.is_empty() {
            bail!("no sites found");
        }
        info!(count = sites.len(), "sites configured");
        Ok(sites)
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(s).context("failed to parse sensorlog config")?;
        Ok(cfg)
    }
}

/// Sites under `dir`: every `*/depth.csv`, named after its directory, with
/// `width.csv` and `flowangle.csv` picked up when present.
pub fn discover(dir: &Path) -> Result<Vec<(String, SiteLogs)>> {
    let pattern = format!("{}/*/{}", dir.display(), DEPTH_FILE);
    let mut found = Vec::new();
    for entry in glob(&pattern).with_context(|| format!("bad data_dir pattern {pattern}"))? {
        let depth = entry.context("listing data_dir")?;
        let Some(site_dir) = depth.parent() else {
            continue;
        };
        let Some(name) = site_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let sibling = |file: &str| Some(site_dir.join(file)).filter(|p| p.is_file());
        let logs = SiteLogs {
            width: sibling(WIDTH_FILE),
            flow_angle: sibling(FLOW_ANGLE_FILE),
            depth,
        };
        debug!(site = %name, depth = %logs.depth.display(), "discovered site");
        found.push((name, logs));
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_sites_with_defaults() -> Result<()> {
        let cfg: Config = r#"
sites:
  - name: north
    depth_log: /data/north/depth.csv
    width_log: /data/north/width.csv
  - name: south
    depth_log: /data/south/depth.csv
    flow_angle_log: /data/south/flowangle.csv
"#
        .parse()?;
        cfg.validate()?;
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.sites.len(), 2);
        assert!(cfg.sites[0].flow_angle_log.is_none());
        assert_eq!(
            cfg.sites[1].flow_angle_log.as_deref(),
            Some(Path::new("/data/south/flowangle.csv"))
        );
        Ok(())
    }

    #[test]
    fn rejects_duplicate_and_empty_names() -> Result<()> {
        let dup: Config = r#"
sites:
  - { name: north, depth_log: a.csv }
  - { name: north, depth_log: b.csv }
"#
        .parse()?;
        assert!(dup.validate().is_err());

        let empty: Config = "sites:\n  - { name: ' ', depth_log: a.csv }\n".parse()?;
        assert!(empty.validate().is_err());

        let none: Config = "port: 9000\n".parse()?;
        assert!(none.validate().is_err());
        Ok(())
    }

    #[test]
    fn port_override() -> Result<()> {
        let cfg: Config = "sites:\n  - { name: north, depth_log: a.csv }\n".parse()?;
        assert_eq!(cfg.with_port(Some("9090"))?.port, 9090);

        let cfg: Config = "sites:\n  - { name: north, depth_log: a.csv }\n".parse()?;
        assert!(cfg.with_port(Some("http")).is_err());
        Ok(())
    }

    #[test]
    fn discovers_site_directories() -> Result<()> {
        let dir = tempdir()?;
        for site in ["north", "south"] {
            fs::create_dir(dir.path().join(site))?;
            fs::write(dir.path().join(site).join(DEPTH_FILE), "")?;
        }
        fs::write(dir.path().join("north").join(WIDTH_FILE), "")?;
        // no depth log, not a site
        fs::create_dir(dir.path().join("east"))?;
        fs::write(dir.path().join("east").join(WIDTH_FILE), "")?;

        let found = discover(dir.path())?;
        let names: Vec<&str> = found.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["north", "south"]);
        assert!(found[0].1.width.is_some());
        assert!(found[0].1.flow_angle.is_none());
        assert!(found[1].1.width.is_none());
        Ok(())
    }

    #[test]
    fn explicit_sites_shadow_discovered_ones() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("north"))?;
        fs::write(dir.path().join("north").join(DEPTH_FILE), "")?;

        let cfg = Config {
            port: 8080,
            data_dir: Some(dir.path().to_path_buf()),
            sites: vec![SiteConfig {
                name: "north".into(),
                depth_log: PathBuf::from("/elsewhere/depth.csv"),
                width_log: None,
                flow_angle_log: None,
            }],
        };
        let sites = cfg.resolve()?;
        assert_eq!(sites.len(), 1);
        assert_eq!(sites[0].1.depth, Path::new("/elsewhere/depth.csv"));
        Ok(())
    }

    #[test]
    fn loads_from_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sensorlog.yaml");
        fs::write(&path, "port: 3000\nsites:\n  - { name: north, depth_log: a.csv }\n")?;
        let cfg = Config::from_file(&path)?;
        assert_eq!(cfg.port, 3000);
        assert!(Config::from_file(&dir.path().join("missing.yaml")).is_err());
        Ok(())
    }
}
