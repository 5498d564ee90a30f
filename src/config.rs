//! Process configuration: the fields a core entry point (remote server,
//! cluster controller) needs before it can start, read from an ini file
//! or built up programmatically. The core never parses `argv` itself —
//! that's left to an external CLI collaborator.
//!
//! Same `rust-ini` load-and-pluck-with-defaults shape, same
//! `get_option_required`/`get_option_parsed` helper split, as a
//! config-loading convention used elsewhere in this crate's lineage.

use std::path::Path;

use anyhow::{Context, Result};
use ini::Ini;

const SECTION: Option<&str> = Some("fyre");

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub width: u32,
    pub height: u32,
    pub oversample: u32,
    pub quality: f64,
    pub port: u16,
    pub cluster_nodes: Vec<(String, u16)>,
    pub auto_cluster: bool,
    pub pidfile: Option<String>,
    pub hidden: bool,
    pub verbose: bool,
}

impl Config {
    /// The defaults a freshly-installed config would produce: a small
    /// rendering size, no oversampling, and networking off.
    pub fn defaults() -> Config {
        Config {
            width: 200,
            height: 200,
            oversample: 1,
            quality: 1.0,
            port: crate::net::discovery::DEFAULT_DISCOVERY_PORT,
            cluster_nodes: Vec::new(),
            auto_cluster: false,
            pidfile: None,
            hidden: false,
            verbose: false,
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(filename: P) -> Result<Config> {
        let ini = Ini::load_from_file(filename).context("failed to load config file")?;
        let defaults = Config::defaults();

        Ok(Config {
            width: Config::get_option_parsed(&ini, "width")?.unwrap_or(defaults.width),
            height: Config::get_option_parsed(&ini, "height")?.unwrap_or(defaults.height),
            oversample: Config::get_option_parsed(&ini, "oversample")?
                .unwrap_or(defaults.oversample),
            quality: Config::get_option_parsed(&ini, "quality")?.unwrap_or(defaults.quality),
            port: Config::get_option_parsed(&ini, "port")?.unwrap_or(defaults.port),
            cluster_nodes: ini
                .get_from(SECTION, "cluster")
                .map(parse_cluster_list)
                .transpose()
                .context("failed to parse `cluster`")?
                .unwrap_or_default(),
            auto_cluster: Config::get_option_parsed(&ini, "auto_cluster")?
                .unwrap_or(defaults.auto_cluster),
            pidfile: ini.get_from(SECTION, "pidfile").map(String::from),
            hidden: Config::get_option_parsed(&ini, "hidden")?.unwrap_or(defaults.hidden),
            verbose: Config::get_option_parsed(&ini, "verbose")?.unwrap_or(defaults.verbose),
        })
    }

    fn get_option_parsed<T>(ini: &Ini, option: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match ini.get_from(SECTION, option).map(str::parse) {
            Some(Ok(value)) => Ok(Some(value)),
            Some(Err(err)) => Err(err).with_context(|| format!("failed to parse `{option}`")),
            None => Ok(None),
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::defaults()
    }
}

/// Parses a comma-separated `host[:port]` list, defaulting unspecified
/// ports to the discovery port, for a `--cluster host[:port],...` flag.
fn parse_cluster_list(raw: &str) -> Result<Vec<(String, u16)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port
                    .parse()
                    .with_context(|| format!("invalid port in cluster entry `{entry}`"))?;
                Ok((host.to_string(), port))
            }
            None => Ok((entry.to_string(), crate::net::discovery::DEFAULT_DISCOVERY_PORT)),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_a_small_unoversampled_image() {
        let config = Config::defaults();
        assert_eq!((config.width, config.height), (200, 200));
        assert_eq!(config.oversample, 1);
    }

    #[test]
    fn cluster_list_defaults_missing_ports_to_the_discovery_port() {
        let nodes = parse_cluster_list("alpha:7001, beta").unwrap();
        assert_eq!(nodes, vec![
            ("alpha".to_string(), 7001),
            ("beta".to_string(), crate::net::discovery::DEFAULT_DISCOVERY_PORT),
        ]);
    }

    #[test]
    fn cluster_list_rejects_an_unparsable_port() {
        assert!(parse_cluster_list("alpha:not-a-port").is_err());
    }

    #[test]
    fn loading_from_an_ini_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            b"[fyre]\nwidth = 640\nheight = 480\nverbose = true\ncluster = a:1,b:2\n",
        )
        .unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!((config.width, config.height), (640, 480));
        assert!(config.verbose);
        assert_eq!(config.cluster_nodes, vec![
            ("a".to_string(), 1),
            ("b".to_string(), 2),
        ]);
    }
}
