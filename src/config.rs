//! Service configuration.
//!
//! All runtime behaviour is controlled through one immutable [`Settings`]
//! value, built either from a YAML/JSON/TOML file ([`Settings::load`]) or via
//! [`SettingsBuilder`]. The service wraps it in an `Arc` and hands the same
//! instance to the poller, the purge jobs and every worker, so no component
//! can observe a half-applied change.
//!
//! Durations are configured in whole seconds, matching the config file
//! format:
//!
//! ```yaml
//! watch:
//!   /srv/spool/in: /srv/spool/out
//! poll_interval: 5
//! workers: 4
//! fail_tries: 3
//! delete_on_fail: true
//! filetypes: [application/postscript]
//! ps2pdf_opts: "-sOwnerPassword=RANDOMPASS"
//! purge_age: 604800
//! ```

use crate::error::PdfBrewError;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment variables that override config file keys.
pub const ENV_PREFIX: &str = "PDFBREW_";

/// One watched directory and where its conversions are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchMapping {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl WatchMapping {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
        }
    }
}

/// Configuration for the watch-and-convert service.
///
/// # Example
/// ```rust
/// use pdfbrew::Settings;
///
/// let settings = Settings::builder()
///     .watch("/srv/spool/in", "/srv/spool/out")
///     .workers(4)
///     .fail_tries(3)
///     .build()
///     .unwrap();
/// assert_eq!(settings.watch.len(), 1);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Input directory → output directory. Keys are unique by construction.
    #[serde(deserialize_with = "deserialize_watch")]
    pub watch: Vec<WatchMapping>,

    /// Seconds between two listings of every input directory. Default: 5.
    #[serde(rename = "poll_interval")]
    pub poll_interval_secs: u64,

    /// Number of concurrent conversion workers. Default: 2.
    ///
    /// Each worker blocks on its own subprocess, so this is also the maximum
    /// number of tool processes alive at once.
    pub workers: usize,

    /// Consecutive failures tolerated for one output before the ceiling
    /// policy applies. Default: 3.
    pub fail_tries: u32,

    /// Delete sources whose failure count exceeded `fail_tries`. Default: false.
    ///
    /// When off, such sources stay in the input directory for manual
    /// intervention and are skipped on every poll.
    pub delete_on_fail: bool,

    /// Copy the untouched source next to its PDF. Default: false.
    pub copy_original: bool,

    /// Remove the source once its conversion succeeded. Default: true.
    pub delete_original: bool,

    /// Poll immediately at startup instead of after one interval. Default: true.
    #[serde(alias = "convert_onstart")]
    pub convert_on_start: bool,

    /// Sniffed MIME types eligible for conversion. Default: `application/postscript`.
    pub filetypes: Vec<String>,

    /// Conversion command. Default: `ps2pdf`.
    pub tool: String,

    /// Extra tool options, split on whitespace. `RANDOMPASS` is replaced by a
    /// fresh random token on every invocation.
    #[serde(alias = "tool_opts")]
    pub ps2pdf_opts: Option<String>,

    /// Retention of published files, in seconds. `None` disables the
    /// stale-file purge entirely.
    #[serde(rename = "purge_age")]
    pub purge_age_secs: Option<u64>,

    /// Seconds between stale-file purges. Default: 86400.
    #[serde(rename = "purge_interval")]
    pub purge_interval_secs: u64,

    /// Seconds between stale-error purges. Default: 60.
    #[serde(rename = "error_purge_interval")]
    pub error_purge_interval_secs: u64,

    /// Default log filter when neither the CLI nor `RUST_LOG` set one.
    pub loglevel: String,

    /// Append logs to this file instead of stderr.
    pub logfile: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            watch: Vec::new(),
            poll_interval_secs: 5,
            workers: 2,
            fail_tries: 3,
            delete_on_fail: false,
            copy_original: false,
            delete_original: true,
            convert_on_start: true,
            filetypes: vec!["application/postscript".to_string()],
            tool: "ps2pdf".to_string(),
            ps2pdf_opts: None,
            purge_age_secs: None,
            purge_interval_secs: 86_400,
            error_purge_interval_secs: 60,
            loglevel: "info".to_string(),
            logfile: None,
        }
    }
}

impl Settings {
    /// Create a new builder for `Settings`.
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder {
            settings: Self::default(),
        }
    }

    /// Read and validate a YAML, JSON or TOML config file.
    ///
    /// The format is picked from the extension. `PDFBREW_*` environment
    /// variables override file values key by key (`PDFBREW_WORKERS=4`).
    pub fn load(path: impl AsRef<Path>) -> Result<Settings, PdfBrewError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path).ok_or_else(|| {
            PdfBrewError::UnsupportedConfigFormat {
                path: path.to_path_buf(),
            }
        })?;
        let contents = std::fs::read_to_string(path).map_err(|e| PdfBrewError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let settings: Settings = format
            .figment(&contents)
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["config", "quiet"]))
            .extract()
            .map_err(|e| PdfBrewError::ConfigParse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check the constraints the builder also enforces.
    pub fn validate(&self) -> Result<(), PdfBrewError> {
        if self.watch.is_empty() {
            return Err(PdfBrewError::InvalidConfig(
                "at least one watch directory is required".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for mapping in &self.watch {
            if !seen.insert(&mapping.input_dir) {
                return Err(PdfBrewError::InvalidConfig(format!(
                    "input directory '{}' is watched twice",
                    mapping.input_dir.display()
                )));
            }
        }
        if self.workers == 0 {
            return Err(PdfBrewError::InvalidConfig("workers must be ≥ 1".into()));
        }
        if self.tool.trim().is_empty() {
            return Err(PdfBrewError::InvalidConfig("tool must not be empty".into()));
        }
        for (name, secs) in [
            ("poll_interval", self.poll_interval_secs),
            ("purge_interval", self.purge_interval_secs),
            ("error_purge_interval", self.error_purge_interval_secs),
        ] {
            if secs == 0 {
                return Err(PdfBrewError::InvalidConfig(format!(
                    "{name} must be at least 1 second"
                )));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn error_purge_interval(&self) -> Duration {
        Duration::from_secs(self.error_purge_interval_secs)
    }

    pub fn purge_age(&self) -> Option<Duration> {
        self.purge_age_secs.map(Duration::from_secs)
    }

    /// Whether a sniffed MIME type is on the allow-list.
    pub fn accepts(&self, mime: &str) -> bool {
        self.filetypes.iter().any(|t| t.eq_ignore_ascii_case(mime))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Option<Self> {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml") | Some("yml") => Some(ConfigFormat::Yaml),
            Some("json") => Some(ConfigFormat::Json),
            Some("toml") => Some(ConfigFormat::Toml),
            _ => None,
        }
    }

    fn figment(self, contents: &str) -> Figment {
        match self {
            ConfigFormat::Yaml => Figment::from(Yaml::string(contents)),
            ConfigFormat::Json => Figment::from(Json::string(contents)),
            ConfigFormat::Toml => Figment::from(Toml::string(contents)),
        }
    }
}

fn deserialize_watch<'de, D>(deserializer: D) -> Result<Vec<WatchMapping>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = BTreeMap::<PathBuf, PathBuf>::deserialize(deserializer)?;
    Ok(map
        .into_iter()
        .map(|(input_dir, output_dir)| WatchMapping {
            input_dir,
            output_dir,
        })
        .collect())
}

/// Builder for [`Settings`].
#[derive(Debug)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn watch(mut self, input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        self.settings
            .watch
            .push(WatchMapping::new(input_dir, output_dir));
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.settings.poll_interval_secs = secs;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.settings.workers = n;
        self
    }

    pub fn fail_tries(mut self, n: u32) -> Self {
        self.settings.fail_tries = n;
        self
    }

    pub fn delete_on_fail(mut self, v: bool) -> Self {
        self.settings.delete_on_fail = v;
        self
    }

    pub fn copy_original(mut self, v: bool) -> Self {
        self.settings.copy_original = v;
        self
    }

    pub fn delete_original(mut self, v: bool) -> Self {
        self.settings.delete_original = v;
        self
    }

    pub fn convert_on_start(mut self, v: bool) -> Self {
        self.settings.convert_on_start = v;
        self
    }

    pub fn filetypes<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.filetypes = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.settings.tool = tool.into();
        self
    }

    pub fn tool_options(mut self, opts: impl Into<String>) -> Self {
        self.settings.ps2pdf_opts = Some(opts.into());
        self
    }

    pub fn purge_age_secs(mut self, secs: u64) -> Self {
        self.settings.purge_age_secs = Some(secs);
        self
    }

    pub fn purge_interval_secs(mut self, secs: u64) -> Self {
        self.settings.purge_interval_secs = secs;
        self
    }

    pub fn error_purge_interval_secs(mut self, secs: u64) -> Self {
        self.settings.error_purge_interval_secs = secs;
        self
    }

    pub fn loglevel(mut self, level: impl Into<String>) -> Self {
        self.settings.loglevel = level.into();
        self
    }

    pub fn logfile(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.logfile = Some(path.into());
        self
    }

    /// Build the settings, validating constraints.
    pub fn build(self) -> Result<Settings, PdfBrewError> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.poll_interval(), Duration::from_secs(5));
        assert_eq!(s.workers, 2);
        assert_eq!(s.fail_tries, 3);
        assert!(s.delete_original);
        assert!(!s.copy_original);
        assert!(s.purge_age().is_none());
        assert_eq!(s.tool, "ps2pdf");
    }

    #[test]
    fn builder_rejects_empty_watch() {
        let err = Settings::builder().build().unwrap_err();
        assert!(err.to_string().contains("watch"), "got: {err}");
    }

    #[test]
    fn builder_rejects_zero_workers() {
        let err = Settings::builder()
            .watch("/in", "/out")
            .workers(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("workers"), "got: {err}");
    }

    #[test]
    fn builder_rejects_duplicate_input_dirs() {
        let err = Settings::builder()
            .watch("/in", "/out-a")
            .watch("/in", "/out-b")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("twice"), "got: {err}");
    }

    #[test]
    fn accepts_is_case_insensitive() {
        let s = Settings::default();
        assert!(s.accepts("application/postscript"));
        assert!(s.accepts("Application/PostScript"));
        assert!(!s.accepts("application/pdf"));
    }

    #[test]
    fn load_yaml_with_legacy_keys() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "watch:\n  /spool/in: /spool/out\nconvert_onstart: false\nps2pdf_opts: \"-sOwnerPassword=RANDOMPASS\"\nfail_tries: 4\ndelete_on_fail: true\npurge_age: 3600\n"
        )
        .unwrap();

        let s = Settings::load(file.path()).unwrap();
        assert_eq!(s.watch, vec![WatchMapping::new("/spool/in", "/spool/out")]);
        assert!(!s.convert_on_start);
        assert_eq!(s.fail_tries, 4);
        assert!(s.delete_on_fail);
        assert_eq!(s.purge_age(), Some(Duration::from_secs(3600)));
        assert_eq!(s.ps2pdf_opts.as_deref(), Some("-sOwnerPassword=RANDOMPASS"));
    }

    #[test]
    fn load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"watch": {{"/a": "/b", "/c": "/d"}}, "workers": 8, "filetypes": ["application/pdf"]}}"#
        )
        .unwrap();

        let s = Settings::load(file.path()).unwrap();
        assert_eq!(s.watch.len(), 2);
        assert_eq!(s.workers, 8);
        assert!(s.accepts("application/pdf"));
    }

    #[test]
    fn load_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "tool = \"ps2pdf14\"\nfiletypes = [\"application/postscript\", \"application/pdf\"]\n\n[watch]\n\"/spool/in\" = \"/spool/out\"\n"
        )
        .unwrap();

        let s = Settings::load(file.path()).unwrap();
        assert_eq!(s.watch, vec![WatchMapping::new("/spool/in", "/spool/out")]);
        assert_eq!(s.tool, "ps2pdf14");
        assert!(s.accepts("application/pdf"));
    }

    #[test]
    fn load_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = Settings::load(file.path()).unwrap_err();
        assert!(matches!(err, PdfBrewError::UnsupportedConfigFormat { .. }));
    }

    #[test]
    fn load_reports_parse_errors() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "watch: [not, a, map]").unwrap();
        let err = Settings::load(file.path()).unwrap_err();
        assert!(matches!(err, PdfBrewError::ConfigParse { .. }), "got: {err}");
    }
}
