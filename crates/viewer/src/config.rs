//! CLI configuration for the viewer binary.

use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceSelect {
    /// Probe the WiFi transport first, then fall back to a local device.
    Auto,
    Wifi,
    Device,
}

#[derive(Clone, Debug)]
pub struct ViewerConfig {
    pub source: SourceSelect,
    pub host: Ipv4Addr,
    pub http_port: u16,
    pub capture_fps: u32,
    pub jpeg_quality: u8,
    pub wifi_timeout: Duration,
    pub verbose: bool,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            source: SourceSelect::Auto,
            host: scope_ingest::DEFAULT_HOST,
            http_port: 8080,
            capture_fps: 30,
            jpeg_quality: 75,
            wifi_timeout: Duration::from_secs(3),
            verbose: false,
        }
    }
}

const USAGE: &str = "Usage: scope-viewer [--source <auto|wifi|device>] [--host <ip>] \
[--port <n>] [--capture-fps <1-30>] [--jpeg-quality <10-100>] \
[--wifi-timeout <seconds>] [--verbose]";

impl ViewerConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut config = ViewerConfig::default();

        let mut idx = 1;
        while idx < args.len() {
            match args[idx].as_str() {
                "--source" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--source requires a value"))?;
                    config.source = match value.as_str() {
                        "auto" => SourceSelect::Auto,
                        "wifi" => SourceSelect::Wifi,
                        "device" => SourceSelect::Device,
                        other => bail!("--source must be auto, wifi or device (got {other:?})"),
                    };
                    idx += 1;
                }
                "--host" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--host requires a value"))?;
                    config.host = value
                        .parse::<Ipv4Addr>()
                        .with_context(|| "--host must be an IPv4 address".to_string())?;
                    idx += 1;
                }
                "--port" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--port requires a value"))?
                        .parse::<u16>()
                        .with_context(|| "--port must be an integer".to_string())?;
                    config.http_port = value;
                    idx += 1;
                }
                "--capture-fps" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--capture-fps requires a value"))?
                        .parse::<u32>()
                        .with_context(|| "--capture-fps must be an integer".to_string())?;
                    if !(1..=30).contains(&value) {
                        bail!("--capture-fps must be between 1 and 30");
                    }
                    config.capture_fps = value;
                    idx += 1;
                }
                "--jpeg-quality" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--jpeg-quality requires a value"))?
                        .parse::<u8>()
                        .with_context(|| "--jpeg-quality must be an integer".to_string())?;
                    if !(10..=100).contains(&value) {
                        bail!("--jpeg-quality must be between 10 and 100");
                    }
                    config.jpeg_quality = value;
                    idx += 1;
                }
                "--wifi-timeout" => {
                    idx += 1;
                    let value = args
                        .get(idx)
                        .ok_or_else(|| anyhow!("--wifi-timeout requires a value"))?
                        .parse::<u64>()
                        .with_context(|| "--wifi-timeout must be whole seconds".to_string())?;
                    if value == 0 {
                        bail!("--wifi-timeout must be at least 1 second");
                    }
                    config.wifi_timeout = Duration::from_secs(value);
                    idx += 1;
                }
                "--verbose" => {
                    config.verbose = true;
                    idx += 1;
                }
                "--help" | "-h" => bail!(USAGE),
                arg => bail!("Unrecognised flag: {arg}\n{USAGE}"),
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("scope-viewer")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_without_flags() {
        let config = ViewerConfig::from_args(&args(&[])).unwrap();
        assert_eq!(config.source, SourceSelect::Auto);
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.capture_fps, 30);
        assert_eq!(config.jpeg_quality, 75);
    }

    #[test]
    fn parses_overrides() {
        let config = ViewerConfig::from_args(&args(&[
            "--source",
            "device",
            "--port",
            "9000",
            "--capture-fps",
            "15",
            "--jpeg-quality",
            "90",
            "--verbose",
        ]))
        .unwrap();
        assert_eq!(config.source, SourceSelect::Device);
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.capture_fps, 15);
        assert_eq!(config.jpeg_quality, 90);
        assert!(config.verbose);
    }

    #[test]
    fn rejects_out_of_range_and_unknown_flags() {
        assert!(ViewerConfig::from_args(&args(&["--capture-fps", "31"])).is_err());
        assert!(ViewerConfig::from_args(&args(&["--jpeg-quality", "5"])).is_err());
        assert!(ViewerConfig::from_args(&args(&["--frobnicate"])).is_err());
        assert!(ViewerConfig::from_args(&args(&["--source", "rtsp"])).is_err());
    }
}
