use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default name of the capture file.
pub const CAPTURE_FILE: &str = "lnkeeper.capture";

/// The configuration used for running the monitor.
///
/// Every field can also be set from the command line; flags win over the
/// file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the serial port.
    pub port: String,

    /// Baud rate of the serial port.
    pub baud: u32,

    /// Seconds between scrollkeeper reports (and web snapshot pushes).
    pub report_interval: u64,

    /// Capture all traffic to the capture file.
    pub capture: bool,

    /// Precede captured frames with timestamp frames.
    pub timestamp: bool,

    /// Log received messages to stderr.
    pub log: bool,

    /// Replay traffic from the capture file instead of opening a port.
    pub replay: bool,

    /// Replay as fast as possible, ignoring recorded timing.
    pub fast_replay: bool,

    /// Use an in-memory port instead of real hardware.
    pub dummy: bool,

    /// Name of the capture file.
    pub capture_file: PathBuf,

    /// Print a scrollkeeper report after every slot update.
    pub slot_trace: bool,

    /// Serve layout snapshots to browsers on this port.
    pub web_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".into(),
            baud: 57600,
            report_interval: 30,
            capture: false,
            timestamp: false,
            log: false,
            replay: false,
            fast_replay: false,
            dummy: false,
            capture_file: CAPTURE_FILE.into(),
            slot_trace: false,
            web_port: None,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    /// Panics if the input is not valid .ron.
    pub fn deserialize(input: &str) -> Self {
        Self::ron().from_str::<Config>(input).unwrap()
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            port: "/dev/serial/by-id/usb-Digikeijs_DR5000-if00".into(),
            capture: true,
            timestamp: true,
            web_port: Some(8080),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .unwrap()
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Self {
        let s = std::fs::read_to_string(p).unwrap();

        Self::deserialize(&s)
    }

    fn check_capture_vs_replay(&self) -> Result<(), Error> {
        if self.capture && self.replay {
            return Err(Error::BadConfig(
                "capture and replay both read and write the capture file; enable one of them"
                    .into(),
            ));
        }
        Ok(())
    }

    fn check_fast_replay(&self) -> Result<(), Error> {
        if self.fast_replay && !self.replay {
            return Err(Error::BadConfig(
                "fast-replay only makes sense together with replay".into(),
            ));
        }
        Ok(())
    }

    fn check_report_interval(&self) -> Result<(), Error> {
        if self.report_interval == 0 {
            return Err(Error::BadConfig(
                "the report interval must be at least one second".into(),
            ));
        }
        Ok(())
    }

    /// Check the configuration for inconsistent combinations.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_capture_vs_replay()?;
        self.check_fast_replay()?;
        self.check_report_interval()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize() {
        let c = Config::example();

        println!(
            "{}",
            ron::ser::to_string_pretty(&c, ron::ser::PrettyConfig::default()).unwrap()
        );
    }

    #[test]
    fn deserialize() {
        let input = r#"
(
    port: "/dev/ttyACM1",
    baud: 57600,
    report_interval: 10,
    capture: true,
    timestamp: true,
    log: false,
    replay: false,
    fast_replay: false,
    dummy: false,
    capture_file: "layout.capture",
    slot_trace: false,
    web_port: 8080,
)
"#;
        let config = Config::deserialize(input);
        assert_eq!(config.port, "/dev/ttyACM1");
        assert_eq!(config.web_port, Some(8080));
        config.validate().unwrap();
    }

    #[test]
    fn bad_config_capture_while_replaying() {
        let c = Config {
            capture: true,
            replay: true,
            ..Default::default()
        };

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();
        assert!(err.contains("capture"));
        assert!(err.contains("replay"));
    }

    #[test]
    fn bad_config_fast_replay_without_replay() {
        let c = Config {
            fast_replay: true,
            ..Default::default()
        };

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();
        assert!(err.contains("fast-replay"));
    }

    #[test]
    fn example_round_trips() {
        let c = Config::example();
        let text = c.serialize_pretty();
        let back = Config::deserialize(&text);
        assert_eq!(back.port, c.port);
        assert_eq!(back.web_port, c.web_port);
    }
}
