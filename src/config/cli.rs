use crate::config::RelayConfig;
use crate::core::validator::ValidationPolicy;
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "arm-relay")]
#[command(about = "Relay server driving a 3-servo robotic arm over a serial link")]
pub struct CliConfig {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "ARM_RELAY_CONFIG")]
    pub config: Option<String>,

    /// Address to listen on, e.g. 0.0.0.0:3001
    #[arg(long)]
    pub bind: Option<String>,

    /// Minimum gap between two serial writes, in milliseconds (at least 100)
    #[arg(long, value_parser = clap::value_parser!(u64).range(100..))]
    pub pacing_ms: Option<u64>,

    /// Refuse angles outside each servo's physical range
    #[arg(long)]
    pub strict_angles: bool,

    /// Disable natural-language translation
    #[arg(long)]
    pub no_translator: bool,

    /// Print the attached serial ports and exit
    #[arg(long)]
    pub list_ports: bool,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Emit logs as JSON lines")]
    pub json_logs: bool,
}

impl CliConfig {
    /// Command-line flags override the file and environment.
    pub fn apply_to(&self, config: &mut RelayConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind = Some(bind.clone());
        }
        if let Some(ms) = self.pacing_ms {
            config.dispatch.pacing_ms = Some(ms);
        }
        if self.strict_angles {
            config.dispatch.validation = Some(ValidationPolicy::ServoLimits);
        }
        if self.no_translator {
            config.translator.enabled = Some(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = CliConfig::parse_from([
            "arm-relay",
            "--bind",
            "127.0.0.1:5000",
            "--strict-angles",
            "--no-translator",
            "--pacing-ms",
            "250",
        ]);

        let mut config = RelayConfig::default();
        cli.apply_to(&mut config);

        assert_eq!(config.bind_addr(), "127.0.0.1:5000");
        assert_eq!(config.validation_policy(), ValidationPolicy::ServoLimits);
        assert!(!config.translator_enabled());
        assert_eq!(config.pacing().as_millis(), 250);
    }

    #[test]
    fn test_cli_rejects_pacing_below_minimum() {
        let result = CliConfig::try_parse_from(["arm-relay", "--pacing-ms", "20"]);
        assert!(result.is_err());

        let cli = CliConfig::try_parse_from(["arm-relay", "--pacing-ms", "100"]).unwrap();
        assert_eq!(cli.pacing_ms, Some(100));
    }

    #[test]
    fn test_cli_defaults_leave_config_alone() {
        let cli = CliConfig::parse_from(["arm-relay"]);
        let mut config = RelayConfig::default();
        cli.apply_to(&mut config);
        assert!(config.server.bind.is_none());
        assert!(config.translator_enabled());
    }
}
