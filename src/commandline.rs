use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use std::time::Duration;

fn parse_unit_id(s: &str) -> Result<u8, String> {
    clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid unit id format: {e}"))
}

/// Plain numbers are seconds, anything else goes through humantime.
fn parse_rate(s: &str) -> Result<Duration, String> {
    if let Ok(secs) = s.trim().parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| format!("Invalid rate format: {e}"))
}

const fn about_text() -> &'static str {
    "Classic MQTT - Publish Midnite Classic charge controller data read via Modbus TCP to an MQTT broker."
}

/// Every option may also come from the environment; given values override the config file.
#[derive(Parser, Debug)]
#[command(name = "classic_mqtt", author, version, about = about_text(), long_about = None)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -q for warnings only, -v for debug, -vv for trace. Default is info.
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// YAML configuration file providing the base values.
    /// Defaults to "classic_mqtt.yml" in the working directory when it exists.
    #[arg(long, verbatim_doc_comment)]
    pub config_file: Option<PathBuf>,

    /// Host name or IP address of the Classic.
    #[arg(long, env = "CLASSIC")]
    pub classic: Option<String>,

    /// Modbus TCP port of the Classic.
    #[arg(long, env = "CLASSIC_PORT")]
    pub classic_port: Option<u16>,

    /// Name used in the topics, "<root>/<name>/...".
    #[arg(long, env = "CLASSIC_NAME")]
    pub classic_name: Option<String>,

    /// Modbus unit id of the Classic, decimal or hex.
    #[arg(long, env = "CLASSIC_UNIT_ID", value_parser = parse_unit_id)]
    pub classic_unit_id: Option<u8>,

    /// Modbus I/O timeout.
    /// Examples: "5s", "500ms".
    #[arg(long, value_parser = humantime::parse_duration, verbatim_doc_comment)]
    pub timeout: Option<Duration>,

    /// Host name or IP address of the MQTT broker.
    #[arg(long, env = "MQTT_HOST")]
    pub mqtt: Option<String>,

    /// Port of the MQTT broker.
    #[arg(long, env = "MQTT_PORT")]
    pub mqtt_port: Option<u16>,

    /// Root topic.
    #[arg(long, env = "MQTT_ROOT")]
    pub mqtt_root: Option<String>,

    /// MQTT user name.
    #[arg(long, env = "MQTT_USER")]
    pub user: Option<String>,

    /// MQTT password.
    #[arg(long = "pass", env = "MQTT_PASS", hide_env_values = true)]
    pub password: Option<String>,

    /// Publish interval while awake, 2 to 15 seconds.
    /// Examples: "5", "5s".
    #[arg(long, env = "AWAKE_PUBLISH_RATE", value_parser = parse_rate, verbatim_doc_comment)]
    pub awake_publish_rate: Option<Duration>,

    /// Publish interval while snoozing, 1 minute to 4 hours.
    /// Examples: "300", "5m".
    #[arg(long, env = "SNOOZE_PUBLISH_RATE", value_parser = parse_rate, verbatim_doc_comment)]
    pub snooze_publish_rate: Option<Duration>,

    /// Number of awake publishes before snoozing again, at least 15.
    #[arg(long, env = "AWAKE_PUBLISH_LIMIT")]
    pub awake_publish_limit: Option<u32>,
}
