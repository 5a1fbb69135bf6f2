use anyhow::{Context, Error};
use config::{Environment, File, FileFormat};
use structopt::StructOpt;

use crate::config::AppConfig;

const B: &str = r#"
    ░█░▒█░█▀▄░█▀▀▄░█░░░▀░░█▀▀▄░█░▄
    ░█░▒█░█░█░█▄▄█░█░░░█▀░█░▒█░█▀▄
    ░░▀▀▀░▀▀░░█░░░░▀▀░▀▀▀░▀░░▀░▀░▀
"#;

const DEFAULT_CONFIG: &str = r#"
    # Seconds between statistics logs
    stats_interval = 30

    # Influx compatible http api receiving the batches
    [destination]
    url = "http://localhost:8086"
    timeout = 10
"#;

#[derive(StructOpt, Debug)]
#[structopt(name = "udplink", about = "receive, decode, batch, write")]
pub struct CommandLine {
    /// Binary's version
    #[structopt(skip = env!("CARGO_PKG_VERSION"))]
    version: String,
    /// Path to config file
    #[structopt(short = "c", help = "Config file")]
    config: Option<String>,
    /// Log level / Verbosity (v: info, vv: debug, vvv: trace)
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: u8,
    /// List of modules to log
    #[structopt(short = "m", long = "modules")]
    modules: Vec<String>,
}

impl CommandLine {
    /// Layers defaults, config file and `UDPLINK_` prefixed environment variables,
    /// e.g. `UDPLINK_DESTINATION__URL`
    pub fn initialize_config(&self) -> Result<AppConfig, Error> {
        let mut builder =
            config::Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(c) = &self.config {
            builder = builder.add_source(File::with_name(c));
        }

        let config = builder
            .add_source(Environment::with_prefix("UDPLINK").prefix_separator("_").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize::<AppConfig>())
            .with_context(|| "Config error".to_string())?;
        config.validate().with_context(|| "Config error".to_string())?;

        Ok(config)
    }

    /// Configure the commandline to use the proper verbosity for logging
    pub fn initialize_logging(&self) -> Result<(), Error> {
        let level = match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        let levels = if self.modules.is_empty() {
            format!("udplink={level}")
        } else {
            self.modules.iter().map(|m| format!("{m}={level}")).collect::<Vec<_>>().join(",")
        };

        tracing_subscriber::fmt()
            .pretty()
            .with_line_number(false)
            .with_file(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_env_filter(levels)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize logging. Error = {e}"))
    }

    /// Print the banner with metadata from the loaded config
    pub fn banner(&self, config: &AppConfig) {
        println!("{}", B);
        println!("    version: {}", self.version);
        println!("    destination: {}", config.destination.url);
        println!("    destination_timeout: {:?}", config.destination.timeout);
        println!("    stats_interval: {:?}", config.stats_interval);
        for udp in config.udp.iter().filter(|u| u.enabled) {
            println!("    udp listener:");
            println!("        bind_address: {}", udp.bind_address);
            println!("        database: {}", udp.database);
            if !udp.retention_policy.is_empty() {
                println!("        retention_policy: {}", udp.retention_policy);
            }
            println!("        precision: {:?}", udp.precision);
            println!("        batch_size: {}", udp.batch_size);
            println!("        batch_pending: {}", udp.batch_pending);
            println!("        batch_timeout: {:?}", udp.batch_timeout);
            if udp.read_buffer != 0 {
                println!("        read_buffer: {}", udp.read_buffer);
            }
        }
        println!("\n");
    }
}
