use clap::Parser;

/// pi30-bridge - polls a PI30 solar inverter over serial and publishes to MQTT
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,

    /// Send one QPIGS, report whether the inverter answers, then exit
    #[clap(long = "check", conflicts_with = "once")]
    pub check: bool,

    /// Run a single poll cycle, print the snapshot as JSON, then exit
    #[clap(long = "once")]
    pub once: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}
