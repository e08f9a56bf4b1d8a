/// Flags changing a pingpong-mail run
#[derive(Debug, clap::Parser, PartialEq, Eq)]
#[clap(about, version)]
pub struct Args {
    /// Enable debug output (might include sensitive data!)
    #[clap(short, long)]
    pub verbose: bool,

    /// Path to a configuration file to use
    #[clap(short, long, default_value = "pingpong.yml")]
    pub config: String,
}
