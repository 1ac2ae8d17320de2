use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "patchflow-worker",
    about = "Resolve, dispatch and track OS patch jobs across running instances",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Patch every running instance of the given OS versions
    Run {
        /// OS version keys, e.g. `W2019` (repeat or comma-separate)
        #[arg(
            long = "os",
            value_delimiter = ',',
            env = "OS_VERSIONS",
            required = true
        )]
        os_versions: Vec<String>,
    },

    /// Show which KBs apply to specific instances, without dispatching
    Plan {
        /// Instance ids (repeat or comma-separate)
        #[arg(long = "instance", value_delimiter = ',', required = true)]
        instances: Vec<String>,
    },
}
