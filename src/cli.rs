//! Command-line definitions

use crate::fleet::Selector;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;

/// Supervise a fleet of IBC relayer instances, one per chain pair
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Folder holding the chain registry, channel documents and instance workspaces
    /// [default: ~/.hermes]
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn home(&self) -> Result<PathBuf> {
        match &self.home {
            Some(home) => Ok(home.clone()),
            None => dirs::home_dir()
                .map(|home| home.join(".hermes"))
                .context("Cannot determine the user home directory, pass --home"),
        }
    }
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Create a workspace for every chain pair with an open channel
    Init {
        /// Delete and recreate existing workspaces
        #[arg(short, long)]
        force: bool,
    },

    /// Create the single-chain workspace relaying one chain to all its targets
    InitOne {
        #[arg(short, long)]
        chain: String,
        #[arg(short, long)]
        force: bool,
    },

    /// Start relayer instances
    Start {
        /// Start every instance
        #[arg(short, long)]
        all: bool,
        /// Run through the proxy launcher
        #[arg(short, long)]
        proxy: bool,
        #[command(flatten)]
        pair: PairArgs,
    },

    /// Start the single-chain instance for one chain
    StartOne {
        #[arg(short, long)]
        chain: String,
        #[arg(short, long)]
        proxy: bool,
    },

    /// Stop relayer instances; all of them unless a pair is given
    Stop {
        #[command(flatten)]
        pair: PairArgs,
    },

    /// Stop the single-chain instance for one chain
    StopOne {
        #[arg(short, long)]
        chain: String,
    },

    /// List running instances
    Show,

    /// Print the channel targets of a chain
    Channels {
        /// Chain id or chain name
        #[arg(short, long)]
        chain: String,
    },

    /// Print the registry entry of a chain and the workspaces using it
    Config {
        /// Chain id or chain name
        #[arg(short, long)]
        chain: String,
    },

    /// Rewrite the proxychains config from the proxy list
    ProxyUpdate,

    /// Run a periodic task forever under supervision
    Daemon {
        #[arg(value_enum)]
        kind: DaemonKind,
    },
}

/// One chain pair, each side given as a chain name or chain id
#[derive(Args, Debug, Default, PartialEq, Eq)]
pub struct PairArgs {
    /// Source chain
    #[arg(short, long, requires = "dst")]
    pub src: Option<String>,
    /// Destination chain
    #[arg(short, long, requires = "src")]
    pub dst: Option<String>,
}

impl PairArgs {
    pub fn selector(&self) -> Option<Selector> {
        match (&self.src, &self.dst) {
            (Some(source), Some(target)) => Some(Selector::Pair {
                source: source.clone(),
                target: target.clone(),
            }),
            _ => None,
        }
    }

    /// Selection for `start`; `--all` wins over a pair
    pub fn start_selector(&self, all: bool) -> Option<Selector> {
        if all {
            info!("All chains will be started");
            if self.src.is_some() || self.dst.is_some() {
                info!("Source and destination chain will be ignored");
            }
            return Some(Selector::All);
        }
        self.selector()
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonKind {
    /// Restart every instance through the proxy
    Fleet,
    /// Refresh the chain registry
    Registry,
    /// Refresh channel documents and create workspaces for new pairs
    Channels,
    /// Rewrite the proxychains config
    Proxy,
}

impl DaemonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonKind::Fleet => "fleet",
            DaemonKind::Registry => "registry",
            DaemonKind::Channels => "channels",
            DaemonKind::Proxy => "proxy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_pair() {
        let cli = Cli::try_parse_from([
            "relayer-fleet", "start", "-p", "--src", "terra2", "--dst", "osmosis-1",
        ])
        .unwrap();

        match cli.command {
            Command::Start { all, proxy, pair } => {
                assert!(!all);
                assert!(proxy);
                assert_eq!(
                    pair.selector(),
                    Some(Selector::Pair {
                        source: "terra2".to_string(),
                        target: "osmosis-1".to_string(),
                    })
                );
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_start_all_ignores_pair() {
        let cli = Cli::try_parse_from([
            "relayer-fleet", "start", "--all", "--src", "terra2", "--dst", "osmosis-1",
        ])
        .unwrap();

        match cli.command {
            Command::Start { all, pair, .. } => {
                assert_eq!(pair.start_selector(all), Some(Selector::All));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_start_needs_a_selection() {
        assert_eq!(PairArgs::default().start_selector(false), None);
        assert_eq!(PairArgs::default().start_selector(true), Some(Selector::All));
    }

    #[test]
    fn test_pair_needs_both_sides() {
        assert!(Cli::try_parse_from(["relayer-fleet", "stop", "--src", "terra2"]).is_err());
    }

    #[test]
    fn test_global_home_and_daemon_kind() {
        let cli =
            Cli::try_parse_from(["relayer-fleet", "daemon", "channels", "--home", "/srv/relayers"])
                .unwrap();

        assert_eq!(cli.home().unwrap(), PathBuf::from("/srv/relayers"));
        assert_eq!(
            cli.command,
            Command::Daemon {
                kind: DaemonKind::Channels
            }
        );
    }

    #[test]
    fn test_init_one_requires_chain() {
        assert!(Cli::try_parse_from(["relayer-fleet", "init-one"]).is_err());
        let cli = Cli::try_parse_from(["relayer-fleet", "init-one", "-c", "terra2", "-f"]).unwrap();
        assert_eq!(
            cli.command,
            Command::InitOne {
                chain: "terra2".to_string(),
                force: true
            }
        );
    }
}
