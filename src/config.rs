//! Command-line surface and top-level run orchestration.
//!
//! Translates `main.py`'s single flat `argparse` parser into a `clap`
//! derive [`Args`] struct, resolves it into exactly one target [`Mode`] and
//! one [`crate::strategy::Strategy`] selection, wires up the generator,
//! transport, monitor, mutator, and display collaborators for that target,
//! and hands off to [`crate::runner`] (or [`crate::discover`] for one-shot
//! discovery).

use std::net::Ipv4Addr;
use std::time::Duration;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use crate::discover;
use crate::display::Display;
use crate::generator::{self, esp, soap, ssdp};
use crate::monitor::{self, Monitor};
use crate::mutator::ExternalMutator;
use crate::network::{Protocol, Transport};
use crate::runner;
use crate::strategy::Strategy;

/// Errors resolving arguments into a runnable configuration, or raised by
/// whatever grammar bootstrap the resolved mode requires.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// None of `--discover`/`--ssdp`/`--soap`/`--esp` was given.
    #[error("no target selected: pass one of --discover, --ssdp, --soap, --esp")]
    NoTarget,
    /// More than one of `--discover`/`--ssdp`/`--soap`/`--esp` was given.
    #[error("only one of --discover, --ssdp, --soap, --esp may be given at a time")]
    MultipleTargets,
    /// More than one strategy flag was given.
    #[error("only one of --raw, --fuzz, --injection, --overflow, --radamsa may be given at a time")]
    MultipleStrategies,
    /// `--list` was given for a target other than `--soap`.
    #[error("--list is only valid together with --soap")]
    ListWithoutSoap,
    /// The `--ssdp` target was not a valid `host:port` pair.
    #[error(transparent)]
    Target(#[from] generator::Error),
    /// SOAP grammar bootstrap failed.
    #[error(transparent)]
    Soap(#[from] soap::Error),
    /// Eventing grammar bootstrap failed.
    #[error(transparent)]
    Esp(#[from] esp::Error),
    /// The monitor's HTTP client could not be constructed.
    #[error(transparent)]
    Monitor(#[from] monitor::Error),
    /// One-shot discovery failed to open its multicast socket.
    #[error(transparent)]
    Discover(#[from] discover::Error),
}

/// The one-mode-per-invocation command line described in spec §6.
#[derive(Parser, Debug)]
#[clap(author, version, about = "A protocol-aware network fuzzer for UPnP device stacks.", long_about = None)]
pub struct Args {
    /// Run one-shot SSDP multicast discovery and exit.
    #[clap(long)]
    pub discover: bool,

    /// Fuzz an SSDP target at `host:port`.
    #[clap(long, value_name = "HOST:PORT")]
    pub ssdp: Option<String>,

    /// Fuzz a SOAP target at its device description URL.
    #[clap(long, value_name = "URL")]
    pub soap: Option<String>,

    /// Fuzz an eventing target at its device description URL.
    #[clap(long, value_name = "URL")]
    pub esp: Option<String>,

    /// Print the SOAP action catalog and exit. Only valid with `--soap`.
    #[clap(long)]
    pub list: bool,

    /// Send requests unmodified.
    #[clap(long)]
    pub raw: bool,
    /// Pick uniformly among injection/overflow/radamsa each iteration.
    #[clap(long)]
    pub fuzz: bool,
    /// Mutate via command-injection augmentation.
    #[clap(long)]
    pub injection: bool,
    /// Mutate via overflow expansion.
    #[clap(long)]
    pub overflow: bool,
    /// Mutate via the external mutator (Radamsa by default).
    #[clap(long)]
    pub radamsa: bool,

    /// Delay between requests, in seconds.
    #[clap(long, default_value_t = 0)]
    pub delay: u64,
    /// URL polled to decide whether the target is still alive.
    #[clap(long, value_name = "URL")]
    pub alive_url: Option<String>,
    /// Directory crash-triggering requests are saved under.
    #[clap(long, default_value = "/tmp/fuzz_upnpfuzz")]
    pub crash_dir: String,
    /// Command run to restart the target after a crash.
    #[clap(long, value_name = "CMD")]
    pub restart_cmd: Option<String>,
    /// Delay between liveness probes while waiting for a restart, in
    /// seconds.
    #[clap(long, default_value_t = 30)]
    pub restart_delay: u64,
    /// Path (or `PATH` name) of the external mutator binary.
    #[clap(long, default_value = "radamsa")]
    pub radamsa_path: String,
    /// Socket read timeout, in seconds.
    #[clap(long, default_value_t = 5)]
    pub network_timeout: u64,
    /// Outgoing interface address used for multicast discovery.
    #[clap(long, value_name = "IP")]
    pub interface_ip: Option<Ipv4Addr>,
    /// Callback URL advertised in eventing subscriptions.
    #[clap(long, value_name = "URL", default_value = "http://127.0.0.1:8000/callback")]
    pub esp_callback: String,
}

/// The target this invocation was resolved to.
enum Mode {
    Discover,
    Ssdp(String),
    Soap(String),
    Esp(String, String),
}

fn resolve_mode(args: &Args) -> Result<Mode, Error> {
    let selected = [args.discover, args.ssdp.is_some(), args.soap.is_some(), args.esp.is_some()]
        .iter()
        .filter(|s| **s)
        .count();
    if selected == 0 {
        return Err(Error::NoTarget);
    }
    if selected > 1 {
        return Err(Error::MultipleTargets);
    }
    if args.list && args.soap.is_none() {
        return Err(Error::ListWithoutSoap);
    }

    if args.discover {
        Ok(Mode::Discover)
    } else if let Some(target) = &args.ssdp {
        Ok(Mode::Ssdp(target.clone()))
    } else if let Some(target) = &args.soap {
        Ok(Mode::Soap(target.clone()))
    } else {
        Ok(Mode::Esp(
            args.esp.clone().expect("esp is some by exhaustive branch"),
            args.esp_callback.clone(),
        ))
    }
}

fn resolve_strategy(args: &Args) -> Result<Strategy, Error> {
    let flags = [args.raw, args.fuzz, args.injection, args.overflow, args.radamsa];
    if flags.iter().filter(|f| **f).count() > 1 {
        return Err(Error::MultipleStrategies);
    }
    Ok(if args.fuzz {
        Strategy::All
    } else if args.injection {
        Strategy::Injection
    } else if args.overflow {
        Strategy::Overflow
    } else if args.radamsa {
        Strategy::Radamsa
    } else {
        Strategy::Raw
    })
}

/// Resolves `args` and runs the selected mode to completion (i.e. until the
/// operator interrupts the process; `--discover` and `--list` return once
/// their one-shot work is done).
pub fn run(args: Args) -> Result<(), Error> {
    let mode = resolve_mode(&args)?;
    let strategy = resolve_strategy(&args)?;
    let network_timeout = Duration::from_secs(args.network_timeout);
    let delay = Duration::from_secs(args.delay);
    let restart_delay = Duration::from_secs(args.restart_delay);

    let mut rng = StdRng::from_entropy();

    if let Mode::Discover = mode {
        let services = discover::discover(network_timeout, args.interface_ip, &mut rng)?;
        for service in services {
            println!("{service}");
        }
        return Ok(());
    }

    let mutator = ExternalMutator::new(&args.radamsa_path);
    let display = Display::new();
    display.print_banner();
    let mut monitor = Monitor::new(args.alive_url, args.crash_dir, args.restart_cmd, restart_delay)?;

    match mode {
        Mode::Discover => unreachable!("handled above"),
        Mode::Ssdp(target) => {
            let (host, port) = generator::parse_host_port(&target)?;
            let gen = ssdp::Generator::new(host.clone(), port);
            let mut transport =
                Transport::new(host, port, Protocol::Udp, network_timeout, args.interface_ip);
            runner::run_ssdp(
                &gen,
                &mut transport,
                &mutator,
                &mut monitor,
                &display,
                &mut rng,
                strategy,
                delay,
            )?;
        }
        Mode::Soap(url) => {
            let mut gen = soap::Generator::new(url.as_str())?;
            info!("bootstrapping SOAP grammar from {url}");
            gen.generate_grammar()?;
            if args.list {
                gen.list();
                return Ok(());
            }
            let (host, port) = soap_host_port(&url)?;
            let mut transport =
                Transport::new(host, port, Protocol::Tcp, network_timeout, args.interface_ip);
            runner::run_soap(
                &gen,
                &mut transport,
                &mutator,
                &mut monitor,
                &display,
                &mut rng,
                strategy,
                delay,
            )?;
        }
        Mode::Esp(url, callback) => {
            let mut gen = esp::Generator::new(url.as_str(), callback)?;
            info!("bootstrapping eventing grammar from {url}");
            gen.generate_grammar()?;
            let (host, port) = soap_host_port(&url)?;
            let mut transport =
                Transport::new(host, port, Protocol::Tcp, network_timeout, args.interface_ip);
            runner::run_esp(
                &mut gen,
                &mut transport,
                &mutator,
                &mut monitor,
                &display,
                &mut rng,
                strategy,
                delay,
            )?;
        }
    }

    Ok(())
}

fn soap_host_port(url: &str) -> Result<(String, u16), Error> {
    let (_base, host, port) = generator::parse_url(url)?;
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            discover: false,
            ssdp: None,
            soap: None,
            esp: None,
            list: false,
            raw: false,
            fuzz: false,
            injection: false,
            overflow: false,
            radamsa: false,
            delay: 0,
            alive_url: None,
            crash_dir: "/tmp/fuzz_upnpfuzz".to_string(),
            restart_cmd: None,
            restart_delay: 30,
            radamsa_path: "radamsa".to_string(),
            network_timeout: 5,
            interface_ip: None,
            esp_callback: "http://127.0.0.1:8000/callback".to_string(),
        }
    }

    #[test]
    fn no_target_is_an_error() {
        let args = base_args();
        assert!(matches!(resolve_mode(&args), Err(Error::NoTarget)));
    }

    #[test]
    fn two_targets_is_an_error() {
        let mut args = base_args();
        args.discover = true;
        args.ssdp = Some("192.168.1.1:1900".to_string());
        assert!(matches!(resolve_mode(&args), Err(Error::MultipleTargets)));
    }

    #[test]
    fn list_without_soap_is_an_error() {
        let mut args = base_args();
        args.ssdp = Some("192.168.1.1:1900".to_string());
        args.list = true;
        assert!(matches!(resolve_mode(&args), Err(Error::ListWithoutSoap)));
    }

    #[test]
    fn two_strategies_is_an_error() {
        let mut args = base_args();
        args.raw = true;
        args.fuzz = true;
        assert!(matches!(resolve_strategy(&args), Err(Error::MultipleStrategies)));
    }

    #[test]
    fn no_strategy_flag_defaults_to_raw() {
        let args = base_args();
        assert!(matches!(resolve_strategy(&args), Ok(Strategy::Raw)));
    }

    #[test]
    fn fuzz_flag_resolves_to_all() {
        let mut args = base_args();
        args.fuzz = true;
        assert!(matches!(resolve_strategy(&args), Ok(Strategy::All)));
    }
}
