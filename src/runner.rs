//! The unified fuzz loop (spec §4.8): synthesize a request under the
//! selected strategy, send it, show stats/previews, probe liveness, and
//! hand off to the monitor on a crash. The same sequence drives all three
//! protocols; what differs per protocol is how a request is synthesized
//! and finalized, captured by [`crate::strategy`]'s per-protocol dispatch
//! functions.

use std::thread;
use std::time::Duration;

use rand::RngCore;
use tracing::warn;

use crate::display::Display;
use crate::generator::{esp, soap, ssdp};
use crate::generator::Slots;
use crate::monitor::Monitor;
use crate::mutator::ExternalMutator;
use crate::network::Transport;
use crate::strategy::{self, Strategy};

/// Runs `selected_strategy` against `request` using the generic
/// (non-SOAP) per-protocol dispatch functions, falling back to a raw
/// request if the external mutator fails.
fn dispatch<T: Slots>(
    request: &T,
    rng: &mut dyn RngCore,
    mutator: &ExternalMutator,
    selected_strategy: Strategy,
) -> (Strategy, Vec<u8>) {
    let current = if selected_strategy == Strategy::All {
        strategy::pick_all_strategy(rng)
    } else {
        selected_strategy
    };

    match current {
        Strategy::Raw => (Strategy::Raw, strategy::raw(request, rng)),
        Strategy::Injection => (Strategy::Injection, strategy::apply_injection(request, rng)),
        Strategy::Overflow => (Strategy::Overflow, strategy::apply_overflow(request, rng)),
        Strategy::Radamsa => match strategy::radamsa(request, rng, mutator) {
            Ok(bytes) => (Strategy::Radamsa, bytes),
            Err(err) => {
                warn!("external mutator failed, falling back to raw request: {err}");
                (Strategy::Radamsa, strategy::raw(request, rng))
            }
        },
        Strategy::All => unreachable!("pick_all_strategy never returns All"),
    }
}

/// Like [`dispatch`], specialized for SOAP's header/body request shape.
fn dispatch_soap(
    request: &soap::Request,
    rng: &mut dyn RngCore,
    mutator: &ExternalMutator,
    selected_strategy: Strategy,
) -> (Strategy, Vec<u8>) {
    let current = if selected_strategy == Strategy::All {
        strategy::pick_all_strategy(rng)
    } else {
        selected_strategy
    };

    match current {
        Strategy::Raw => (Strategy::Raw, strategy::soap::raw(request, rng)),
        Strategy::Injection => (
            Strategy::Injection,
            strategy::soap::apply_injection(request, rng),
        ),
        Strategy::Overflow => (
            Strategy::Overflow,
            strategy::soap::apply_overflow(request, rng),
        ),
        Strategy::Radamsa => match strategy::soap::radamsa(request, rng, mutator) {
            Ok(bytes) => (Strategy::Radamsa, bytes),
            Err(err) => {
                warn!("external mutator failed, falling back to raw request: {err}");
                (Strategy::Radamsa, strategy::soap::raw(request, rng))
            }
        },
        Strategy::All => unreachable!("pick_all_strategy never returns All"),
    }
}

/// One iteration shared by every protocol: display stats/preview, send,
/// display response preview, probe liveness, handle a crash.
fn finish_iteration(
    transport: &mut Transport,
    monitor: &mut Monitor,
    display: &Display,
    generator_name: &str,
    selected_strategy: Strategy,
    current_strategy: Strategy,
    bytes: &[u8],
) -> Result<(), crate::monitor::Error> {
    display.print_stats(
        &transport.stats,
        monitor.crashes,
        generator_name,
        selected_strategy,
        current_strategy,
    );
    display.print_request(bytes);

    let response = transport.send(bytes);
    display.print_response(&response);

    if !monitor.check_alive() {
        monitor.handle_crash(generator_name, current_strategy.as_str(), bytes)?;
    }
    Ok(())
}

/// Drives the SSDP fuzz loop until the operator interrupts the process.
pub fn run_ssdp(
    generator: &ssdp::Generator,
    transport: &mut Transport,
    mutator: &ExternalMutator,
    monitor: &mut Monitor,
    display: &Display,
    rng: &mut dyn RngCore,
    selected_strategy: Strategy,
    delay: Duration,
) -> Result<(), crate::monitor::Error> {
    monitor.create_crash_dir()?;
    loop {
        let request = generator.request(rng);
        let (current_strategy, bytes) = dispatch(&request, rng, mutator, selected_strategy);
        finish_iteration(
            transport,
            monitor,
            display,
            ssdp::Generator::NAME,
            selected_strategy,
            current_strategy,
            &bytes,
        )?;
        thread::sleep(delay);
    }
}

/// Drives the SOAP fuzz loop until the operator interrupts the process.
pub fn run_soap(
    generator: &soap::Generator,
    transport: &mut Transport,
    mutator: &ExternalMutator,
    monitor: &mut Monitor,
    display: &Display,
    rng: &mut dyn RngCore,
    selected_strategy: Strategy,
    delay: Duration,
) -> Result<(), crate::monitor::Error> {
    monitor.create_crash_dir()?;
    loop {
        let request = generator.request(rng);
        let (current_strategy, bytes) = dispatch_soap(&request, rng, mutator, selected_strategy);
        finish_iteration(
            transport,
            monitor,
            display,
            soap::Generator::NAME,
            selected_strategy,
            current_strategy,
            &bytes,
        )?;
        thread::sleep(delay);
    }
}

/// Drives the eventing fuzz loop until the operator interrupts the
/// process. Unlike SSDP/SOAP, each iteration also feeds the response back
/// into the generator's subscription tracking.
pub fn run_esp(
    generator: &mut esp::Generator,
    transport: &mut Transport,
    mutator: &ExternalMutator,
    monitor: &mut Monitor,
    display: &Display,
    rng: &mut dyn RngCore,
    selected_strategy: Strategy,
    delay: Duration,
) -> Result<(), crate::monitor::Error> {
    monitor.create_crash_dir()?;
    loop {
        let request = generator.request(rng);
        let (current_strategy, bytes) = dispatch(&request, rng, mutator, selected_strategy);

        display.print_stats(
            &transport.stats,
            monitor.crashes,
            esp::Generator::NAME,
            selected_strategy,
            current_strategy,
        );
        display.print_request(&bytes);

        let response = transport.send(&bytes);
        display.print_response(&response);
        generator.handle_sid(&response);

        if !monitor.check_alive() {
            monitor.handle_crash(esp::Generator::NAME, current_strategy.as_str(), &bytes)?;
        }
        thread::sleep(delay);
    }
}
